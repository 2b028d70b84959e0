//! Vault backend errors.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    /// The HTTP request itself failed (connect, TLS, decode).
    #[error("Vault request {path} failed: {source}")]
    Http {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    /// Vault answered with a non-success status.
    #[error("Vault returned {status} for {path}: {body}")]
    Status {
        path: String,
        status: u16,
        body: String,
    },

    /// Error from the `vaultrs` client.
    #[error("Vault client error: {0}")]
    Client(String),

    /// Vault never answered its health endpoint.
    #[error("Vault at {endpoint} not reachable after {attempts} attempts")]
    Unreachable { endpoint: String, attempts: u32 },

    /// Vault is initialized but the bootstrap material written at init time is gone.
    #[error("Missing Vault bootstrap material at {path}")]
    MissingBootstrapMaterial { path: PathBuf },

    /// Vault is still sealed after submitting the unseal key.
    #[error("Vault is still sealed after unseal")]
    StillSealed,

    /// The response did not have the expected shape.
    #[error("Unexpected Vault response for {path}: {reason}")]
    Protocol { path: String, reason: String },

    /// Writing bootstrap material to disk failed.
    #[error("Failed to write {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid Vault configuration (endpoint, ingress URL).
    #[error("Invalid Vault configuration: {0}")]
    Config(String),
}

impl VaultError {
    pub fn protocol(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Protocol {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Transient failures worth retrying: transport errors and 429/5xx answers.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { .. } | Self::Unreachable { .. } => true,
            Self::Status { status, .. } => *status == 429 || (500..=599).contains(status),
            Self::Client(message) => is_retryable_vault_error(message),
            _ => false,
        }
    }
}

impl From<vaultrs::error::ClientError> for VaultError {
    fn from(err: vaultrs::error::ClientError) -> Self {
        Self::Client(err.to_string())
    }
}

/// Check if a `vaultrs` error message describes a transient failure.
pub(crate) fn is_retryable_vault_error(error: &str) -> bool {
    let error_lower = error.to_lowercase();

    if error_lower.contains("connection refused")
        || error_lower.contains("connection reset")
        || error_lower.contains("connection closed")
        || error_lower.contains("timed out")
        || error_lower.contains("timeout")
    {
        return true;
    }

    if error_lower.contains("429") || error_lower.contains("too many requests") {
        return true;
    }

    error_lower.contains("500")
        || error_lower.contains("502")
        || error_lower.contains("503")
        || error_lower.contains("504")
}
