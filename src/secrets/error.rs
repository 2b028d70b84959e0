//! Error types for credential handling.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for secrets operations.
pub type Result<T> = std::result::Result<T, SecretsError>;

/// Errors that can occur while reading or converting credentials.
#[derive(Error, Debug)]
pub enum SecretsError {
    /// A required key was absent from a storage map.
    #[error("Missing field: {key}")]
    MissingField { key: String },

    /// A storage map value had the wrong shape.
    #[error("Invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    /// Reading a mounted secret file failed.
    #[error("Failed to read secret file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SecretsError {
    pub fn missing_field(key: impl Into<String>) -> Self {
        Self::MissingField { key: key.into() }
    }

    pub fn invalid_value(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
