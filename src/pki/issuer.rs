//! Certificate issuer trait definition.
//!
//! The serving layer holds exactly one `Arc<dyn CertificateIssuer>` for the
//! life of the process; which implementation sits behind it is decided once
//! at bootstrap.

use std::time::Duration;

use async_trait::async_trait;

use super::error::IssueError;
use super::request::{CertificateRequest, CertificateResponse};

/// Which trust backend an issuer talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssuerKind {
    /// CA keypair loaded from mounted files
    Native,
    /// HashiCorp Vault PKI secrets engine
    VaultPki,
}

impl IssuerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::VaultPki => "vault_pki",
        }
    }
}

impl std::fmt::Display for IssuerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration for retry behavior on transient errors.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts
    pub max_attempts: u32,
    /// Backoff before the first retry
    pub initial_backoff: Duration,
    /// Cap for exponential growth
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 for doubling)
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate the backoff duration for a given attempt number (0-indexed).
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let multiplier = self.backoff_multiplier.powi(attempt as i32 - 1);
        let backoff_ms = self.initial_backoff.as_millis() as f64 * multiplier;
        let capped_ms = backoff_ms.min(self.max_backoff.as_millis() as f64);

        Duration::from_millis(capped_ms as u64)
    }
}

/// Leaf certificate issuance from a single trust root.
///
/// Implementations must be safe to call concurrently. An issuance in flight
/// keeps using the CA it started with even if the CA is rotated meanwhile.
#[async_trait]
pub trait CertificateIssuer: Send + Sync + std::fmt::Debug {
    /// Issue a certificate for `request.name` under the configured base domain.
    ///
    /// # Errors
    ///
    /// - `IssueError::InvalidRequest` for malformed names
    /// - `IssueError::Unauthorized` for wildcard or out-of-domain names
    /// - `IssueError::Signing` / `IssueError::Backend` when issuance fails
    async fn new_certificate(
        &self,
        request: &CertificateRequest,
    ) -> Result<CertificateResponse, IssueError>;

    /// Issue a certificate for a comma-separated SAN list, without base-domain
    /// derivation. A `ttl_hours` of zero uses the default validity.
    async fn raw_certificate(
        &self,
        sans: &str,
        ttl_hours: u32,
    ) -> Result<CertificateResponse, IssueError>;

    /// PEM of the CA certificate currently signing leaves.
    async fn ca_certificate(&self) -> Result<String, IssueError>;

    /// PEM of the current certificate revocation list.
    async fn crl(&self) -> Result<String, IssueError>;

    fn kind(&self) -> IssuerKind;
}

/// Splits a comma-separated SAN list, dropping blanks.
pub(crate) fn parse_san_list(sans: &str) -> Result<Vec<String>, IssueError> {
    let names: Vec<String> = sans
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if names.is_empty() {
        return Err(IssueError::InvalidRequest("no subject alternative names given".into()));
    }
    Ok(names)
}
