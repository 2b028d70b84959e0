//! Certificate request and response types.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::error::IssueError;
use crate::secrets::CredentialValue;

/// Validity used when a request asks for a TTL of zero: 90 days.
pub const DEFAULT_TTL_HOURS: u32 = 24 * 90;

static NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\*|[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?)(\.[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*$")
        .expect("NAME_REGEX should be a valid regex pattern")
});

/// Request for a leaf certificate.
///
/// `name` is a unique name; the subject alternative name is derived from it
/// and the configured base domain. `ttl` is in hours, zero meaning
/// [`DEFAULT_TTL_HOURS`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct CertificateRequest {
    #[validate(
        length(min = 1, max = 253, message = "name must be 1-253 characters"),
        regex(path = *NAME_REGEX, message = "name must be a DNS name")
    )]
    pub name: String,
    #[serde(default)]
    pub ttl: u32,
}

impl CertificateRequest {
    pub fn new(name: impl Into<String>, ttl: u32) -> Self {
        Self {
            name: name.into(),
            ttl,
        }
    }

    /// Effective validity in hours. Never zero.
    pub fn ttl_hours(&self) -> u32 {
        effective_ttl(self.ttl)
    }

    /// The DNS name to put in the certificate.
    ///
    /// A bare label is placed under `base_dns`; a name already under
    /// `base_dns` is used as-is. Wildcards and names under any other domain
    /// are refused.
    pub fn unique_name(&self, base_dns: &str) -> Result<String, IssueError> {
        self.validate()
            .map_err(|e| IssueError::InvalidRequest(e.to_string()))?;

        let name = self.name.trim_end_matches('.').to_ascii_lowercase();
        if name.split('.').any(|label| label == "*") {
            return Err(IssueError::Unauthorized(format!(
                "wildcard name '{}' is not issued",
                self.name
            )));
        }

        let base = base_dns.trim_matches('.').to_ascii_lowercase();
        if base.is_empty() || name == base || name.ends_with(&format!(".{base}")) {
            return Ok(name);
        }
        if !name.contains('.') {
            return Ok(format!("{name}.{base}"));
        }
        Err(IssueError::Unauthorized(format!("name '{}' is outside {base}", self.name)))
    }
}

pub(crate) fn effective_ttl(ttl: u32) -> u32 {
    if ttl == 0 {
        DEFAULT_TTL_HOURS
    } else {
        ttl
    }
}

/// PEM certificate and private key. Persisting it is the caller's business.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateResponse {
    pub certificate: String,
    pub key: CredentialValue,
}
