//! CA loading errors.
//!
//! A single candidate failure is a [`CaLoadError`]; when every candidate
//! fails the loader returns a [`CaRequiredError`] carrying all of them so the
//! operator can see which path was missing and which one was malformed.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// Coarse classification used for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaLoadErrorKind {
    NotFound,
    Parse,
    KeyMismatch,
}

/// Failure to load one (certificate, key) candidate.
#[derive(Debug, thiserror::Error)]
pub enum CaLoadError {
    #[error("file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("certificate {path} is not a certificate authority")]
    NotCertificateAuthority { path: PathBuf },

    #[error("certificate {path} expired at {not_after}")]
    Expired {
        path: PathBuf,
        not_after: DateTime<Utc>,
    },

    #[error("private key {key_path} does not match certificate {cert_path}")]
    KeyMismatch {
        cert_path: PathBuf,
        key_path: PathBuf,
    },

    #[error("unsupported private key in {path}: {reason}")]
    UnsupportedKey { path: PathBuf, reason: String },
}

impl CaLoadError {
    pub(crate) fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound { path }
        } else {
            Self::Read { path, source }
        }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self::Parse {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn kind(&self) -> CaLoadErrorKind {
        match self {
            Self::NotFound { .. } => CaLoadErrorKind::NotFound,
            Self::KeyMismatch { .. } => CaLoadErrorKind::KeyMismatch,
            Self::Read { .. }
            | Self::Parse { .. }
            | Self::NotCertificateAuthority { .. }
            | Self::Expired { .. }
            | Self::UnsupportedKey { .. } => CaLoadErrorKind::Parse,
        }
    }
}

/// One rejected candidate, labelled with the role it played (primary, alternate).
#[derive(Debug)]
pub struct CaCandidateFailure {
    pub label: String,
    pub cert_path: PathBuf,
    pub error: CaLoadError,
}

impl fmt::Display for CaCandidateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} path ({}): {}",
            self.label,
            self.cert_path.display(),
            self.error
        )
    }
}

/// Every candidate failed, or none was configured.
#[derive(Debug)]
pub struct CaRequiredError {
    pub failures: Vec<CaCandidateFailure>,
}

impl fmt::Display for CaRequiredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.is_empty() {
            return write!(f, "CA certificate required: no paths configured");
        }
        write!(f, "CA certificate required but not found: ")?;
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CaRequiredError {}
