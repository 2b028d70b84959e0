//! # Error Handling
//!
//! Crate-level error type for trustroot. Each subsystem keeps its own
//! `thiserror` enum; this type is what bootstrap and the binary propagate.

mod ca;

pub use ca::{CaCandidateFailure, CaLoadError, CaLoadErrorKind, CaRequiredError};

use crate::pki::IssueError;
use crate::vault::{MaterializeError, VaultError};
use crate::watch::WatchError;

/// Custom result type for trustroot operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the credential bootstrap service
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network transport errors (listener bind, serve)
    #[error("Transport error: {0}")]
    Transport(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No CA candidate could be loaded
    #[error(transparent)]
    CaRequired(#[from] CaRequiredError),

    /// Certificate issuance failed
    #[error("Issuance error: {0}")]
    Issue(#[from] IssueError),

    /// Vault backend errors
    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),

    /// The Vault bridge finished without publishing a token
    #[error("vault failed to initialize")]
    VaultUnavailable,

    /// Kubernetes Secret write failed
    #[error("Secret materialization error: {0}")]
    Materialize(#[from] MaterializeError),

    /// Secret watcher failed to arm
    #[error("Secret watcher error: {0}")]
    Watch(#[from] WatchError),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport(message.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }
}
