//! # trustroot
//!
//! Credential bootstrap and rotation for a fleet of services: loads or
//! provisions a CA, issues leaf certificates from it, and hot-reloads mounted
//! secrets without restarting.
//!
//! ## Architecture
//!
//! ```text
//! Bootstrap ──► Native issuer (CA from mounted files)
//!    │     └──► Vault bridge ──► Vault PKI issuer
//!    │                      └──► cert-manager token Secret
//!    ├──► Secret watcher ──► CA / DB password / webhook reloads
//!    └──► HTTP API (TLS + plain) ──► CertificateIssuer
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use clap::Parser;
//! use trustroot::{api, bootstrap::bootstrap, config::Cli};
//!
//! #[tokio::main]
//! async fn main() -> trustroot::Result<()> {
//!     let config = Cli::parse().into_config()?;
//!     let ready = bootstrap(&config).await?;
//!     api::serve(&config.server, ready.issuer.clone()).await
//! }
//! ```

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod errors;
pub mod observability;
pub mod pki;
pub mod secrets;
pub mod signal;
pub mod vault;
pub mod watch;

pub use errors::{Error, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
