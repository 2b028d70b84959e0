//! Leaf certificate issuance.
//!
//! Two backends implement [`CertificateIssuer`]:
//!
//! - [`NativeIssuer`] signs locally with a CA read from mounted files
//! - [`VaultPkiIssuer`] forwards requests to Vault's PKI secrets engine
//!
//! Request validation and name derivation live in [`request`] and are shared
//! by both.

pub mod authority;
pub mod error;
pub mod issuer;
pub mod native;
pub mod request;
pub mod vault;

pub use authority::{load_first, CaCandidate, CertificateAuthority, LoadedCa};
pub use error::{ErrorCode, IssueError};
pub use issuer::{CertificateIssuer, IssuerKind, RetryConfig};
pub use native::{NativeIssuer, NativeIssuerOptions};
pub use request::{CertificateRequest, CertificateResponse, DEFAULT_TTL_HOURS};
pub use vault::VaultPkiIssuer;
