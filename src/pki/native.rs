//! Native certificate issuer.
//!
//! Signs leaves locally with a CA loaded from mounted files. The CA sits in
//! a single [`ArcSwap`] slot: every call takes a snapshot, and
//! [`NativeIssuer::reload`] replaces the whole CA without disturbing calls
//! already in flight.

use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tracing::{info, warn};

use super::authority::{load_first, CaCandidate, CertificateAuthority, LoadedCa};
use super::error::IssueError;
use super::issuer::{parse_san_list, CertificateIssuer, IssuerKind};
use super::request::{effective_ttl, CertificateRequest, CertificateResponse};
use crate::errors::CaRequiredError;

/// Options for the native issuer.
#[derive(Debug, Clone, Default)]
pub struct NativeIssuerOptions {
    /// Base domain appended to unique names.
    pub base_dns: String,
    /// Organization placed on issued leaves.
    pub organization: String,
    /// Expected CA common name; a mismatch is logged, not rejected.
    pub ca_common_name: Option<String>,
    /// Locations to try, primary first.
    pub candidates: Vec<CaCandidate>,
}

#[derive(Debug)]
pub struct NativeIssuer {
    active: ArcSwap<LoadedCa>,
    options: NativeIssuerOptions,
}

impl NativeIssuer {
    /// Loads the first valid candidate. Fails if none loads.
    pub fn new(options: NativeIssuerOptions) -> Result<Self, CaRequiredError> {
        let loaded = load_first(&options.candidates)?;
        Ok(Self::from_loaded(loaded, options))
    }

    /// Wraps an already loaded CA.
    pub fn from_loaded(loaded: LoadedCa, options: NativeIssuerOptions) -> Self {
        check_common_name(&loaded.authority, options.ca_common_name.as_deref());
        Self {
            active: ArcSwap::from_pointee(loaded),
            options,
        }
    }

    /// Snapshot of the active CA and the candidate it came from.
    pub fn active(&self) -> Arc<LoadedCa> {
        self.active.load_full()
    }

    pub fn candidates(&self) -> &[CaCandidate] {
        &self.options.candidates
    }

    /// Re-runs the loader over the same candidates and swaps the CA in.
    ///
    /// On failure the previous CA stays active.
    pub fn reload(&self) -> Result<(), CaRequiredError> {
        let loaded = load_first(&self.options.candidates)?;
        check_common_name(&loaded.authority, self.options.ca_common_name.as_deref());
        info!(
            source = %loaded.source.label,
            cert_path = %loaded.source.cert_path.display(),
            "Rotated CA"
        );
        self.active.store(Arc::new(loaded));
        Ok(())
    }

    fn issue(&self, sans: &[String], ttl_hours: u32) -> Result<CertificateResponse, IssueError> {
        let active = self.active.load();
        active.authority.issue(sans, effective_ttl(ttl_hours), &self.options.organization)
    }
}

fn check_common_name(ca: &CertificateAuthority, expected: Option<&str>) {
    if let Some(expected) = expected.filter(|cn| !cn.is_empty()) {
        if ca.common_name() != Some(expected) {
            warn!(
                expected = expected,
                actual = ca.common_name().unwrap_or("<none>"),
                "Loaded CA common name differs from configured name"
            );
        }
    }
}

#[async_trait]
impl CertificateIssuer for NativeIssuer {
    async fn new_certificate(
        &self,
        request: &CertificateRequest,
    ) -> Result<CertificateResponse, IssueError> {
        let san = request.unique_name(&self.options.base_dns)?;
        self.issue(&[san], request.ttl_hours())
    }

    async fn raw_certificate(
        &self,
        sans: &str,
        ttl_hours: u32,
    ) -> Result<CertificateResponse, IssueError> {
        let names = parse_san_list(sans)?;
        self.issue(&names, ttl_hours)
    }

    async fn ca_certificate(&self) -> Result<String, IssueError> {
        Ok(self.active.load().authority.certificate_pem().to_string())
    }

    async fn crl(&self) -> Result<String, IssueError> {
        self.active
            .load()
            .authority
            .crl_pem()
            .map(str::to_string)
            .ok_or_else(|| {
                IssueError::CrlUnavailable("active CA is not permitted to sign CRLs".into())
            })
    }

    fn kind(&self) -> IssuerKind {
        IssuerKind::Native
    }
}
