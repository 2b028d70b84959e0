//! Certificate issuer backed by Vault's PKI secrets engine.

use async_trait::async_trait;
use tracing::{debug, error, info, warn};
use vaultrs::api::pki::requests::GenerateCertificateRequestBuilder;
use vaultrs::client::{VaultClient, VaultClientSettingsBuilder};
use vaultrs::pki::cert;

use super::error::IssueError;
use super::issuer::{parse_san_list, CertificateIssuer, IssuerKind, RetryConfig};
use super::request::{effective_ttl, CertificateRequest, CertificateResponse};
use crate::secrets::CredentialValue;
use crate::vault::error::is_retryable_vault_error;
use crate::vault::VaultSession;

pub struct VaultPkiIssuer {
    client: VaultClient,
    address: String,
    mount: String,
    role: String,
    base_dns: String,
    retry: RetryConfig,
}

impl std::fmt::Debug for VaultPkiIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultPkiIssuer")
            .field("address", &self.address)
            .field("mount", &self.mount)
            .field("role", &self.role)
            .field("base_dns", &self.base_dns)
            .finish()
    }
}

impl VaultPkiIssuer {
    /// Builds a client authenticated with the session token.
    pub fn connect(
        address: &str,
        session: &VaultSession,
        base_dns: &str,
    ) -> Result<Self, IssueError> {
        if address.is_empty() {
            return Err(IssueError::Backend("Vault address cannot be empty".into()));
        }

        let mut settings_builder = VaultClientSettingsBuilder::default();
        settings_builder.address(address);
        settings_builder.token(session.token.expose_secret());
        let settings = settings_builder
            .build()
            .map_err(|e| IssueError::Backend(format!("Invalid Vault configuration: {}", e)))?;
        let client = VaultClient::new(settings)
            .map_err(|e| IssueError::Backend(format!("Failed to create Vault client: {}", e)))?;

        info!(
            address = %address,
            mount = %session.mount,
            role = %session.role,
            "Vault PKI issuer ready"
        );
        Ok(Self {
            client,
            address: address.to_string(),
            mount: session.mount.clone(),
            role: session.role.clone(),
            base_dns: base_dns.to_string(),
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn generate(
        &self,
        sans: &[String],
        ttl_hours: u32,
    ) -> Result<CertificateResponse, IssueError> {
        let (common_name, rest) = sans
            .split_first()
            .ok_or_else(|| {
                IssueError::InvalidRequest("no subject alternative names given".into())
            })?;
        let ttl = effective_ttl(ttl_hours);

        let mut attempt = 0;
        loop {
            let mut opts = GenerateCertificateRequestBuilder::default();
            opts.common_name(common_name.clone());
            if !rest.is_empty() {
                opts.alt_names(rest.join(","));
            }
            opts.ttl(format!("{}h", ttl));

            match cert::generate(&self.client, &self.mount, &self.role, Some(&mut opts)).await {
                Ok(response) => {
                    debug!(
                        common_name = %common_name,
                        serial_number = %response.serial_number,
                        "Issued certificate via Vault PKI"
                    );
                    return Ok(CertificateResponse {
                        certificate: response.certificate,
                        key: CredentialValue::new(response.private_key),
                    });
                }
                Err(e) => {
                    let message = e.to_string();
                    attempt += 1;
                    if attempt >= self.retry.max_attempts || !is_retryable_vault_error(&message) {
                        error!(
                            error = %message,
                            common_name = %common_name,
                            attempts = attempt,
                            "Vault PKI issuance failed"
                        );
                        return Err(IssueError::Backend(format!(
                            "Vault PKI certificate generation failed: {}",
                            message
                        )));
                    }
                    let backoff = self.retry.backoff_for_attempt(attempt);
                    warn!(
                        error = %message,
                        attempt = attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "Retrying Vault PKI issuance"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

#[async_trait]
impl CertificateIssuer for VaultPkiIssuer {
    async fn new_certificate(
        &self,
        request: &CertificateRequest,
    ) -> Result<CertificateResponse, IssueError> {
        let san = request.unique_name(&self.base_dns)?;
        self.generate(&[san], request.ttl_hours()).await
    }

    async fn raw_certificate(
        &self,
        sans: &str,
        ttl_hours: u32,
    ) -> Result<CertificateResponse, IssueError> {
        let names = parse_san_list(sans)?;
        self.generate(&names, ttl_hours).await
    }

    async fn ca_certificate(&self) -> Result<String, IssueError> {
        cert::read(&self.client, &self.mount, "ca")
            .await
            .map(|r| r.certificate)
            .map_err(|e| IssueError::CaUnavailable(format!("failed to read CA from Vault: {}", e)))
    }

    async fn crl(&self) -> Result<String, IssueError> {
        cert::read(&self.client, &self.mount, "crl")
            .await
            .map(|r| r.certificate)
            .map_err(|e| {
                IssueError::CrlUnavailable(format!("failed to read CRL from Vault: {}", e))
            })
    }

    fn kind(&self) -> IssuerKind {
        IssuerKind::VaultPki
    }
}
