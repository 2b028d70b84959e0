//! # Configuration
//!
//! Command-line flags with environment fallbacks, validated into a typed
//! [`BootstrapConfig`]. Invalid flag combinations are reported before any
//! listener or backend is started.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::pki::CaCandidate;
use crate::{Error, Result};

#[derive(Debug, Clone, Parser)]
#[command(name = "trustroot")]
#[command(about = "Credential bootstrap and certificate issuance service")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Enable debug logging
    #[arg(long, env = "TRUSTROOT_DEBUG")]
    pub debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "TRUSTROOT_LOG_JSON")]
    pub log_json: bool,

    /// Address the listeners bind to
    #[arg(long, env = "TRUSTROOT_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// TLS port for the issuance API
    #[arg(long, env = "TRUSTROOT_TLS_PORT", default_value_t = 8000)]
    pub tls_port: u16,

    /// Plain HTTP port for the issuance API
    #[arg(long, env = "TRUSTROOT_INSECURE_PORT", default_value_t = 8001)]
    pub insecure_port: u16,

    /// DNS name on the serving certificate
    #[arg(long, env = "TRUSTROOT_DNS_NAME", default_value = "credsmgr.csm")]
    pub dns_name: String,

    /// Vault endpoint
    #[arg(
        long,
        env = "TRUSTROOT_VAULT_ENDPOINT",
        default_value = "http://localhost:8200"
    )]
    pub vault_endpoint: String,

    /// Directory Vault bootstrap material is written to
    #[arg(
        long,
        env = "TRUSTROOT_VAULT_SECRETS_ROOT_PATH",
        default_value = "/vault/secrets"
    )]
    pub vault_secrets_root_path: PathBuf,

    /// Base domain issued names are placed under
    #[arg(
        long,
        env = "TRUSTROOT_CA_BASE_DNS",
        default_value = "temporal.nvidia.com"
    )]
    pub ca_base_dns: String,

    /// Externally reachable Vault URL (required in Vault mode)
    #[arg(long, env = "FORGE_VAULT_INGRESS_URL")]
    pub vault_ingress_url: Option<String>,

    /// Secret the cert-manager token is written to
    #[arg(long, env = "FORGE_CERT_MANAGER_SECRET_NAME")]
    pub cert_manager_secret_name: Option<String>,

    /// Namespace of the cert-manager secret
    #[arg(long, env = "CERT_MANAGER_NS")]
    pub cert_manager_namespace: Option<String>,

    /// Sign locally with a mounted CA instead of Vault
    #[arg(long, env = "USE_NATIVE_PKI")]
    pub use_native_pki: bool,

    /// CA common name: checked against the mounted CA in native mode, used
    /// for the generated root in Vault mode
    #[arg(long, env = "CA_COMMON_NAME", default_value = "Carbide Local CA")]
    pub ca_common_name: String,

    /// Organization placed on the Vault root and on issued certificates
    #[arg(long, env = "CA_ORGANIZATION", default_value = "NVIDIA")]
    pub ca_organization: String,

    #[arg(
        long,
        env = "CA_CERT_FILE",
        default_value = "/vault/secrets/vault-root-ca-certificate/certificate"
    )]
    pub ca_cert_file: PathBuf,

    #[arg(
        long,
        env = "CA_KEY_FILE",
        default_value = "/vault/secrets/vault-root-ca-private-key/privatekey"
    )]
    pub ca_key_file: PathBuf,

    #[arg(long, env = "ALT_CA_CERT_FILE", default_value = "/etc/pki/ca/tls.crt")]
    pub alt_ca_cert_file: PathBuf,

    #[arg(long, env = "ALT_CA_KEY_FILE", default_value = "/etc/pki/ca/tls.key")]
    pub alt_ca_key_file: PathBuf,

    /// Database user paired with the mounted password
    #[arg(long, env = "TRUSTROOT_DB_USER")]
    pub db_user: Option<String>,

    /// Mounted database password file, reloaded on rotation
    #[arg(long, env = "TRUSTROOT_DB_PASSWORD_FILE")]
    pub db_password_file: Option<PathBuf>,

    /// Mounted webhook URL file, reloaded on rotation
    #[arg(long, env = "TRUSTROOT_WEBHOOK_URL_FILE")]
    pub webhook_url_file: Option<PathBuf>,

    #[arg(long, env = "TRUSTROOT_VAULT_PKI_MOUNT", default_value = "pki")]
    pub vault_pki_mount: String,

    #[arg(long, env = "TRUSTROOT_VAULT_PKI_ROLE", default_value = "cloud-cert")]
    pub vault_pki_role: String,
}

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub tls_addr: SocketAddr,
    pub insecure_addr: SocketAddr,
    pub dns_name: String,
}

/// Native mode settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeConfig {
    pub ca_common_name: String,
    pub organization: String,
    /// Primary first.
    pub candidates: Vec<CaCandidate>,
}

/// Where the cert-manager token goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertManagerSecret {
    pub namespace: String,
    pub name: String,
}

/// Vault mode settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultConfig {
    pub endpoint: String,
    pub ingress_url: String,
    pub secrets_root: PathBuf,
    pub pki_mount: String,
    pub pki_role: String,
    /// Common name of the root generated on first start.
    pub ca_common_name: String,
    /// Written to the issuing role; empty means none.
    pub organization: String,
    pub cert_manager_secret: Option<CertManagerSecret>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustMode {
    Native(NativeConfig),
    Vault(VaultConfig),
}

/// Mounted secret files watched for rotation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountedSecrets {
    pub db_user: Option<String>,
    pub db_password_file: Option<PathBuf>,
    pub webhook_url_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapConfig {
    pub server: ServerConfig,
    pub base_dns: String,
    pub trust: TrustMode,
    pub mounted: MountedSecrets,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Cli {
    /// Validates flag combinations.
    pub fn into_config(self) -> Result<BootstrapConfig> {
        let tls_addr = parse_addr(&self.bind_address, self.tls_port)?;
        let insecure_addr = parse_addr(&self.bind_address, self.insecure_port)?;
        if self.tls_port == self.insecure_port {
            return Err(Error::config(format!(
                "TLS and insecure ports must differ (both {})",
                self.tls_port
            )));
        }
        if self.dns_name.trim().is_empty() {
            return Err(Error::config("--dns-name cannot be empty"));
        }

        let trust = if self.use_native_pki {
            TrustMode::Native(NativeConfig {
                ca_common_name: self.ca_common_name,
                organization: self.ca_organization,
                candidates: vec![
                    CaCandidate::new("primary", self.ca_cert_file, self.ca_key_file),
                    CaCandidate::new("alternate", self.alt_ca_cert_file, self.alt_ca_key_file),
                ],
            })
        } else {
            let ingress_url = non_blank(self.vault_ingress_url).ok_or_else(|| {
                Error::config("--vault-ingress-url is required when not using native PKI")
            })?;

            let cert_manager_secret = match non_blank(self.cert_manager_secret_name) {
                Some(name) => {
                    let namespace = non_blank(self.cert_manager_namespace).ok_or_else(|| {
                        Error::config(
                            "--cert-manager-namespace is required with --cert-manager-secret-name",
                        )
                    })?;
                    Some(CertManagerSecret { namespace, name })
                }
                None => None,
            };

            TrustMode::Vault(VaultConfig {
                endpoint: self.vault_endpoint,
                ingress_url,
                secrets_root: self.vault_secrets_root_path,
                pki_mount: self.vault_pki_mount,
                pki_role: self.vault_pki_role,
                ca_common_name: self.ca_common_name,
                organization: self.ca_organization.trim().to_string(),
                cert_manager_secret,
            })
        };

        Ok(BootstrapConfig {
            server: ServerConfig {
                tls_addr,
                insecure_addr,
                dns_name: self.dns_name,
            },
            base_dns: self.ca_base_dns.trim().trim_matches('.').to_lowercase(),
            trust,
            mounted: MountedSecrets {
                db_user: non_blank(self.db_user),
                db_password_file: self.db_password_file,
                webhook_url_file: self.webhook_url_file,
            },
        })
    }
}

fn parse_addr(host: &str, port: u16) -> Result<SocketAddr> {
    format!("{}:{}", host, port)
        .parse()
        .map_err(|e| Error::config(format!("Invalid bind address: {}", e)))
}
