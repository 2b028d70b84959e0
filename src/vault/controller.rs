//! Vault bridge controller.
//!
//! Brings an external Vault from "just started" to "can issue": waits for it
//! to answer, initializes or unseals it, mounts and configures the PKI engine,
//! writes its bootstrap material under the secrets root, mints the
//! cert-manager and service tokens, and only then publishes a
//! [`VaultSession`] through a single-use [`Signal`].
//!
//! Any failure ends the background task without firing, which closes the
//! caller's [`Waiter`]. Bootstrap treats that as fatal.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use url::Url;

use super::api::{HealthStatus, PkiRole, VaultApi};
use super::error::VaultError;
use crate::pki::RetryConfig;
use crate::secrets::CredentialValue;
use crate::signal::{self, Signal, Waiter};

/// Relative locations under the secrets root.
pub const UNSEAL_KEY_FILE: &str = "vault-unseal-key/key";
pub const ROOT_TOKEN_FILE: &str = "vault-root-token/token";
pub const ROOT_CA_CERT_FILE: &str = "vault-root-ca-certificate/certificate";
pub const ROOT_CA_KEY_FILE: &str = "vault-root-ca-private-key/privatekey";

pub const CERT_MANAGER_POLICY: &str = "cert-manager";
pub const SERVICE_POLICY: &str = "trustroot-pki";

const PKI_MAX_LEASE_TTL: &str = "87600h";
const ROOT_CA_TTL: &str = "87600h";
const LEAF_MAX_TTL: &str = "2160h";
const TOKEN_TTL: &str = "8760h";

/// Everything the controller needs to configure Vault.
#[derive(Debug, Clone)]
pub struct VaultBridgeConfig {
    pub endpoint: String,
    /// Externally reachable URL used for the issuing and CRL distribution URLs.
    pub ingress_url: Url,
    pub secrets_root: PathBuf,
    pub pki_mount: String,
    pub pki_role: String,
    pub base_dns: String,
    pub ca_common_name: String,
    pub organization: String,
    /// Backoff for the initial health poll.
    pub retry: RetryConfig,
}

impl VaultBridgeConfig {
    pub fn new(
        endpoint: &str,
        ingress_url: &str,
        secrets_root: impl Into<PathBuf>,
    ) -> Result<Self, VaultError> {
        if ingress_url.trim().is_empty() {
            return Err(VaultError::Config("ingress URL is required".into()));
        }
        let ingress_url = Url::parse(ingress_url)
            .map_err(|e| VaultError::Config(format!("invalid ingress URL '{ingress_url}': {e}")))?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            ingress_url,
            secrets_root: secrets_root.into(),
            pki_mount: "pki".into(),
            pki_role: "cloud-cert".into(),
            base_dns: String::new(),
            ca_common_name: "Carbide Local CA".into(),
            organization: String::new(),
            retry: RetryConfig {
                max_attempts: 30,
                initial_backoff: std::time::Duration::from_millis(500),
                max_backoff: std::time::Duration::from_secs(10),
                backoff_multiplier: 2.0,
            },
        })
    }

    pub fn secret_path(&self, relative: &str) -> PathBuf {
        self.secrets_root.join(relative)
    }

    fn ingress(&self, suffix: &str) -> String {
        let base = self.ingress_url.as_str().trim_end_matches('/');
        format!("{base}/v1/{}/{suffix}", self.pki_mount)
    }
}

/// Token scoped to the PKI mount and role, delivered exactly once.
#[derive(Debug, Clone)]
pub struct VaultSession {
    pub token: CredentialValue,
    pub mount: String,
    pub role: String,
}

pub struct VaultBridgeController {
    api: Arc<dyn VaultApi>,
    config: VaultBridgeConfig,
    cert_manager_token: Arc<OnceCell<CredentialValue>>,
}

/// Handle to the running controller.
#[derive(Debug)]
pub struct VaultBridgeHandle {
    cert_manager_token: Arc<OnceCell<CredentialValue>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl VaultBridgeHandle {
    /// Token for cert-manager. Set before the session is published.
    pub fn cert_manager_token(&self) -> Option<CredentialValue> {
        self.cert_manager_token.get().cloned()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancels the controller if it is still working and waits for it.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Vault bridge task ended abnormally");
        }
    }
}

impl VaultBridgeController {
    pub fn new(api: Arc<dyn VaultApi>, config: VaultBridgeConfig) -> Self {
        Self {
            api,
            config,
            cert_manager_token: Arc::new(OnceCell::new()),
        }
    }

    /// Spawns the controller and returns immediately.
    pub fn start(self) -> (Waiter<VaultSession>, VaultBridgeHandle) {
        let (signal, waiter) = signal::channel();
        let cancel = CancellationToken::new();
        let handle_token = Arc::clone(&self.cert_manager_token);

        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = task_cancel.cancelled() => {
                    info!("Vault bridge cancelled before completion");
                }
                () = self.run(signal) => {}
            }
        });

        let handle = VaultBridgeHandle {
            cert_manager_token: handle_token,
            cancel,
            task,
        };
        (waiter, handle)
    }

    async fn run(&self, signal: Signal<VaultSession>) {
        info!(
            endpoint = %self.config.endpoint,
            mount = %self.config.pki_mount,
            "Configuring Vault"
        );
        match self.configure().await {
            Ok(session) => {
                info!(
                    mount = %session.mount,
                    role = %session.role,
                    "Vault successfully initialized"
                );
                if !signal.fire(session) {
                    warn!("Vault session ready but nobody is waiting for it");
                }
            }
            Err(e) => {
                // Dropping the signal closes the waiter.
                error!(error = %e, "Vault initialization failed");
            }
        }
    }

    async fn configure(&self) -> Result<VaultSession, VaultError> {
        let health = self.wait_until_reachable().await?;

        let (unseal_key, root_token) = if health.initialized {
            self.read_bootstrap_material().await?
        } else {
            self.initialize().await?
        };

        if !health.initialized || health.sealed {
            if self.api.unseal(&unseal_key).await? {
                return Err(VaultError::StillSealed);
            }
            info!("Vault unsealed");
        }

        self.configure_pki(&root_token).await?;

        let acl = self.cert_manager_policy();
        let cert_manager = self
            .mint_token(&root_token, CERT_MANAGER_POLICY, &acl)
            .await?;
        // Set once per controller; the session below is only published after this.
        let _ = self.cert_manager_token.set(cert_manager);

        let acl = self.service_policy();
        let token = self.mint_token(&root_token, SERVICE_POLICY, &acl).await?;
        Ok(VaultSession {
            token,
            mount: self.config.pki_mount.clone(),
            role: self.config.pki_role.clone(),
        })
    }

    async fn wait_until_reachable(&self) -> Result<HealthStatus, VaultError> {
        let retry = &self.config.retry;
        for attempt in 0..retry.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(retry.backoff_for_attempt(attempt)).await;
            }
            match self.api.health().await {
                Ok(status) => {
                    info!(
                        initialized = status.initialized,
                        sealed = status.sealed,
                        "Vault reachable"
                    );
                    return Ok(status);
                }
                Err(e) => {
                    warn!(
                        attempt = attempt + 1,
                        max_attempts = retry.max_attempts,
                        error = %e,
                        "Vault not ready yet"
                    );
                }
            }
        }
        Err(VaultError::Unreachable {
            endpoint: self.config.endpoint.clone(),
            attempts: retry.max_attempts,
        })
    }

    async fn initialize(&self) -> Result<(CredentialValue, CredentialValue), VaultError> {
        info!("Initializing Vault with a single key share");
        let init = self.api.init(1, 1).await?;
        let unseal_key = init
            .unseal_keys
            .into_iter()
            .next()
            .ok_or_else(|| VaultError::protocol("sys/init", "no unseal keys returned"))?;

        let unseal_path = self.config.secret_path(UNSEAL_KEY_FILE);
        write_secret_file(&unseal_path, unseal_key.expose_secret()).await?;
        let token_path = self.config.secret_path(ROOT_TOKEN_FILE);
        write_secret_file(&token_path, init.root_token.expose_secret()).await?;
        Ok((unseal_key, init.root_token))
    }

    async fn read_bootstrap_material(
        &self,
    ) -> Result<(CredentialValue, CredentialValue), VaultError> {
        let unseal_key = read_secret_file(&self.config.secret_path(UNSEAL_KEY_FILE)).await?;
        let root_token = read_secret_file(&self.config.secret_path(ROOT_TOKEN_FILE)).await?;
        Ok((unseal_key, root_token))
    }

    async fn configure_pki(&self, root_token: &CredentialValue) -> Result<(), VaultError> {
        let mount = &self.config.pki_mount;

        let mounts = self.api.list_mounts(root_token).await?;
        if !mounts.iter().any(|m| m == mount) {
            info!(mount = %mount, "Enabling PKI secrets engine");
            self.api
                .enable_pki(root_token, mount, PKI_MAX_LEASE_TTL)
                .await?;
        }

        if self.api.read_ca(root_token, mount).await?.is_none() {
            let (cn, org) = (&self.config.ca_common_name, &self.config.organization);
            info!(mount = %mount, common_name = %cn, "Generating root CA");
            let root = self
                .api
                .generate_root(root_token, mount, cn, org, ROOT_CA_TTL)
                .await?;
            let cert_path = self.config.secret_path(ROOT_CA_CERT_FILE);
            write_secret_file(&cert_path, &root.certificate).await?;
            let key_path = self.config.secret_path(ROOT_CA_KEY_FILE);
            write_secret_file(&key_path, root.private_key.expose_secret()).await?;
        }

        let (ca_url, crl_url) = (self.config.ingress("ca"), self.config.ingress("crl"));
        self.api
            .configure_urls(root_token, mount, &ca_url, &crl_url)
            .await?;

        let organization = match self.config.organization.trim() {
            "" => Vec::new(),
            org => vec![org.to_string()],
        };
        let role = PkiRole {
            allowed_domains: vec![self.config.base_dns.clone()],
            allow_subdomains: true,
            allow_bare_domains: false,
            organization,
            key_type: "ec".into(),
            key_bits: 256,
            max_ttl: LEAF_MAX_TTL.into(),
            server_flag: true,
            client_flag: true,
        };
        self.api
            .write_role(root_token, mount, &self.config.pki_role, &role)
            .await
    }

    async fn mint_token(
        &self,
        root_token: &CredentialValue,
        policy_name: &str,
        policy: &str,
    ) -> Result<CredentialValue, VaultError> {
        self.api
            .write_policy(root_token, policy_name, policy)
            .await?;
        let acl = [policy_name.to_string()];
        self.api.create_token(root_token, &acl, TOKEN_TTL).await
    }

    fn cert_manager_policy(&self) -> String {
        let (mount, role) = (&self.config.pki_mount, &self.config.pki_role);
        format!(
            "path \"{mount}/sign/{role}\" {{\n  capabilities = [\"create\", \"update\"]\n}}\n\
             path \"{mount}/issue/{role}\" {{\n  capabilities = [\"create\", \"update\"]\n}}\n"
        )
    }

    fn service_policy(&self) -> String {
        let mount = &self.config.pki_mount;
        format!(
            "{}path \"{mount}/cert/*\" {{\n  capabilities = [\"read\"]\n}}\n",
            self.cert_manager_policy()
        )
    }
}

/// Writes `contents` with owner-only permissions, creating parent directories.
async fn write_secret_file(path: &Path, contents: &str) -> Result<(), VaultError> {
    let persist = |source| VaultError::Persist {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(persist)?;
    }
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await.map_err(persist)?;
    file.write_all(contents.as_bytes()).await.map_err(persist)?;
    file.flush().await.map_err(persist)?;
    Ok(())
}

async fn read_secret_file(path: &Path) -> Result<CredentialValue, VaultError> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(CredentialValue::new(contents.trim())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(VaultError::MissingBootstrapMaterial {
                path: path.to_path_buf(),
            })
        }
        Err(source) => Err(VaultError::Persist {
            path: path.to_path_buf(),
            source,
        }),
    }
}
