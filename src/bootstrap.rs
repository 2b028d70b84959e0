//! Startup sequencing.
//!
//! Picks the trust backend, brings it up, and arms the secret watcher before
//! anything is served. Every error returned from here is fatal to startup.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{info, warn};

use crate::config::{
    BootstrapConfig, CertManagerSecret, MountedSecrets, NativeConfig, TrustMode, VaultConfig,
};
use crate::pki::{CertificateIssuer, NativeIssuer, NativeIssuerOptions, VaultPkiIssuer};
use crate::secrets::{Credential, FileSecret};
use crate::signal::Waiter;
use crate::vault::{
    materialize_token_secret, HttpVaultApi, KubeSecretApi, SecretApi, VaultApi, VaultBridgeConfig,
    VaultBridgeController, VaultBridgeHandle, VaultSession,
};
use crate::watch::{ReloadCallback, SecretWatchHandle, SecretWatchRegistration, SecretWatcher};
use crate::{Error, Result};

/// Mounted secrets that are reloaded on rotation.
#[derive(Debug, Clone, Default)]
pub struct MountedState {
    pub db_credential: Option<Arc<ArcSwap<Credential>>>,
    db_password: Option<Arc<FileSecret>>,
    pub webhook_url: Option<Arc<FileSecret>>,
}

impl MountedState {
    pub fn open(config: &MountedSecrets) -> Self {
        let db_password = config
            .db_password_file
            .as_ref()
            .map(|p| Arc::new(FileSecret::open(p)));
        let db_credential = db_password.as_ref().map(|password| {
            let user = config.db_user.clone().unwrap_or_default();
            let credential = Credential::new(user, (*password.current()).clone());
            Arc::new(ArcSwap::from_pointee(credential))
        });
        let webhook_url = config
            .webhook_url_file
            .as_ref()
            .map(|p| Arc::new(FileSecret::open(p)));
        Self {
            db_credential,
            db_password,
            webhook_url,
        }
    }

    /// Current database credential, if one is configured.
    pub fn db_credential(&self) -> Option<Arc<Credential>> {
        self.db_credential.as_ref().map(|c| c.load_full())
    }

    fn reloads(&self) -> Vec<(PathBuf, ReloadCallback)> {
        let mut reloads: Vec<(PathBuf, ReloadCallback)> = Vec::new();

        if let (Some(password), Some(credential)) = (&self.db_password, &self.db_credential) {
            let password = Arc::clone(password);
            let credential = Arc::clone(credential);
            let dir = parent_dir(password.path());
            reloads.push((
                dir,
                Arc::new(move || -> anyhow::Result<()> {
                    password.reload()?;
                    let current = credential.load();
                    let rotated = (*password.current()).clone();
                    let mut next = Credential::clone(&current);
                    if next.patch(&Credential::new(current.user.clone(), rotated)) {
                        credential.store(Arc::new(next));
                        info!(path = %password.path().display(), "Database password rotated");
                    }
                    Ok(())
                }),
            ));
        }

        if let Some(webhook) = &self.webhook_url {
            let webhook = Arc::clone(webhook);
            let dir = parent_dir(webhook.path());
            reloads.push((
                dir,
                Arc::new(move || -> anyhow::Result<()> {
                    webhook.reload()?;
                    info!(path = %webhook.path().display(), "Webhook URL reloaded");
                    Ok(())
                }),
            ));
        }

        reloads
    }
}

/// Everything that lives for the rest of the process.
#[derive(Debug)]
pub struct Bootstrapped {
    pub issuer: Arc<dyn CertificateIssuer>,
    pub mounted: MountedState,
    watcher: Option<SecretWatchHandle>,
    vault: Option<VaultBridgeHandle>,
}

impl Bootstrapped {
    pub fn watcher(&self) -> Option<&SecretWatchHandle> {
        self.watcher.as_ref()
    }

    /// Stops the watcher and the Vault bridge.
    pub async fn shutdown(self) {
        if let Some(watcher) = self.watcher {
            watcher.stop().await;
        }
        if let Some(vault) = self.vault {
            vault.shutdown().await;
        }
    }
}

pub async fn bootstrap(config: &BootstrapConfig) -> Result<Bootstrapped> {
    let mut native = None;
    let mut vault = None;

    let issuer: Arc<dyn CertificateIssuer> = match &config.trust {
        TrustMode::Native(native_config) => {
            info!("Using native PKI");
            let issuer = Arc::new(native_issuer(native_config, &config.base_dns)?);
            native = Some(Arc::clone(&issuer));
            issuer
        }
        TrustMode::Vault(vault_config) => {
            info!(endpoint = %vault_config.endpoint, "Using Vault PKI");
            let api: Arc<dyn VaultApi> = Arc::new(HttpVaultApi::new(&vault_config.endpoint)?);
            let (session, handle) = start_vault(vault_config, &config.base_dns, api).await?;

            if let Some(secret) = &vault_config.cert_manager_secret {
                let kube = KubeSecretApi::try_default().await?;
                publish_cert_manager_token(secret, &handle, &kube).await?;
            }

            let issuer =
                VaultPkiIssuer::connect(&vault_config.endpoint, &session, &config.base_dns)?;
            vault = Some(handle);
            Arc::new(issuer)
        }
    };

    let mounted = MountedState::open(&config.mounted);
    let watcher = arm_watcher(native.as_ref(), &mounted).await?;

    info!(issuer = %issuer.kind(), "Bootstrap complete");
    Ok(Bootstrapped {
        issuer,
        mounted,
        watcher,
        vault,
    })
}

/// Loads the CA. No candidate loading is fatal.
pub fn native_issuer(config: &NativeConfig, base_dns: &str) -> Result<NativeIssuer> {
    let issuer = NativeIssuer::new(NativeIssuerOptions {
        base_dns: base_dns.to_string(),
        organization: config.organization.clone(),
        ca_common_name: Some(config.ca_common_name.clone()),
        candidates: config.candidates.clone(),
    })?;
    Ok(issuer)
}

/// Starts the Vault bridge and blocks until it publishes a session.
pub async fn start_vault(
    config: &VaultConfig,
    base_dns: &str,
    api: Arc<dyn VaultApi>,
) -> Result<(VaultSession, VaultBridgeHandle)> {
    let mut bridge =
        VaultBridgeConfig::new(&config.endpoint, &config.ingress_url, &config.secrets_root)?;
    bridge.pki_mount = config.pki_mount.clone();
    bridge.pki_role = config.pki_role.clone();
    bridge.base_dns = base_dns.to_string();
    bridge.ca_common_name = config.ca_common_name.clone();
    bridge.organization = config.organization.clone();

    let (waiter, handle) = VaultBridgeController::new(api, bridge).start();
    let session = await_vault_session(waiter).await?;
    Ok((session, handle))
}

/// A waiter closed without a session means Vault never became usable.
pub async fn await_vault_session(waiter: Waiter<VaultSession>) -> Result<VaultSession> {
    waiter.wait().await.map_err(|_| Error::VaultUnavailable)
}

/// Writes the cert-manager token minted by the bridge into its Secret.
pub async fn publish_cert_manager_token(
    secret: &CertManagerSecret,
    handle: &VaultBridgeHandle,
    api: &dyn SecretApi,
) -> Result<()> {
    let token = handle
        .cert_manager_token()
        .ok_or_else(|| Error::internal("Vault bridge did not mint a cert-manager token"))?;
    materialize_token_secret(api, &secret.namespace, &secret.name, &token).await?;
    Ok(())
}

async fn arm_watcher(
    native: Option<&Arc<NativeIssuer>>,
    mounted: &MountedState,
) -> Result<Option<SecretWatchHandle>> {
    let mut reloads = mounted.reloads();

    if let Some(native) = native {
        for candidate in native.candidates() {
            for path in [&candidate.cert_path, &candidate.key_path] {
                let issuer = Arc::clone(native);
                reloads.push((
                    parent_dir(path),
                    Arc::new(move || -> anyhow::Result<()> {
                        issuer.reload()?;
                        Ok(())
                    }),
                ));
            }
        }
    }

    let watcher = build_watcher(reloads)?;
    if watcher.is_empty() {
        return Ok(None);
    }
    match watcher.start().await {
        Ok(handle) => Ok(Some(handle)),
        Err(e) => {
            warn!(error = %e, "Secret watcher not started, rotations require a restart");
            Ok(None)
        }
    }
}

/// One registration per directory; callbacks sharing a directory run in order.
pub fn build_watcher(reloads: Vec<(PathBuf, ReloadCallback)>) -> Result<SecretWatcher> {
    let mut grouped: BTreeMap<PathBuf, Vec<ReloadCallback>> = BTreeMap::new();
    for (dir, callback) in reloads {
        grouped.entry(dir).or_default().push(callback);
    }

    let mut watcher = SecretWatcher::new();
    for (dir, callbacks) in grouped {
        let registration = if callbacks.len() == 1 {
            SecretWatchRegistration {
                dir,
                callback: Arc::clone(&callbacks[0]),
            }
        } else {
            SecretWatchRegistration::new(dir, move || {
                let mut first_error = None;
                for callback in &callbacks {
                    if let Err(e) = callback() {
                        first_error.get_or_insert(e);
                    }
                }
                first_error.map_or(Ok(()), Err)
            })
        };
        watcher.register(registration)?;
    }
    Ok(watcher)
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
