//! Kubernetes Secret materialization for the cert-manager token.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, PostParams};
use kube::Client;
use thiserror::Error;
use tracing::info;

use crate::secrets::CredentialValue;

/// Data key holding the token inside the Secret.
pub const TOKEN_KEY: &str = "token";

#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("namespace is required to write secret {name}")]
    MissingNamespace { name: String },

    #[error("Kubernetes client unavailable: {0}")]
    Client(String),

    #[error("Failed to {action} secret {namespace}/{name}: {message}")]
    Api {
        action: &'static str,
        namespace: String,
        name: String,
        message: String,
    },
}

/// The three Secret calls materialization needs.
#[async_trait]
pub trait SecretApi: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, MaterializeError>;
    async fn create(&self, namespace: &str, secret: &Secret) -> Result<(), MaterializeError>;
    async fn replace(
        &self,
        namespace: &str,
        name: &str,
        secret: &Secret,
    ) -> Result<(), MaterializeError>;
}

/// [`SecretApi`] backed by the cluster the process runs in.
#[derive(Clone)]
pub struct KubeSecretApi {
    client: Client,
}

impl std::fmt::Debug for KubeSecretApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSecretApi")
            .field("client", &"[kube::Client]")
            .finish()
    }
}

impl KubeSecretApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// In-cluster config, falling back to the local kubeconfig.
    pub async fn try_default() -> Result<Self, MaterializeError> {
        let client = Client::try_default()
            .await
            .map_err(|e| MaterializeError::Client(e.to_string()))?;
        Ok(Self { client })
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn api_error(
    action: &'static str,
    namespace: &str,
    name: &str,
    err: kube::Error,
) -> MaterializeError {
    MaterializeError::Api {
        action,
        namespace: namespace.to_string(),
        name: name.to_string(),
        message: err.to_string(),
    }
}

#[async_trait]
impl SecretApi for KubeSecretApi {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, MaterializeError> {
        self.api(namespace)
            .get_opt(name)
            .await
            .map_err(|e| api_error("get", namespace, name, e))
    }

    async fn create(&self, namespace: &str, secret: &Secret) -> Result<(), MaterializeError> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        self.api(namespace)
            .create(&PostParams::default(), secret)
            .await
            .map(|_| ())
            .map_err(|e| api_error("create", namespace, &name, e))
    }

    async fn replace(
        &self,
        namespace: &str,
        name: &str,
        secret: &Secret,
    ) -> Result<(), MaterializeError> {
        self.api(namespace)
            .replace(name, &PostParams::default(), secret)
            .await
            .map(|_| ())
            .map_err(|e| api_error("update", namespace, name, e))
    }
}

/// Writes `token` into `namespace/name`, replacing the data wholesale if the
/// Secret exists and creating it otherwise. Running it twice with the same
/// token leaves the same Secret behind.
pub async fn materialize_token_secret(
    api: &dyn SecretApi,
    namespace: &str,
    name: &str,
    token: &CredentialValue,
) -> Result<(), MaterializeError> {
    if namespace.trim().is_empty() {
        return Err(MaterializeError::MissingNamespace {
            name: name.to_string(),
        });
    }
    info!(
        namespace = namespace,
        name = name,
        "Writing cert-manager token secret"
    );

    let bytes = ByteString(token.expose_secret().as_bytes().to_vec());
    let data = BTreeMap::from([(TOKEN_KEY.to_string(), bytes)]);

    match api.get(namespace, name).await? {
        Some(mut existing) => {
            existing.data = Some(data);
            existing.string_data = None;
            api.replace(namespace, name, &existing).await?;
        }
        None => {
            let secret = Secret {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    namespace: Some(namespace.to_string()),
                    ..Default::default()
                },
                data: Some(data),
                ..Default::default()
            };
            api.create(namespace, &secret).await?;
        }
    }

    info!(
        namespace = namespace,
        name = name,
        "Wrote cert-manager token secret"
    );
    Ok(())
}
