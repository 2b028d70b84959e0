//! Vault HTTP surface used during bootstrap.
//!
//! Initializing, unsealing and mounting happen before any token exists, so
//! they go through a small typed client over `reqwest` rather than `vaultrs`.
//! The [`VaultApi`] trait is the seam the bridge controller is tested at.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use super::error::VaultError;
use crate::secrets::CredentialValue;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Subset of `sys/health` the bridge needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct HealthStatus {
    pub initialized: bool,
    pub sealed: bool,
}

/// Result of `sys/init`.
#[derive(Debug, Clone)]
pub struct InitResult {
    pub unseal_keys: Vec<CredentialValue>,
    pub root_token: CredentialValue,
}

/// Root CA generated with `root/generate/exported`.
#[derive(Debug, Clone)]
pub struct GeneratedRoot {
    pub certificate: String,
    pub private_key: CredentialValue,
}

/// Issuing role written to `<mount>/roles/<role>`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PkiRole {
    pub allowed_domains: Vec<String>,
    pub allow_subdomains: bool,
    pub allow_bare_domains: bool,
    pub organization: Vec<String>,
    pub key_type: String,
    pub key_bits: u32,
    pub max_ttl: String,
    pub server_flag: bool,
    pub client_flag: bool,
}

#[async_trait]
pub trait VaultApi: Send + Sync + std::fmt::Debug {
    async fn health(&self) -> Result<HealthStatus, VaultError>;

    async fn init(&self, shares: u8, threshold: u8) -> Result<InitResult, VaultError>;

    /// Submits one unseal key share; returns whether Vault is still sealed.
    async fn unseal(&self, key: &CredentialValue) -> Result<bool, VaultError>;

    /// Mount paths without the trailing slash.
    async fn list_mounts(&self, token: &CredentialValue) -> Result<Vec<String>, VaultError>;

    async fn enable_pki(
        &self,
        token: &CredentialValue,
        mount: &str,
        max_lease_ttl: &str,
    ) -> Result<(), VaultError>;

    /// The mount's CA certificate, or `None` if no root has been generated yet.
    async fn read_ca(
        &self,
        token: &CredentialValue,
        mount: &str,
    ) -> Result<Option<String>, VaultError>;

    async fn generate_root(
        &self,
        token: &CredentialValue,
        mount: &str,
        common_name: &str,
        organization: &str,
        ttl: &str,
    ) -> Result<GeneratedRoot, VaultError>;

    async fn configure_urls(
        &self,
        token: &CredentialValue,
        mount: &str,
        issuing_url: &str,
        crl_url: &str,
    ) -> Result<(), VaultError>;

    async fn write_role(
        &self,
        token: &CredentialValue,
        mount: &str,
        name: &str,
        role: &PkiRole,
    ) -> Result<(), VaultError>;

    async fn write_policy(
        &self,
        token: &CredentialValue,
        name: &str,
        policy: &str,
    ) -> Result<(), VaultError>;

    async fn create_token(
        &self,
        token: &CredentialValue,
        policies: &[String],
        ttl: &str,
    ) -> Result<CredentialValue, VaultError>;
}

/// [`VaultApi`] over Vault's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpVaultApi {
    client: reqwest::Client,
    base: Url,
}

impl HttpVaultApi {
    pub fn new(endpoint: &str) -> Result<Self, VaultError> {
        let mut base = Url::parse(endpoint)
            .map_err(|e| VaultError::Config(format!("invalid endpoint '{endpoint}': {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| VaultError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, base })
    }

    pub fn endpoint(&self) -> &Url {
        &self.base
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        token: Option<&CredentialValue>,
        body: Option<Value>,
    ) -> Result<Value, VaultError> {
        let url = self
            .base
            .join(&format!("v1/{path}"))
            .map_err(|e| VaultError::Config(format!("invalid path '{path}': {e}")))?;
        debug!(method = %method, path = path, "Vault request");

        let mut request = self.client.request(method, url);
        if let Some(token) = token {
            request = request.header("X-Vault-Token", token.expose_secret());
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let http = |source| VaultError::Http {
            path: path.to_string(),
            source,
        };
        let response = request.send().await.map_err(http)?;
        let status = response.status();
        let text = response.text().await.map_err(http)?;

        if !status.is_success() {
            return Err(VaultError::Status {
                path: path.to_string(),
                status: status.as_u16(),
                body: text,
            });
        }
        if status == StatusCode::NO_CONTENT || text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| VaultError::protocol(path, e.to_string()))
    }
}

fn string_at<'a>(value: &'a Value, pointer: &str, path: &str) -> Result<&'a str, VaultError> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .ok_or_else(|| VaultError::protocol(path, format!("missing {pointer}")))
}

#[async_trait]
impl VaultApi for HttpVaultApi {
    async fn health(&self) -> Result<HealthStatus, VaultError> {
        // Ask for 200 in every state so sealed/uninitialized are not errors.
        let path = "sys/health?standbyok=true&sealedcode=200&uninitcode=200";
        let value = self.call(Method::GET, path, None, None).await?;
        serde_json::from_value(value).map_err(|e| VaultError::protocol("sys/health", e.to_string()))
    }

    async fn init(&self, shares: u8, threshold: u8) -> Result<InitResult, VaultError> {
        let path = "sys/init";
        let body = json!({ "secret_shares": shares, "secret_threshold": threshold });
        let value = self.call(Method::PUT, path, None, Some(body)).await?;

        let unseal_keys = value
            .get("keys")
            .and_then(Value::as_array)
            .ok_or_else(|| VaultError::protocol(path, "missing keys"))?
            .iter()
            .filter_map(Value::as_str)
            .map(CredentialValue::new)
            .collect::<Vec<_>>();
        if unseal_keys.is_empty() {
            return Err(VaultError::protocol(path, "no unseal keys returned"));
        }
        let root_token = CredentialValue::new(string_at(&value, "/root_token", path)?);
        Ok(InitResult {
            unseal_keys,
            root_token,
        })
    }

    async fn unseal(&self, key: &CredentialValue) -> Result<bool, VaultError> {
        let path = "sys/unseal";
        let body = json!({ "key": key.expose_secret() });
        let value = self.call(Method::PUT, path, None, Some(body)).await?;
        value
            .get("sealed")
            .and_then(Value::as_bool)
            .ok_or_else(|| VaultError::protocol(path, "missing sealed"))
    }

    async fn list_mounts(&self, token: &CredentialValue) -> Result<Vec<String>, VaultError> {
        let path = "sys/mounts";
        let value = self.call(Method::GET, path, Some(token), None).await?;
        // Newer servers nest the table under `data`; older ones return it at the top level.
        let table = value
            .get("data")
            .filter(|d| d.is_object())
            .unwrap_or(&value);
        let mounts: Vec<String> = table
            .as_object()
            .map(|map| {
                map.keys()
                    .filter_map(|k| k.strip_suffix('/'))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(mounts)
    }

    async fn enable_pki(
        &self,
        token: &CredentialValue,
        mount: &str,
        max_lease_ttl: &str,
    ) -> Result<(), VaultError> {
        let path = format!("sys/mounts/{mount}");
        let body = Some(json!({ "type": "pki", "config": { "max_lease_ttl": max_lease_ttl } }));
        self.call(Method::POST, &path, Some(token), body).await?;
        Ok(())
    }

    async fn read_ca(
        &self,
        token: &CredentialValue,
        mount: &str,
    ) -> Result<Option<String>, VaultError> {
        let path = format!("{mount}/cert/ca");
        match self.call(Method::GET, &path, Some(token), None).await {
            Ok(value) => Ok(value
                .pointer("/data/certificate")
                .and_then(Value::as_str)
                .filter(|pem| !pem.trim().is_empty())
                .map(str::to_string)),
            Err(VaultError::Status { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn generate_root(
        &self,
        token: &CredentialValue,
        mount: &str,
        common_name: &str,
        organization: &str,
        ttl: &str,
    ) -> Result<GeneratedRoot, VaultError> {
        let path = format!("{mount}/root/generate/exported");
        let body = Some(json!({
            "common_name": common_name,
            "organization": organization,
            "ttl": ttl,
            "key_type": "rsa",
            "key_bits": 2048,
        }));
        let value = self.call(Method::POST, &path, Some(token), body).await?;
        Ok(GeneratedRoot {
            certificate: string_at(&value, "/data/certificate", &path)?.to_string(),
            private_key: CredentialValue::new(string_at(&value, "/data/private_key", &path)?),
        })
    }

    async fn configure_urls(
        &self,
        token: &CredentialValue,
        mount: &str,
        issuing_url: &str,
        crl_url: &str,
    ) -> Result<(), VaultError> {
        let path = format!("{mount}/config/urls");
        let body = Some(json!({
            "issuing_certificates": [issuing_url],
            "crl_distribution_points": [crl_url],
        }));
        self.call(Method::POST, &path, Some(token), body).await?;
        Ok(())
    }

    async fn write_role(
        &self,
        token: &CredentialValue,
        mount: &str,
        name: &str,
        role: &PkiRole,
    ) -> Result<(), VaultError> {
        let path = format!("{mount}/roles/{name}");
        let body = serde_json::to_value(role)
            .map(Some)
            .map_err(|e| VaultError::protocol(&path, e.to_string()))?;
        self.call(Method::POST, &path, Some(token), body).await?;
        Ok(())
    }

    async fn write_policy(
        &self,
        token: &CredentialValue,
        name: &str,
        policy: &str,
    ) -> Result<(), VaultError> {
        let path = format!("sys/policies/acl/{name}");
        let body = Some(json!({ "policy": policy }));
        self.call(Method::PUT, &path, Some(token), body).await?;
        Ok(())
    }

    async fn create_token(
        &self,
        token: &CredentialValue,
        policies: &[String],
        ttl: &str,
    ) -> Result<CredentialValue, VaultError> {
        let path = "auth/token/create";
        let body = Some(json!({
            "policies": policies,
            "ttl": ttl,
            "renewable": true,
            "no_parent": true,
        }));
        let value = self.call(Method::POST, path, Some(token), body).await?;
        Ok(CredentialValue::new(string_at(&value, "/auth/client_token", path)?))
    }
}
