//! Vault trust backend.
//!
//! - [`api`]: the bootstrap HTTP calls (health, init, unseal, PKI setup)
//! - [`controller`]: background task that drives Vault to a usable state and
//!   publishes a [`VaultSession`] once
//! - [`k8s`]: writes the cert-manager token into a Kubernetes Secret

pub mod api;
pub mod controller;
pub mod error;
pub mod k8s;

pub use api::{GeneratedRoot, HealthStatus, HttpVaultApi, InitResult, PkiRole, VaultApi};
pub use controller::{VaultBridgeConfig, VaultBridgeController, VaultBridgeHandle, VaultSession};
pub use error::VaultError;
pub use k8s::{materialize_token_secret, KubeSecretApi, MaterializeError, SecretApi};
