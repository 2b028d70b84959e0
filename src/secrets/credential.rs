//! User name and password pair.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{Result, SecretsError};
use super::types::CredentialValue;

const USERNAME_KEY: &str = "username";
const PASSWORD_KEY: &str = "password";

/// Authentication material for a downstream service (database, BMC, webhook).
///
/// The password is masked in JSON and logs. The Vault key/value layout
/// (`username`, `password`) only exists at the storage boundary, through
/// [`Credential::to_vault_data`] and [`Credential::from_vault_data`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub user: String,
    pub password: CredentialValue,
}

impl Credential {
    pub fn new(user: impl Into<String>, password: impl Into<CredentialValue>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Reads both fields from environment variables, as-is.
    pub fn from_env(user_var: &str, password_var: &str) -> Self {
        Self {
            user: std::env::var(user_var).unwrap_or_default(),
            password: CredentialValue::from_env(password_var),
        }
    }

    /// Takes the non-empty fields of `other` that differ from ours.
    ///
    /// Returns true if anything changed.
    pub fn patch(&mut self, other: &Credential) -> bool {
        let mut patched = false;

        if !other.user.trim().is_empty() && self.user != other.user {
            self.user = other.user.clone();
            patched = true;
        }

        if !other.password.is_empty() && !self.password.is_equal(&other.password) {
            self.password = other.password.clone();
            patched = true;
        }

        patched
    }

    /// A credential is usable once it names a user; the password may be empty.
    pub fn is_valid(&self) -> bool {
        !self.user.trim().is_empty()
    }

    pub fn update(&mut self, user: Option<&str>, password: Option<&str>) {
        if let Some(user) = user {
            self.user = user.to_string();
        }
        if let Some(password) = password {
            self.password = CredentialValue::new(password);
        }
    }

    /// Returns the fields only when the credential is valid.
    pub fn retrieve(&self) -> Option<(&str, &CredentialValue)> {
        self.is_valid()
            .then(|| (self.user.as_str(), &self.password))
    }

    /// Vault KV payload. This is the one place the password leaves its mask.
    pub fn to_vault_data(&self) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert(USERNAME_KEY.to_string(), Value::String(self.user.clone()));
        let password = self.password.expose_secret().to_string();
        data.insert(PASSWORD_KEY.to_string(), Value::String(password));
        data
    }

    pub fn from_vault_data(data: &Map<String, Value>) -> Result<Self> {
        let user = string_field(data, USERNAME_KEY)?;
        let password = string_field(data, PASSWORD_KEY)?;
        Ok(Self::new(user, password))
    }
}

fn string_field<'a>(data: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    match data.get(key) {
        Some(Value::String(value)) => Ok(value.as_str()),
        Some(other) => Err(SecretsError::invalid_value(
            key,
            format!("expected string, got {other}"),
        )),
        None => Err(SecretsError::missing_field(key)),
    }
}
