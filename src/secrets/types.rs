//! Masked credential values.
//!
//! [`CredentialValue`] keeps passwords, tokens and keys out of logs, debug
//! output and serialized payloads.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

const MASK: &str = "[REDACTED]";

/// A string wrapper that redacts its contents in Debug, Display, and serialization.
///
/// # Security
///
/// - Debug output shows `CredentialValue([REDACTED])`
/// - Display output shows `[REDACTED]`
/// - Serialization outputs `"[REDACTED]"`; deserialization accepts the real value
/// - Equality runs in constant time for equal-length inputs
/// - Memory is zeroed when dropped
/// - The plaintext is only reachable through [`CredentialValue::expose_secret`]
///
/// # Example
///
/// ```rust
/// use trustroot::secrets::CredentialValue;
///
/// let password = CredentialValue::new("hunter2");
/// assert_eq!(format!("{password}"), "[REDACTED]");
/// assert_eq!(password.expose_secret(), "hunter2");
/// ```
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct CredentialValue(String);

impl Serialize for CredentialValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(MASK)
    }
}

impl<'de> Deserialize<'de> for CredentialValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(CredentialValue(value))
    }
}

impl CredentialValue {
    /// Creates a new value from a literal.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Reads the value from an environment variable.
    ///
    /// An unset or non-UTF-8 variable yields an empty value.
    pub fn from_env(var: &str) -> Self {
        Self(std::env::var(var).unwrap_or_default())
    }

    /// Exposes the underlying plaintext.
    ///
    /// Only call this where the value must cross a trust boundary (an HTTP
    /// body, a Vault payload, a Kubernetes Secret). Never log the result.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    /// Consumes the value and returns the plaintext.
    pub fn into_inner(mut self) -> String {
        std::mem::take(&mut self.0)
    }

    /// Returns the length of the secret without exposing the value.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Compares two values without short-circuiting on the first differing byte.
    pub fn is_equal(&self, other: &CredentialValue) -> bool {
        ring::constant_time::verify_slices_are_equal(self.0.as_bytes(), other.0.as_bytes()).is_ok()
    }
}

impl fmt::Debug for CredentialValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CredentialValue({MASK})")
    }
}

impl fmt::Display for CredentialValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(MASK)
    }
}

impl PartialEq for CredentialValue {
    fn eq(&self, other: &Self) -> bool {
        self.is_equal(other)
    }
}

impl Eq for CredentialValue {}

impl From<String> for CredentialValue {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for CredentialValue {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
