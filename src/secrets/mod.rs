//! Credential material held in memory.
//!
//! - [`CredentialValue`]: a masked string that never renders its plaintext
//! - [`Credential`]: a user name plus password, converted to and from the
//!   Vault key/value representation only at the storage boundary
//! - [`FileSecret`]: the current contents of a mounted secret file, reloaded
//!   when the secret watcher sees the mount change

pub mod credential;
pub mod error;
pub mod file;
pub mod types;

pub use credential::Credential;
pub use error::{Result, SecretsError};
pub use file::FileSecret;
pub use types::CredentialValue;
