//! Secrets mounted as files.
//!
//! Secret-mount sidecars write one value per file and rotate it by swapping
//! the directory underneath. [`FileSecret`] keeps the last good value in an
//! atomically swapped slot so readers never see a half-written file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{debug, error, warn};

use super::error::{Result, SecretsError};
use super::types::CredentialValue;

#[derive(Debug)]
pub struct FileSecret {
    path: PathBuf,
    current: ArcSwap<CredentialValue>,
}

impl FileSecret {
    /// Reads the file once. A missing or unreadable file logs an error and
    /// starts empty until a later [`reload`](Self::reload) succeeds. The
    /// secret watcher only arms directories that exist when it starts, so a
    /// mount that appears afterwards is not picked up on its own.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let initial = match read_secret(&path) {
            Ok(value) => value,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to read secret file");
                CredentialValue::default()
            }
        };
        Self {
            path,
            current: ArcSwap::from_pointee(initial),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-reads the file and swaps in the new value.
    ///
    /// On failure the previous value stays active and the error is returned.
    pub fn reload(&self) -> Result<()> {
        match read_secret(&self.path) {
            Ok(value) => {
                self.current.store(Arc::new(value));
                debug!(path = %self.path.display(), "Reloaded secret file");
                Ok(())
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Keeping previous secret value");
                Err(e)
            }
        }
    }

    /// Snapshot of the current value.
    pub fn current(&self) -> Arc<CredentialValue> {
        self.current.load_full()
    }
}

fn read_secret(path: &Path) -> Result<CredentialValue> {
    let raw = std::fs::read_to_string(path).map_err(|source| SecretsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let trimmed = raw
        .strip_suffix('\n')
        .map(|s| s.strip_suffix('\r').unwrap_or(s))
        .unwrap_or(&raw);
    Ok(CredentialValue::new(trimmed))
}
