//! Secret mount watcher.
//!
//! Watches secret-mount directories and calls the owner's reload callback
//! when something in them is written or created. Matching is by directory,
//! not file name: mount tooling swaps whole directories through symlinks.
//!
//! [`SecretWatcher::start`] returns only after every directory watch is armed,
//! so a rotation that lands after it returns is always observed.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::signal::{self, Signal};

const EVENT_BUFFER: usize = 64;

/// Reload hook owned by whoever owns the watched data.
pub type ReloadCallback = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("directory {} is already registered", dir.display())]
    DuplicateDirectory { dir: PathBuf },

    #[error("failed to create file watcher: {0}")]
    Create(String),

    #[error("failed to watch {}: {message}", dir.display())]
    Watch { dir: PathBuf, message: String },

    #[error("watcher task exited before arming")]
    Aborted,
}

/// Lifecycle of the watcher task. Never returns to `Unarmed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Unarmed,
    Armed,
    Reloading,
    Stopped,
}

/// A directory and the callback to run when it changes.
#[derive(Clone)]
pub struct SecretWatchRegistration {
    pub dir: PathBuf,
    pub callback: ReloadCallback,
}

impl std::fmt::Debug for SecretWatchRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretWatchRegistration")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl SecretWatchRegistration {
    pub fn new<F>(dir: impl Into<PathBuf>, callback: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            dir: dir.into(),
            callback: Arc::new(callback),
        }
    }
}

#[derive(Debug, Default)]
pub struct SecretWatcher {
    registrations: Vec<SecretWatchRegistration>,
}

impl SecretWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a registration. One registration per directory.
    pub fn register(&mut self, registration: SecretWatchRegistration) -> Result<(), WatchError> {
        if self.registrations.iter().any(|r| r.dir == registration.dir) {
            return Err(WatchError::DuplicateDirectory {
                dir: registration.dir,
            });
        }
        self.registrations.push(registration);
        Ok(())
    }

    pub fn is_registered(&self, dir: &Path) -> bool {
        self.registrations.iter().any(|r| r.dir == dir)
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Spawns the watcher task and waits until it is armed.
    ///
    /// Directories that do not exist are skipped with a warning.
    pub async fn start(self) -> Result<SecretWatchHandle, WatchError> {
        let mut registrations = Vec::with_capacity(self.registrations.len());
        let mut seen = HashSet::new();
        for registration in self.registrations {
            match std::fs::canonicalize(&registration.dir) {
                Ok(dir) if dir.is_dir() => {
                    if !seen.insert(dir.clone()) {
                        return Err(WatchError::DuplicateDirectory { dir });
                    }
                    registrations.push(SecretWatchRegistration {
                        dir,
                        callback: registration.callback,
                    });
                }
                Ok(_) | Err(_) => {
                    warn!(
                        dir = %registration.dir.display(),
                        "Secret directory missing, not watching it"
                    );
                }
            }
        }
        let dirs: Vec<PathBuf> = registrations.iter().map(|r| r.dir.clone()).collect();

        let (armed, armed_waiter) = signal::channel();
        let (state_tx, state_rx) = watch::channel(WatchState::Unarmed);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(registrations, armed, state_tx, cancel.clone()));

        match armed_waiter.wait().await {
            Ok(Ok(())) => {
                info!(directories = dirs.len(), "Secret watcher armed");
                Ok(SecretWatchHandle {
                    state: state_rx,
                    cancel,
                    task,
                    dirs,
                })
            }
            Ok(Err(e)) => {
                let _ = task.await;
                Err(e)
            }
            Err(_) => Err(WatchError::Aborted),
        }
    }
}

/// Handle to a running watcher.
#[derive(Debug)]
pub struct SecretWatchHandle {
    state: watch::Receiver<WatchState>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    dirs: Vec<PathBuf>,
}

impl SecretWatchHandle {
    pub fn state(&self) -> WatchState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<WatchState> {
        self.state.clone()
    }

    /// Canonical paths of the directories actually being watched.
    pub fn watched_dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Stops the task. A callback already running finishes first.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Secret watcher task ended abnormally");
        }
    }
}

async fn run(
    registrations: Vec<SecretWatchRegistration>,
    armed: Signal<Result<(), WatchError>>,
    state: watch::Sender<WatchState>,
    cancel: CancellationToken,
) {
    let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);

    let watcher = notify::recommended_watcher(move |event: Result<Event, notify::Error>| {
        let _ = tx.blocking_send(event);
    });
    let mut watcher = match watcher {
        Ok(watcher) => watcher,
        Err(e) => {
            state.send_replace(WatchState::Stopped);
            armed.fire(Err(WatchError::Create(e.to_string())));
            return;
        }
    };

    for registration in &registrations {
        if let Err(e) = watcher.watch(&registration.dir, RecursiveMode::NonRecursive) {
            state.send_replace(WatchState::Stopped);
            armed.fire(Err(WatchError::Watch {
                dir: registration.dir.clone(),
                message: e.to_string(),
            }));
            return;
        }
        debug!(dir = %registration.dir.display(), "Watching secret directory");
    }

    state.send_replace(WatchState::Armed);
    armed.fire(Ok(()));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Secret watcher stopping");
                break;
            }
            event = rx.recv() => match event {
                Some(Ok(event)) => dispatch(&registrations, &event, &state),
                Some(Err(e)) => {
                    error!(
                        error = %e,
                        "Secret watcher failed, rotations will no longer be observed"
                    );
                    break;
                }
                None => break,
            }
        }
    }

    drop(watcher);
    state.send_replace(WatchState::Stopped);
}

fn qualifies(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Any)
    )
}

fn dispatch(
    registrations: &[SecretWatchRegistration],
    event: &Event,
    state: &watch::Sender<WatchState>,
) {
    if !qualifies(&event.kind) {
        return;
    }
    for registration in registrations {
        let touched = event
            .paths
            .iter()
            .any(|p| p.parent() == Some(registration.dir.as_path()));
        if !touched {
            continue;
        }

        info!(
            dir = %registration.dir.display(),
            "Secret directory changed, reloading"
        );
        state.send_replace(WatchState::Reloading);
        if let Err(e) = (registration.callback)() {
            error!(
                dir = %registration.dir.display(),
                error = %e,
                "Reload failed, keeping previous value"
            );
        }
        state.send_replace(WatchState::Armed);
    }
}
