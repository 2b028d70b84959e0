//! Single-use signalling.
//!
//! A [`Signal`] fires at most once and a [`Waiter`] observes it at most once.
//! Dropping the signal without firing closes the waiter, which is how a
//! background task reports "gave up" without a separate error channel.

use tokio::sync::oneshot;

/// The signal was dropped before it fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("signal closed before firing")]
pub struct SignalClosed;

/// Sending half. Consumed by [`Signal::fire`].
#[derive(Debug)]
pub struct Signal<T> {
    tx: oneshot::Sender<T>,
}

/// Receiving half. Consumed by [`Waiter::wait`].
#[derive(Debug)]
pub struct Waiter<T> {
    rx: oneshot::Receiver<T>,
}

pub fn channel<T>() -> (Signal<T>, Waiter<T>) {
    let (tx, rx) = oneshot::channel();
    (Signal { tx }, Waiter { rx })
}

impl<T> Signal<T> {
    /// Deliver the value. Returns `false` if the waiter is already gone.
    pub fn fire(self, value: T) -> bool {
        self.tx.send(value).is_ok()
    }
}

impl<T> Waiter<T> {
    pub async fn wait(self) -> Result<T, SignalClosed> {
        self.rx.await.map_err(|_| SignalClosed)
    }
}
