//! Asynchronous delivery of channel signals to registered listeners.
//!
//! A [`Subscription`] follows the channel's signal generation through a
//! tokio `watch` channel. It is the notification path for listeners that
//! live on an async runtime rather than in a blocked thread: they are told
//! that one or more signals happened since they last looked, without
//! consuming the channel's `signaled` flag. Bursts coalesce into the latest
//! generation.

use tokio::sync::watch;

/// Async listener for signals raised on an [`EventChannel`].
///
/// [`EventChannel`]: super::EventChannel
#[derive(Debug, Clone)]
pub struct Subscription {
    rx: watch::Receiver<u64>,
}

impl Subscription {
    pub(crate) fn new(rx: watch::Receiver<u64>) -> Self {
        Self { rx }
    }

    /// Wait for the next signal and return its generation.
    ///
    /// Returns `None` once the channel has been dropped.
    pub async fn next(&mut self) -> Option<u64> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }

    /// Generation of the most recent signal, without waiting.
    pub fn latest(&self) -> u64 {
        *self.rx.borrow()
    }

    /// Whether a signal arrived that `next` has not reported yet.
    pub fn has_pending(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }
}
