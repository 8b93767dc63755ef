//! Cooperative cancellation shared between the coordinator and its workers
//!
//! A [`CancelToken`] is monotonic: once cancelled it stays cancelled. Every
//! long wait in the engine goes through [`CancelToken::wait`] so that a stop
//! request interrupts the current step's retry loop promptly instead of at
//! the next full sleep boundary.

use std::time::Duration;

use tokio::sync::watch;

/// Clonable cancellation token backed by a watch channel.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Create a fresh, uncancelled token.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        // Receivers may all be gone already; that is fine.
        let _ = self.tx.send(true);
    }

    /// Check whether cancellation has been signalled.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is signalled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        // Channel closure counts as cancellation: the owning job is gone.
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }

    /// Sleep for `duration`, returning early when cancelled.
    ///
    /// Returns `true` if the wait was interrupted by cancellation.
    pub async fn wait(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        tokio::select! {
            _ = self.cancelled() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }

    /// Sleep for `secs` seconds (fractional), returning early when cancelled.
    pub async fn wait_secs(&self, secs: f64) -> bool {
        self.wait(Duration::from_secs_f64(secs.max(0.0))).await
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
