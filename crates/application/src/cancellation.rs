//! Cooperative cancellation shared by every long-running task of a run
//!
//! One signal type serves the sampling loop, the phase waits and the fault
//! mechanisms (including CPU-bound worker threads, which poll
//! [`CancelSignal::is_cancelled`]). Async waiters park on the signal instead of
//! re-checking a flag between full sleep intervals.
//!
//! Signals form a tree: cancelling a signal cancels all of its children, while
//! cancelling a child leaves the parent untouched.

use std::sync::Arc;
use std::time::Duration;

use futures::future::select_all;
use tokio::sync::watch;

/// Cloneable cancellation token
#[derive(Debug, Clone)]
pub struct CancelSignal {
    own: Arc<watch::Sender<bool>>,
    ancestors: Vec<Arc<watch::Sender<bool>>>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    /// Create a root signal
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            own: Arc::new(tx),
            ancestors: Vec::new(),
        }
    }

    /// Derive a signal cancelled together with this one
    #[must_use]
    pub fn child(&self) -> Self {
        let (tx, _rx) = watch::channel(false);
        let mut ancestors = self.ancestors.clone();
        ancestors.push(Arc::clone(&self.own));
        Self {
            own: Arc::new(tx),
            ancestors,
        }
    }

    /// Request cancellation; idempotent
    pub fn cancel(&self) {
        self.own.send_replace(true);
    }

    /// Whether this signal or any ancestor has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.chain().any(|tx| *tx.borrow())
    }

    /// Resolve once cancelled
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let waits = self.chain().map(|tx| {
            let mut rx = tx.subscribe();
            Box::pin(async move {
                // The sender lives as long as `self`, so `Err` cannot occur here
                let _ = rx.wait_for(|cancelled| *cancelled).await;
            })
        });
        select_all(waits).await;
    }

    /// Sleep for `duration` unless cancelled first
    ///
    /// Returns `true` if the full duration elapsed.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            () = self.cancelled() => false,
            () = tokio::time::sleep(duration) => true,
        }
    }

    fn chain(&self) -> impl Iterator<Item = &Arc<watch::Sender<bool>>> {
        self.ancestors.iter().chain(std::iter::once(&self.own))
    }
}
