//! Cancellable lifetime scope shared by a match or waiting room and its tasks

use std::sync::Arc;
use tokio::sync::watch;

/// Cloneable cancellation handle; cancelling is permanent
#[derive(Clone, Debug)]
pub struct Lifetime {
    tx: Arc<watch::Sender<bool>>,
}

impl Lifetime {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Cancel the scope. Returns false if it was already cancelled.
    pub fn cancel(&self) -> bool {
        self.tx.send_if_modified(|cancelled| {
            if *cancelled {
                false
            } else {
                *cancelled = true;
                true
            }
        })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the scope is cancelled
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for Lifetime {
    fn default() -> Self {
        Self::new()
    }
}
