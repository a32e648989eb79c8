//! # shutdown
//!
//! why: one stop signal every background task of a node can wait on
//! relations: owned by raft.rs, awaited by election.rs, replicator.rs and apply.rs
//! what: StopSignal

use std::sync::Arc;

use tokio::sync::watch;

/// Cancellation token for a node's background tasks.
///
/// Loops check [`StopSignal::is_stopped`] at the top of each iteration and
/// race their sleeps against [`StopSignal::stopped`].
#[derive(Clone, Debug)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// raise the signal; idempotent
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// resolves once the signal has been raised
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}
