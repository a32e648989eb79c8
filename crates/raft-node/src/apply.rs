//! # apply
//!
//! why: hand committed entries to the application exactly once and in order
//! relations: spawned by raft.rs, reads raft-core's pending_applies / mark_applied
//! what: run (the apply pump)

use std::sync::Arc;

use raft_core::ApplyMsg;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::raft::Shared;
use crate::transport::Transport;

/// Drain newly committed entries into `apply_tx` until the node stops.
///
/// Delivery happens outside the lock. `last_applied` moves only after the
/// application's channel accepted the message.
pub(crate) async fn run<T: Transport>(shared: Arc<Shared<T>>, apply_tx: mpsc::Sender<ApplyMsg>) {
    'pump: loop {
        if shared.stop.is_stopped() {
            break;
        }
        let batch = {
            let mut state = shared.lock();
            if state.halted {
                break;
            }
            state.node.pending_applies()
        };

        if batch.is_empty() {
            tokio::select! {
                _ = shared.apply_wake.notified() => {}
                _ = shared.stop.stopped() => break,
            }
            continue;
        }

        for message in batch {
            let index = message.index();
            let sent = tokio::select! {
                sent = apply_tx.send(message) => Some(sent),
                _ = shared.stop.stopped() => None,
            };
            let Some(sent) = sent else {
                break 'pump;
            };
            if sent.is_err() {
                debug!(node = shared.id, "commit stream closed");
                break 'pump;
            }
            trace!(node = shared.id, index, "applied");
            shared.lock().node.mark_applied(index);
        }
    }
    debug!(node = shared.id, "apply pump stopped");
}
