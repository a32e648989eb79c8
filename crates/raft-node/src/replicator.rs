//! # replicator
//!
//! why: keep one follower's log in step with the leader's
//! relations: spawned by election.rs when a term is won, woken by raft.rs on new proposals
//! what: run (per-peer heartbeat / AppendEntries / InstallSnapshot loop)

use std::sync::Arc;

use raft_core::{NodeId, RaftMessage};
use tracing::{debug, warn};

use crate::raft::Shared;
use crate::transport::Transport;

/// Replicate to `peer` for as long as this node leads `term`.
///
/// One request is in flight at a time. A lost or timed-out request is
/// retried on the next heartbeat; a reply that moves `next_index` and
/// leaves entries to send is followed up at once.
pub(crate) async fn run<T: Transport>(shared: Arc<Shared<T>>, peer: NodeId, term: u64) {
    let Some(wake) = shared.peer_wake.get(&peer) else {
        return;
    };
    debug!(node = shared.id, peer, term, "replicator started");

    loop {
        if shared.stop.is_stopped() {
            break;
        }
        let message = {
            let state = shared.lock();
            if state.halted || !state.node.is_leader() || state.node.current_term != term {
                break;
            }
            state.node.replication_message(peer)
        };
        let Some(message) = message else {
            break;
        };

        let reply = shared.call(peer, message.clone()).await;
        if shared.stop.is_stopped() {
            break;
        }

        let follow_up = match reply {
            Some(reply) => {
                let mut state = shared.lock();
                if state.halted {
                    break;
                }
                let commit_before = state.node.commit_index;
                let snapshot_before = state.node.log.snapshot_index();
                let next_before = state.node.next_index.get(&peer).copied();

                match (&message, &reply) {
                    (RaftMessage::AppendEntries(args), RaftMessage::AppendEntriesResponse(reply)) => {
                        state.node.handle_append_entries_response(peer, args, reply);
                    }
                    (RaftMessage::InstallSnapshot(args), RaftMessage::InstallSnapshotResponse(reply)) => {
                        state.node.handle_install_snapshot_response(peer, args, reply);
                    }
                    _ => warn!(node = shared.id, peer, sent = message.kind(), got = reply.kind(), "mismatched reply"),
                }
                if shared.persist(&mut state, snapshot_before).is_err() {
                    break;
                }
                if state.node.commit_index != commit_before {
                    shared.apply_wake.notify_one();
                    // let followers learn the new commit index without waiting a heartbeat
                    shared.wake_replicators();
                }

                let next_after = state.node.next_index.get(&peer).copied();
                state.node.is_leader()
                    && next_after != next_before
                    && next_after.is_some_and(|next| next <= state.node.log.last_index())
            }
            None => false,
        };
        if follow_up {
            continue;
        }

        tokio::select! {
            _ = tokio::time::sleep(shared.config.heartbeat()) => {}
            _ = wake.notified() => {}
            _ = shared.stop.stopped() => break,
        }
    }
    debug!(node = shared.id, peer, term, "replicator stopped");
}
