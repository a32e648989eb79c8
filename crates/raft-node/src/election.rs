//! # election
//!
//! why: turn silence from the leader into a new election, and run that election
//! relations: spawned by raft.rs; hands a won election over to replicator.rs
//! what: run_ticker (randomized election timer), run_election (vote fan-out and tally)

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use raft_core::{NodeState, RaftConfig, RaftMessage, RequestVoteArgs};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::raft::Shared;
use crate::transport::Transport;

/// a fresh timeout, drawn independently for every round
fn election_timeout(config: &RaftConfig) -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(config.election_timeout_range()))
}

/// Fire an election whenever a whole timeout passes without a live leader
/// or a granted vote.
pub(crate) async fn run_ticker<T: Transport>(shared: Arc<Shared<T>>) {
    loop {
        if shared.stop.is_stopped() {
            break;
        }
        let timeout = election_timeout(&shared.config);
        let deadline = shared.lock().last_heartbeat + timeout;

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {}
            _ = shared.stop.stopped() => break,
        }
        if shared.stop.is_stopped() {
            break;
        }

        let (request, won) = {
            let mut state = shared.lock();
            if state.halted {
                break;
            }
            if state.node.is_leader() {
                // leaders never time out; keep the timer from spinning
                state.last_heartbeat = Instant::now();
                continue;
            }
            if state.last_heartbeat + timeout > Instant::now() {
                // heard from a leader or granted a vote while asleep
                continue;
            }
            let snapshot_before = state.node.log.snapshot_index();
            let request = state.node.start_election();
            state.last_heartbeat = Instant::now();
            if shared.persist(&mut state, snapshot_before).is_err() {
                break;
            }
            (request, state.node.is_leader())
        };

        if won {
            // a cluster of one
            shared.spawn_replicators(request.term);
            continue;
        }
        tokio::spawn(run_election(Arc::clone(&shared), request));
    }
    debug!(node = shared.id, "election ticker stopped");
}

/// Ask every peer for its vote in parallel and tally the replies as they
/// arrive. Returns once the election is decided or its term has passed.
pub(crate) async fn run_election<T: Transport>(shared: Arc<Shared<T>>, request: RequestVoteArgs) {
    let mut calls = JoinSet::new();
    for peer in shared.peer_wake.keys().copied() {
        let shared = Arc::clone(&shared);
        let message = RaftMessage::VoteRequest(request.clone());
        calls.spawn(async move { (peer, shared.call(peer, message).await) });
    }

    while let Some(joined) = calls.join_next().await {
        let Ok((peer, Some(RaftMessage::VoteResponse(reply)))) = joined else {
            continue;
        };
        if shared.stop.is_stopped() {
            return;
        }

        let (won, still_running) = {
            let mut state = shared.lock();
            if state.halted {
                return;
            }
            let snapshot_before = state.node.log.snapshot_index();
            let won = state.node.handle_vote_response(peer, request.term, &reply);
            if shared.persist(&mut state, snapshot_before).is_err() {
                return;
            }
            let still_running =
                state.node.state == NodeState::Candidate && state.node.current_term == request.term;
            (won, still_running)
        };

        if won {
            info!(node = shared.id, term = request.term, "won election");
            shared.spawn_replicators(request.term);
            return;
        }
        if !still_running {
            debug!(node = shared.id, term = request.term, "election superseded");
            return;
        }
    }
    debug!(node = shared.id, term = request.term, "election ended without a majority");
}
