//! # network
//!
//! why: run whole clusters inside one process, with the faults a real network has
//! relations: implements transport.rs; nodes register their RpcHandler from raft.rs
//! what: LocalNetwork (registry, partitions, loss and delay), LocalTransport

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::Rng;
use raft_core::{NodeId, RaftMessage};
use tracing::trace;

use crate::transport::{RpcHandler, Transport};

/// chance that an unreliable network drops a request, and separately its reply
const LOSS_RATE: f64 = 0.1;
/// upper bound of the extra latency an unreliable network adds, in ms
const MAX_DELAY_MS: u64 = 27;

#[derive(Default)]
struct NetworkState {
    handlers: HashMap<NodeId, Arc<dyn RpcHandler>>,
    disconnected: HashSet<NodeId>,
    unreliable: bool,
    rpc_count: u64,
}

impl NetworkState {
    fn link_up(&self, from: NodeId, to: NodeId) -> bool {
        !self.disconnected.contains(&from) && !self.disconnected.contains(&to)
    }
}

/// An in-process network connecting any number of nodes.
///
/// Cheap to clone; clones share the same registry. A node is reachable once
/// its handler is registered and while it is connected. Messages between a
/// disconnected node and anybody else are lost in both directions.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// the transport node `id` uses to reach its peers
    pub fn transport(&self, id: NodeId) -> LocalTransport {
        LocalTransport { id, network: self.clone() }
    }

    /// route requests for `id` to `handler`, replacing any earlier one (a restart)
    pub fn register(&self, id: NodeId, handler: Arc<dyn RpcHandler>) {
        self.lock().handlers.insert(id, handler);
    }

    /// make `id` unreachable until it registers again
    pub fn unregister(&self, id: NodeId) {
        self.lock().handlers.remove(&id);
    }

    pub fn connect(&self, id: NodeId) {
        self.lock().disconnected.remove(&id);
    }

    pub fn disconnect(&self, id: NodeId) {
        self.lock().disconnected.insert(id);
    }

    pub fn is_connected(&self, id: NodeId) -> bool {
        !self.lock().disconnected.contains(&id)
    }

    /// an unreliable network delays every message a little and loses some
    pub fn set_reliable(&self, reliable: bool) {
        self.lock().unreliable = !reliable;
    }

    /// number of calls attempted so far, delivered or not
    pub fn rpc_count(&self) -> u64 {
        self.lock().rpc_count
    }

    async fn deliver(&self, from: NodeId, to: NodeId, message: RaftMessage) -> Option<RaftMessage> {
        let (handler, unreliable) = {
            let mut state = self.lock();
            state.rpc_count += 1;
            if !state.link_up(from, to) {
                trace!(from, to, kind = message.kind(), "link down, request lost");
                return None;
            }
            (state.handlers.get(&to).cloned(), state.unreliable)
        };
        let handler = handler?;
        trace!(from, to, kind = message.kind(), term = message.term(), "delivering");

        if unreliable {
            let (delay, lose_request) = {
                let mut rng = rand::thread_rng();
                (rng.gen_range(0..=MAX_DELAY_MS), rng.gen_bool(LOSS_RATE))
            };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            if lose_request {
                trace!(from, to, kind = message.kind(), "request dropped");
                return None;
            }
        }

        let reply = handler.handle(message)?;

        if unreliable && rand::thread_rng().gen_bool(LOSS_RATE) {
            trace!(from, to, kind = reply.kind(), "reply dropped");
            return None;
        }
        // the link may have gone down while the request was being served
        if !self.lock().link_up(from, to) {
            return None;
        }
        Some(reply)
    }
}

/// A node's handle onto a [`LocalNetwork`]
#[derive(Clone)]
pub struct LocalTransport {
    id: NodeId,
    network: LocalNetwork,
}

impl Transport for LocalTransport {
    fn call(
        &self,
        to: NodeId,
        message: RaftMessage,
    ) -> impl std::future::Future<Output = Option<RaftMessage>> + Send {
        let network = self.network.clone();
        let from = self.id;
        async move { network.deliver(from, to, message).await }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raft_core::{RequestVoteArgs, RequestVoteReply};

    /// grants every vote and counts the requests it sees
    struct Echo {
        seen: Mutex<u64>,
    }

    impl RpcHandler for Echo {
        fn handle(&self, message: RaftMessage) -> Option<RaftMessage> {
            *self.seen.lock().unwrap() += 1;
            match message {
                RaftMessage::VoteRequest(args) => Some(RaftMessage::VoteResponse(RequestVoteReply {
                    term: args.term,
                    vote_granted: true,
                })),
                _ => None,
            }
        }
    }

    fn vote(term: u64) -> RaftMessage {
        RaftMessage::VoteRequest(RequestVoteArgs { term, candidate_id: 1, last_log_index: 0, last_log_term: 0 })
    }

    #[tokio::test]
    async fn delivers_to_registered_handler() {
        let network = LocalNetwork::new();
        let echo = Arc::new(Echo { seen: Mutex::new(0) });
        network.register(2, echo.clone());

        let reply = network.transport(1).call(2, vote(3)).await;

        assert!(matches!(reply, Some(RaftMessage::VoteResponse(r)) if r.term == 3 && r.vote_granted));
        assert_eq!(*echo.seen.lock().unwrap(), 1);
        assert_eq!(network.rpc_count(), 1);
    }

    #[tokio::test]
    async fn disconnected_node_is_unreachable_both_ways() {
        let network = LocalNetwork::new();
        let echo = Arc::new(Echo { seen: Mutex::new(0) });
        network.register(1, echo.clone());
        network.register(2, echo.clone());

        network.disconnect(2);
        assert!(network.transport(1).call(2, vote(1)).await.is_none());
        assert!(network.transport(2).call(1, vote(1)).await.is_none());
        assert_eq!(*echo.seen.lock().unwrap(), 0);
        assert_eq!(network.rpc_count(), 2);

        network.connect(2);
        assert!(network.transport(1).call(2, vote(1)).await.is_some());
    }

    #[tokio::test]
    async fn unknown_node_gets_no_reply() {
        let network = LocalNetwork::new();
        assert!(network.transport(1).call(9, vote(1)).await.is_none());
    }

    #[tokio::test]
    async fn unreliable_network_loses_some_messages() {
        let network = LocalNetwork::new();
        network.register(2, Arc::new(Echo { seen: Mutex::new(0) }));
        network.set_reliable(false);

        let transport = network.transport(1);
        let mut answered = 0;
        for term in 0..100 {
            if transport.call(2, vote(term)).await.is_some() {
                answered += 1;
            }
        }

        assert!(answered < 100, "some messages should be lost");
        assert!(answered > 50, "most messages should arrive");
    }
}
