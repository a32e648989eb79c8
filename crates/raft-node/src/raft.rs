//! # raft
//!
//! why: run a raft-core node against real time, a real transport and durable storage
//! relations: wraps raft-core's RaftNode, persists through raft-storage, spawns election.rs,
//!            replicator.rs and apply.rs, serves rpcs through transport.rs
//! what: Raft (application handle), Shared (the lock domain), persistence gate, inbound rpc handling

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use raft_core::{
    ApplyMsg, NodeId, NodeState, NodeStatus, PersistentState, RaftConfig, RaftError, RaftMessage, RaftNode,
};
use raft_storage::Storage;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::shutdown::StopSignal;
use crate::transport::{RpcHandler, Transport};
use crate::{apply, election, replicator};

/// Everything behind the node's single lock
pub(crate) struct State {
    pub(crate) node: RaftNode,
    storage: Box<dyn Storage>,
    /// last time a live leader or a granted vote reset the election timer
    pub(crate) last_heartbeat: Instant,
    /// a write to storage failed; nothing may be served from here on
    pub(crate) halted: bool,
}

impl State {
    fn save(&mut self, with_snapshot: bool) -> Result<(), RaftError> {
        let bytes = self.node.encode_state()?;
        if with_snapshot {
            self.storage.save_state_and_snapshot(&bytes, &self.node.snapshot)?;
        } else {
            self.storage.save_state(&bytes)?;
        }
        Ok(())
    }
}

pub(crate) struct Shared<T> {
    pub(crate) id: NodeId,
    pub(crate) config: RaftConfig,
    state: Mutex<State>,
    pub(crate) transport: T,
    pub(crate) stop: StopSignal,
    /// wakes the apply pump when something new is committed
    pub(crate) apply_wake: Notify,
    /// wakes the replicator of each peer when the leader appends
    pub(crate) peer_wake: HashMap<NodeId, Notify>,
}

impl<T: Transport> Shared<T> {
    pub(crate) fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Flush whatever the last mutation made durable-dirty.
    ///
    /// Must run before the lock is released after any mutation. A storage
    /// failure halts the node for good.
    pub(crate) fn persist(&self, state: &mut State, snapshot_before: u64) -> Result<(), RaftError> {
        if state.halted {
            return Err(RaftError::Halted);
        }
        let snapshot_changed = state.node.log.snapshot_index() != snapshot_before;
        if !state.node.take_dirty() && !snapshot_changed {
            return Ok(());
        }
        if let Err(err) = state.save(snapshot_changed) {
            error!(node = self.id, error = %err, "persisting raft state failed, halting node");
            state.halted = true;
            self.apply_wake.notify_one();
            return Err(err);
        }
        trace!(node = self.id, term = state.node.current_term, with_snapshot = snapshot_changed, "persisted");
        Ok(())
    }

    /// send one rpc, bounded by the rpc budget
    pub(crate) async fn call(&self, to: NodeId, message: RaftMessage) -> Option<RaftMessage> {
        let kind = message.kind();
        match tokio::time::timeout(self.config.rpc_budget(), self.transport.call(to, message)).await {
            Ok(reply) => reply,
            Err(_) => {
                trace!(node = self.id, peer = to, kind, "rpc timed out");
                None
            }
        }
    }

    /// start one replicator per peer for the leadership won in `term`
    pub(crate) fn spawn_replicators(self: &Arc<Self>, term: u64) {
        for peer in self.peer_wake.keys() {
            tokio::spawn(replicator::run(Arc::clone(self), *peer, term));
        }
    }

    pub(crate) fn wake_replicators(&self) {
        for wake in self.peer_wake.values() {
            wake.notify_one();
        }
    }
}

impl<T: Transport> RpcHandler for Shared<T> {
    fn handle(&self, message: RaftMessage) -> Option<RaftMessage> {
        if self.stop.is_stopped() {
            return None;
        }
        let mut state = self.lock();
        if state.halted {
            return None;
        }
        let commit_before = state.node.commit_index;
        let snapshot_before = state.node.log.snapshot_index();

        let (reply, reset_timer) = match message {
            RaftMessage::VoteRequest(args) => {
                let (reply, reset) = state.node.handle_vote_request(args);
                (RaftMessage::VoteResponse(reply), reset)
            }
            RaftMessage::AppendEntries(args) => {
                let (reply, reset) = state.node.handle_append_entries(args);
                (RaftMessage::AppendEntriesResponse(reply), reset)
            }
            RaftMessage::InstallSnapshot(args) => {
                let (reply, reset) = state.node.handle_install_snapshot(args);
                (RaftMessage::InstallSnapshotResponse(reply), reset)
            }
            other => {
                warn!(node = self.id, kind = other.kind(), "ignoring non-request message");
                return None;
            }
        };
        if reset_timer {
            state.last_heartbeat = Instant::now();
        }
        // nothing leaves this node until it is on disk
        self.persist(&mut state, snapshot_before).ok()?;
        if state.node.commit_index != commit_before {
            self.apply_wake.notify_one();
        }
        Some(reply)
    }
}

/// A running raft node.
///
/// Cheap to clone. Dropping every handle does not stop the node; call
/// [`Raft::kill`].
pub struct Raft<T: Transport> {
    shared: Arc<Shared<T>>,
}

impl<T: Transport> Clone for Raft<T> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<T: Transport> Raft<T> {
    /// Restore node `id` from `storage` and start its background tasks.
    ///
    /// Committed entries (and installed snapshots) are delivered on
    /// `apply_tx` in log order. A stored snapshot is delivered first.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        id: NodeId,
        cluster_nodes: Vec<NodeId>,
        config: RaftConfig,
        storage: impl Storage + 'static,
        transport: T,
        apply_tx: mpsc::Sender<ApplyMsg>,
    ) -> Result<Self, RaftError> {
        config.validate()?;
        if !cluster_nodes.contains(&id) {
            return Err(RaftError::InvalidConfig(format!("node {id} is not in cluster {cluster_nodes:?}")));
        }

        let persisted = PersistentState::decode(&storage.read_state()?)?;
        let snapshot = storage.read_snapshot()?;
        let mut node = RaftNode::with_config(id, cluster_nodes, config.clone());
        node.restore(persisted, snapshot)?;

        let peer_wake = node.peers().map(|peer| (peer, Notify::new())).collect();
        let shared = Arc::new(Shared {
            id,
            config,
            state: Mutex::new(State {
                node,
                storage: Box::new(storage),
                last_heartbeat: Instant::now(),
                halted: false,
            }),
            transport,
            stop: StopSignal::new(),
            apply_wake: Notify::new(),
            peer_wake,
        });

        tokio::spawn(election::run_ticker(Arc::clone(&shared)));
        tokio::spawn(apply::run(Arc::clone(&shared), apply_tx));
        // a restored snapshot is already waiting for the pump
        shared.apply_wake.notify_one();
        info!(node = id, "raft node started");
        Ok(Self { shared })
    }

    pub fn id(&self) -> NodeId {
        self.shared.id
    }

    /// Propose `command`.
    ///
    /// Returns `(index, term, is_leader)`. On a non-leader (or a killed node)
    /// nothing is appended and `is_leader` is false. There is no guarantee
    /// the entry ever commits.
    pub fn start(&self, command: Vec<u8>) -> Result<(u64, u64, bool), RaftError> {
        let (index, term) = {
            let mut state = self.shared.lock();
            if state.halted {
                return Err(RaftError::Halted);
            }
            let term = state.node.current_term;
            if self.shared.stop.is_stopped() {
                return Ok((0, term, false));
            }
            let snapshot_before = state.node.log.snapshot_index();
            let commit_before = state.node.commit_index;
            let Some((index, term)) = state.node.propose(command) else {
                return Ok((0, term, false));
            };
            self.shared.persist(&mut state, snapshot_before)?;
            if state.node.commit_index != commit_before {
                self.shared.apply_wake.notify_one();
            }
            (index, term)
        };
        debug!(node = self.shared.id, index, term, "accepted command");
        self.shared.wake_replicators();
        Ok((index, term, true))
    }

    /// Current term and whether this node believes it is leader.
    ///
    /// A halted node never claims leadership: the term it would lead may
    /// not have reached disk.
    pub fn get_state(&self) -> (u64, bool) {
        let state = self.shared.lock();
        (state.node.current_term, !state.halted && state.node.is_leader())
    }

    /// The application has captured its state through `index` in `data`;
    /// compact the log up to there. Refused once the node is killed.
    pub fn snapshot(&self, index: u64, data: Vec<u8>) -> Result<(), RaftError> {
        let mut state = self.shared.lock();
        if state.halted {
            return Err(RaftError::Halted);
        }
        if self.shared.stop.is_stopped() {
            return Err(RaftError::Stopped);
        }
        let snapshot_before = state.node.log.snapshot_index();
        state.node.snapshot(index, data)?;
        self.shared.persist(&mut state, snapshot_before)
    }

    /// Whether the application may switch to the snapshot `(term, index)`.
    /// False once the node has moved past it.
    pub fn cond_install_snapshot(&self, term: u64, index: u64, data: Vec<u8>) -> bool {
        let mut state = self.shared.lock();
        if state.halted {
            return false;
        }
        let snapshot_before = state.node.log.snapshot_index();
        let installed = state.node.cond_install_snapshot(term, index, data);
        installed && self.shared.persist(&mut state, snapshot_before).is_ok()
    }

    /// Stop every background task. In-flight rpc handlers finish; later
    /// ones get no reply.
    pub fn kill(&self) {
        info!(node = self.shared.id, "stopping raft node");
        self.shared.stop.stop();
        self.shared.apply_wake.notify_one();
    }

    pub fn is_killed(&self) -> bool {
        self.shared.stop.is_stopped()
    }

    /// whether a storage failure has halted this node
    pub fn is_halted(&self) -> bool {
        self.shared.lock().halted
    }

    pub fn status(&self) -> NodeStatus {
        let state = self.shared.lock();
        let mut status = state.node.status();
        if state.halted && status.state == NodeState::Leader {
            status.state = NodeState::Follower;
            status.leader_id = None;
        }
        status
    }

    /// bytes of persisted raft state, for deciding when to snapshot
    pub fn persisted_state_size(&self) -> Result<u64, RaftError> {
        Ok(self.shared.lock().storage.state_size()?)
    }

    /// the handler a transport should route this node's inbound rpcs to
    pub fn rpc_handler(&self) -> Arc<dyn RpcHandler> {
        self.shared.clone()
    }
}
