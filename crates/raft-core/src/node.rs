//! # node
//!
//! why: define the raft node state machine and state transitions
//! relations: uses message.rs for rpc types, log.rs for entry management; replication.rs and
//!            snapshot.rs extend RaftNode with the rest of the protocol
//! what: NodeState enum, RaftNode struct, election handling, apply bookkeeping

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::RaftConfig;
use crate::error::RaftError;
use crate::log::RaftLog;
use crate::message::{ApplyMsg, NodeId, RequestVoteArgs, RequestVoteReply};
use crate::persist::{self, PersistentState};

/// The three possible states a Raft node can be in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NodeState {
    /// Passive state - listens for heartbeats, votes when asked
    #[default]
    Follower,
    /// Transitional state - requesting votes to become leader
    Candidate,
    /// Active state - manages log replication, sends heartbeats
    Leader,
}

/// Point-in-time view of a node for callers and tests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub id: NodeId,
    pub state: NodeState,
    pub term: u64,
    pub leader_id: Option<NodeId>,
    pub commit_index: u64,
    pub last_applied: u64,
    pub last_log_index: u64,
    pub snapshot_index: u64,
}

/// A single Raft node in the cluster.
///
/// `RaftNode` does no I/O: handlers mutate state and return the reply to
/// send. Whenever a durable field changes the node marks itself dirty, and
/// the caller must flush [`RaftNode::encode_state`] to storage (see
/// [`RaftNode::take_dirty`]) before releasing the reply.
#[derive(Debug)]
pub struct RaftNode {
    /// Unique identifier for this node
    pub id: NodeId,
    /// Every member of the cluster, including this node
    pub cluster_nodes: Vec<NodeId>,
    pub config: RaftConfig,
    /// Current state (Follower, Candidate, or Leader)
    pub state: NodeState,
    /// Current term number
    pub current_term: u64,
    /// Node ID that received our vote in current term (if any)
    pub voted_for: Option<NodeId>,
    /// Leader this node last accepted replication from in the current term
    pub leader_id: Option<NodeId>,
    pub log: RaftLog,
    /// Highest index known to be committed
    pub commit_index: u64,
    /// Highest index handed to the application
    pub last_applied: u64,
    /// Votes gathered in the current election, self included
    pub votes_received: Vec<NodeId>,
    /// Leader only: next index to send to each follower
    pub next_index: HashMap<NodeId, u64>,
    /// Leader only: highest index known replicated on each follower
    pub match_index: HashMap<NodeId, u64>,
    /// Latest snapshot bytes, covering the log up to `log.snapshot_index()`
    pub snapshot: Vec<u8>,
    /// a snapshot was installed and the application has not been handed it yet
    pub(crate) snapshot_pending: bool,
    dirty: bool,
}

impl RaftNode {
    /// Create a new Raft node in Follower state
    pub fn new(id: NodeId, cluster_nodes: Vec<NodeId>) -> Self {
        Self::with_config(id, cluster_nodes, RaftConfig::default())
    }

    pub fn with_config(id: NodeId, cluster_nodes: Vec<NodeId>, config: RaftConfig) -> Self {
        Self {
            id,
            cluster_nodes,
            config,
            state: NodeState::Follower,
            current_term: 0,
            voted_for: None,
            leader_id: None,
            log: RaftLog::new(),
            commit_index: 0,
            last_applied: 0,
            votes_received: Vec::new(),
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            snapshot: Vec::new(),
            snapshot_pending: false,
            dirty: false,
        }
    }

    // -- persistence --

    /// Load state recovered from storage. Must run before the node serves anything.
    ///
    /// A stored snapshot counts as committed, and is queued for delivery so the
    /// application can rebuild itself from it.
    pub fn restore(&mut self, state: PersistentState, snapshot: Vec<u8>) -> Result<(), RaftError> {
        self.current_term = state.current_term;
        self.voted_for = state.voted_for;
        self.log = state.into_log()?;
        self.snapshot = snapshot;
        self.commit_index = self.log.snapshot_index();
        self.last_applied = 0;
        self.snapshot_pending = self.log.snapshot_index() > 0;
        self.dirty = false;
        info!(
            node = self.id,
            term = self.current_term,
            last_index = self.log.last_index(),
            snapshot_index = self.log.snapshot_index(),
            "restored persisted state"
        );
        Ok(())
    }

    /// the durable fields in their persisted layout
    pub fn persistent_state(&self) -> PersistentState {
        PersistentState {
            current_term: self.current_term,
            voted_for: self.voted_for,
            log: self.log.entries().to_vec(),
            last_included_index: self.log.snapshot_index(),
            last_included_term: self.log.snapshot_term(),
        }
    }

    /// encode the durable fields without cloning the log
    pub fn encode_state(&self) -> Result<Vec<u8>, RaftError> {
        persist::encode(self.current_term, self.voted_for, &self.log)
    }

    /// true if a durable field changed since the last call; clears the flag
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    // -- cluster helpers --

    /// every other member of the cluster
    pub fn peers(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.cluster_nodes.iter().copied().filter(move |p| *p != self.id)
    }

    /// Votes (or replicas) needed for a majority, self included
    pub fn quorum_size(&self) -> usize {
        self.cluster_nodes.len() / 2 + 1
    }

    /// Whether the current election has gathered a majority
    pub fn has_quorum(&self) -> bool {
        self.votes_received.len() >= self.quorum_size()
    }

    pub fn is_leader(&self) -> bool {
        self.state == NodeState::Leader
    }

    pub fn last_log_index(&self) -> u64 {
        self.log.last_index()
    }

    pub fn last_log_term(&self) -> u64 {
        self.log.last_term()
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            id: self.id,
            state: self.state,
            term: self.current_term,
            leader_id: if self.is_leader() { Some(self.id) } else { self.leader_id },
            commit_index: self.commit_index,
            last_applied: self.last_applied,
            last_log_index: self.log.last_index(),
            snapshot_index: self.log.snapshot_index(),
        }
    }

    // -- state transitions --

    /// Step down to follower.
    ///
    /// A higher `term` is adopted and clears the vote. Stepping down within
    /// the same term keeps the vote already cast.
    pub fn become_follower(&mut self, term: u64) {
        if term > self.current_term {
            self.current_term = term;
            self.voted_for = None;
            self.leader_id = None;
            self.mark_dirty();
        }
        if self.state != NodeState::Follower {
            info!(node = self.id, term = self.current_term, from = ?self.state, "stepping down to follower");
        }
        self.state = NodeState::Follower;
        self.votes_received.clear();
        self.next_index.clear();
        self.match_index.clear();
    }

    /// Take over as leader for the current term
    pub fn become_leader(&mut self) {
        info!(node = self.id, term = self.current_term, "became leader");
        self.state = NodeState::Leader;
        self.leader_id = Some(self.id);
        self.votes_received.clear();

        let next = self.log.last_index() + 1;
        let peers: Vec<NodeId> = self.peers().collect();
        self.next_index = peers.iter().map(|p| (*p, next)).collect();
        self.match_index = peers.iter().map(|p| (*p, 0)).collect();
    }

    /// adopt `term` if it is newer; returns true when that forced a step-down
    pub(crate) fn observe_term(&mut self, term: u64) -> bool {
        if term > self.current_term {
            debug!(node = self.id, term = self.current_term, newer = term, "observed newer term");
            self.become_follower(term);
            return true;
        }
        false
    }

    // -- election --

    /// Start a new election: bump the term, vote for self, and build the
    /// request to broadcast. A single-node cluster wins on the spot.
    pub fn start_election(&mut self) -> RequestVoteArgs {
        self.state = NodeState::Candidate;
        self.current_term += 1;
        self.voted_for = Some(self.id);
        self.leader_id = None;
        self.votes_received = vec![self.id];
        self.next_index.clear();
        self.match_index.clear();
        self.mark_dirty();
        info!(node = self.id, term = self.current_term, "starting election");

        let request = RequestVoteArgs {
            term: self.current_term,
            candidate_id: self.id,
            last_log_index: self.log.last_index(),
            last_log_term: self.log.last_term(),
        };

        if self.has_quorum() {
            self.become_leader();
        }
        request
    }

    /// Handle an incoming vote request.
    ///
    /// Returns the reply and whether the election timer should be reset
    /// (only when the vote is granted).
    pub fn handle_vote_request(&mut self, args: RequestVoteArgs) -> (RequestVoteReply, bool) {
        if args.term < self.current_term {
            debug!(node = self.id, term = self.current_term, candidate = args.candidate_id, stale = args.term, "rejecting stale vote request");
            return (RequestVoteReply { term: self.current_term, vote_granted: false }, false);
        }
        self.observe_term(args.term);

        let up_to_date = args.last_log_term > self.log.last_term()
            || (args.last_log_term == self.log.last_term() && args.last_log_index >= self.log.last_index());
        let can_vote = self.voted_for.is_none() || self.voted_for == Some(args.candidate_id);

        if !(can_vote && up_to_date) {
            debug!(
                node = self.id,
                term = self.current_term,
                candidate = args.candidate_id,
                voted_for = ?self.voted_for,
                up_to_date,
                "refusing vote"
            );
            return (RequestVoteReply { term: self.current_term, vote_granted: false }, false);
        }

        if self.voted_for != Some(args.candidate_id) {
            self.voted_for = Some(args.candidate_id);
            self.mark_dirty();
        }
        debug!(node = self.id, term = self.current_term, candidate = args.candidate_id, "granted vote");
        (RequestVoteReply { term: self.current_term, vote_granted: true }, true)
    }

    /// Count a vote reply for the election started in `request_term`.
    ///
    /// Returns true only on the call that makes this node leader.
    pub fn handle_vote_response(&mut self, from: NodeId, request_term: u64, reply: &RequestVoteReply) -> bool {
        if self.observe_term(reply.term) {
            return false;
        }
        if self.state != NodeState::Candidate || request_term != self.current_term {
            return false;
        }
        if reply.vote_granted && !self.votes_received.contains(&from) {
            self.votes_received.push(from);
        }
        if self.has_quorum() {
            self.become_leader();
            return true;
        }
        false
    }

    // -- application delivery --

    /// Everything the application has not been handed yet, in order.
    ///
    /// A freshly installed snapshot is returned alone and first; the entries
    /// after it come on the next call. Nothing is marked applied here, the
    /// caller reports delivery through [`RaftNode::mark_applied`].
    pub fn pending_applies(&mut self) -> Vec<ApplyMsg> {
        if self.snapshot_pending {
            self.snapshot_pending = false;
            return vec![ApplyMsg::Snapshot {
                index: self.log.snapshot_index(),
                term: self.log.snapshot_term(),
                data: self.snapshot.clone(),
            }];
        }

        // anything at or below the snapshot boundary already reached the application
        let start = (self.last_applied + 1).max(self.log.first_index());
        (start..=self.commit_index)
            .filter_map(|index| self.log.get(index))
            .map(|entry| ApplyMsg::Command {
                index: entry.index,
                term: entry.term,
                command: entry.command.clone(),
            })
            .collect()
    }

    /// record that the application has received everything through `index`
    pub fn mark_applied(&mut self, index: u64) {
        if index > self.last_applied {
            self.last_applied = index.min(self.commit_index.max(self.log.snapshot_index()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_node_starts_as_follower() {
        let node = RaftNode::new(1, vec![1, 2, 3]);
        assert_eq!(node.state, NodeState::Follower);
        assert_eq!(node.current_term, 0);
        assert_eq!(node.voted_for, None);
    }

    #[test]
    fn election_marks_state_dirty() {
        let mut node = RaftNode::new(1, vec![1, 2, 3]);
        assert!(!node.take_dirty());
        node.start_election();
        assert!(node.take_dirty());
        assert!(!node.take_dirty());
    }

    #[test]
    fn restore_queues_stored_snapshot() {
        let mut node = RaftNode::new(1, vec![1, 2, 3]);
        let state = PersistentState {
            current_term: 4,
            voted_for: Some(2),
            log: vec![crate::LogEntry::new(4, 8, b"x".to_vec())],
            last_included_index: 7,
            last_included_term: 3,
        };
        node.restore(state, b"snap".to_vec()).unwrap();

        assert_eq!(node.commit_index, 7);
        assert_eq!(
            node.pending_applies(),
            vec![ApplyMsg::Snapshot { index: 7, term: 3, data: b"snap".to_vec() }]
        );
        node.mark_applied(7);
        assert!(node.pending_applies().is_empty());
    }
}
