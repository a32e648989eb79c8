//! # message
//!
//! why: define all raft rpc message types for node communication
//! relations: produced and consumed by node.rs, carried by the transport in raft-node
//! what: RequestVote, AppendEntries, InstallSnapshot request/reply pairs, ApplyMsg for the commit stream

use serde::{Deserialize, Serialize};

use crate::log::LogEntry;

/// Identifier of a peer in the cluster
pub type NodeId = u64;

/// Request a vote during leader election
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestVoteArgs {
    pub term: u64,
    pub candidate_id: NodeId,
    pub last_log_index: u64,
    pub last_log_term: u64,
}

/// Response to a vote request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestVoteReply {
    pub term: u64,
    pub vote_granted: bool,
}

/// Replicate log entries (also serves as heartbeat when entries is empty)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesArgs {
    pub term: u64,
    pub leader_id: NodeId,
    pub prev_log_index: u64,
    pub prev_log_term: u64,
    pub entries: Vec<LogEntry>,
    pub leader_commit: u64,
}

impl AppendEntriesArgs {
    /// true when the request carries no entries
    pub fn is_heartbeat(&self) -> bool {
        self.entries.is_empty()
    }

    /// index of the last entry this request covers
    pub fn last_index(&self) -> u64 {
        self.prev_log_index + self.entries.len() as u64
    }
}

/// Response to AppendEntries
///
/// On a log mismatch the follower fills in the conflict hints so the leader
/// can skip a whole divergent term instead of walking back one entry at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesReply {
    pub term: u64,
    pub success: bool,
    /// term of the follower's entry at prev_log_index, if it has one
    pub conflict_term: Option<u64>,
    /// first index the leader should try next
    pub conflict_index: Option<u64>,
}

impl AppendEntriesReply {
    pub(crate) fn accepted(term: u64) -> Self {
        Self { term, success: true, conflict_term: None, conflict_index: None }
    }

    pub(crate) fn rejected(term: u64) -> Self {
        Self { term, success: false, conflict_term: None, conflict_index: None }
    }
}

/// Ship a snapshot to a follower whose next entry was already compacted away
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallSnapshotArgs {
    pub term: u64,
    pub leader_id: NodeId,
    pub last_included_index: u64,
    pub last_included_term: u64,
    pub data: Vec<u8>,
}

/// Response to InstallSnapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallSnapshotReply {
    pub term: u64,
}

/// All possible Raft messages between nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaftMessage {
    VoteRequest(RequestVoteArgs),
    VoteResponse(RequestVoteReply),
    AppendEntries(AppendEntriesArgs),
    AppendEntriesResponse(AppendEntriesReply),
    InstallSnapshot(InstallSnapshotArgs),
    InstallSnapshotResponse(InstallSnapshotReply),
}

impl RaftMessage {
    /// the sender's term carried by every message
    pub fn term(&self) -> u64 {
        match self {
            Self::VoteRequest(m) => m.term,
            Self::VoteResponse(m) => m.term,
            Self::AppendEntries(m) => m.term,
            Self::AppendEntriesResponse(m) => m.term,
            Self::InstallSnapshot(m) => m.term,
            Self::InstallSnapshotResponse(m) => m.term,
        }
    }

    /// short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::VoteRequest(_) => "vote_request",
            Self::VoteResponse(_) => "vote_response",
            Self::AppendEntries(_) => "append_entries",
            Self::AppendEntriesResponse(_) => "append_entries_response",
            Self::InstallSnapshot(_) => "install_snapshot",
            Self::InstallSnapshotResponse(_) => "install_snapshot_response",
        }
    }
}

/// A message on the commit stream handed to the application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyMsg {
    /// a newly committed command
    Command { index: u64, term: u64, command: Vec<u8> },
    /// an installed snapshot covering everything through `index`
    Snapshot { index: u64, term: u64, data: Vec<u8> },
}

impl ApplyMsg {
    /// log index this message brings the application up to
    pub fn index(&self) -> u64 {
        match self {
            Self::Command { index, .. } | Self::Snapshot { index, .. } => *index,
        }
    }
}
