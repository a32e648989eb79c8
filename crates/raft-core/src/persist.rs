//! # persist
//!
//! why: the durable half of a node's state, in the layout the node owns
//! relations: written by the raft-node driver after every durable mutation of node.rs
//! what: PersistentState and its json codec

use serde::{Deserialize, Serialize};

use crate::error::RaftError;
use crate::log::{LogEntry, RaftLog};
use crate::message::NodeId;

/// Everything a node must recover after a crash, minus the snapshot bytes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentState {
    pub current_term: u64,
    pub voted_for: Option<NodeId>,
    pub log: Vec<LogEntry>,
    pub last_included_index: u64,
    pub last_included_term: u64,
}

/// borrowed twin of PersistentState so encoding does not clone the log
#[derive(Serialize)]
struct PersistentStateRef<'a> {
    current_term: u64,
    voted_for: Option<NodeId>,
    log: &'a [LogEntry],
    last_included_index: u64,
    last_included_term: u64,
}

impl PersistentState {
    /// decode a blob read from storage; an empty blob means a fresh node
    pub fn decode(bytes: &[u8]) -> Result<Self, RaftError> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn encode(&self) -> Result<Vec<u8>, RaftError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// rebuild the log, validating index contiguity
    pub fn into_log(self) -> Result<RaftLog, RaftError> {
        RaftLog::from_parts(self.last_included_index, self.last_included_term, self.log)
    }
}

/// encode the durable fields straight from a live log
pub(crate) fn encode(
    current_term: u64,
    voted_for: Option<NodeId>,
    log: &RaftLog,
) -> Result<Vec<u8>, RaftError> {
    let view = PersistentStateRef {
        current_term,
        voted_for,
        log: log.entries(),
        last_included_index: log.snapshot_index(),
        last_included_term: log.snapshot_term(),
    };
    Ok(serde_json::to_vec(&view)?)
}
