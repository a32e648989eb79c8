//! # error
//!
//! why: one error type for everything that can fail outside the protocol itself
//! relations: returned by config.rs, persist.rs, snapshot.rs and the raft-node driver
//! what: RaftError

use thiserror::Error;

/// Failures of a raft node.
///
/// Protocol disagreements (stale terms, log mismatches, refused votes) are
/// never errors; they travel as reply fields.
#[derive(Debug, Error)]
pub enum RaftError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("persisted state codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("persisted state is corrupt: {0}")]
    CorruptState(String),

    #[error("storage failure: {0}")]
    Storage(#[from] std::io::Error),

    /// a previous write to storage failed; the node refuses to go on
    #[error("node halted after a persistence failure")]
    Halted,

    #[error("node has been stopped")]
    Stopped,

    #[error("cannot snapshot at index {index}: commit index is {commit_index}")]
    SnapshotBeyondCommit { index: u64, commit_index: u64 },
}
