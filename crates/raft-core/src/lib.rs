//! # raft-core
//!
//! why: implement the core raft consensus algorithm in pure, portable rust
//! relations: driven by raft-node (timers, transport, storage), persisted through raft-storage
//! what: state machine, election logic, log replication, snapshots, persisted-state codec

pub mod config;
pub mod error;
pub mod log;
pub mod message;
pub mod node;
pub mod persist;
mod replication;
mod snapshot;

pub use config::RaftConfig;
pub use error::RaftError;
pub use log::{LogEntry, RaftLog};
pub use message::{
    AppendEntriesArgs, AppendEntriesReply, ApplyMsg, InstallSnapshotArgs, InstallSnapshotReply,
    NodeId, RaftMessage, RequestVoteArgs, RequestVoteReply,
};
pub use node::{NodeState, NodeStatus, RaftNode};
pub use persist::PersistentState;
