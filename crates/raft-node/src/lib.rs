//! # raft-node
//!
//! why: drive raft-core's pure state machine with timers, rpcs and durable storage
//! relations: depends on raft-core for every protocol decision and raft-storage for persistence
//! what: Raft handle, election timer, per-peer replicators, apply pump, transport seam, local network

mod apply;
mod election;
pub mod network;
mod raft;
mod replicator;
pub mod shutdown;
pub mod transport;

pub use network::{LocalNetwork, LocalTransport};
pub use raft::Raft;
pub use shutdown::StopSignal;
pub use transport::{RpcHandler, Transport};

pub use raft_core::{ApplyMsg, NodeId, NodeState, NodeStatus, RaftConfig, RaftError};
