//! # transport
//!
//! why: keep the driver independent of how rpcs travel between peers
//! relations: implemented by network.rs (in-process), called by election.rs and replicator.rs,
//!            served by the RpcHandler impl in raft.rs
//! what: Transport (outbound), RpcHandler (inbound)

use std::future::Future;

use raft_core::{NodeId, RaftMessage};

/// Outbound half: deliver a request to a peer and wait for its reply.
///
/// `None` means no reply: the peer is down, unreachable, or the message was
/// lost. The driver bounds every call with its rpc budget, so an
/// implementation may also simply never resolve.
pub trait Transport: Send + Sync + 'static {
    fn call(&self, to: NodeId, message: RaftMessage) -> impl Future<Output = Option<RaftMessage>> + Send;
}

/// Inbound half: answer a request addressed to this node.
///
/// Returns `None` for anything that is not a request, and when the node is
/// stopped or halted.
pub trait RpcHandler: Send + Sync {
    fn handle(&self, message: RaftMessage) -> Option<RaftMessage>;
}
