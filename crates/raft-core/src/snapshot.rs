//! # snapshot
//!
//! why: compact the log and bring far-behind followers up to date with a snapshot
//! relations: extends node.rs; replication.rs hands over to InstallSnapshot when a peer lags
//!            past the compacted prefix
//! what: application-driven compaction, InstallSnapshot on both sides, conditional install

use tracing::{debug, info};

use crate::error::RaftError;
use crate::message::{InstallSnapshotArgs, InstallSnapshotReply, NodeId};
use crate::node::{NodeState, RaftNode};

impl RaftNode {
    /// The application has captured its state through `index`: fold the log
    /// up to there into `data`.
    ///
    /// An index at or below the current snapshot is ignored; one past the
    /// commit index is refused.
    pub fn snapshot(&mut self, index: u64, data: Vec<u8>) -> Result<(), RaftError> {
        if index <= self.log.snapshot_index() {
            debug!(node = self.id, index, snapshot_index = self.log.snapshot_index(), "ignoring stale snapshot");
            return Ok(());
        }
        if index > self.commit_index {
            return Err(RaftError::SnapshotBeyondCommit { index, commit_index: self.commit_index });
        }
        let term = self
            .log
            .term_at(index)
            .ok_or_else(|| RaftError::CorruptState(format!("committed index {index} missing from log")))?;

        self.log.compact_to(index, term);
        self.snapshot = data;
        self.mark_dirty();
        info!(node = self.id, index, term, retained = self.log.len(), "compacted log");
        Ok(())
    }

    /// Handle an incoming InstallSnapshot.
    ///
    /// A snapshot that is newer than the commit index replaces the log up to
    /// its boundary (a consistent suffix survives) and is queued for the
    /// application. Returns the reply and whether to reset the election timer.
    pub fn handle_install_snapshot(&mut self, args: InstallSnapshotArgs) -> (InstallSnapshotReply, bool) {
        if args.term < self.current_term {
            debug!(node = self.id, term = self.current_term, leader = args.leader_id, stale = args.term, "rejecting stale snapshot");
            return (InstallSnapshotReply { term: self.current_term }, false);
        }
        if args.term > self.current_term || self.state != NodeState::Follower {
            self.become_follower(args.term);
        }
        self.leader_id = Some(args.leader_id);
        let reply = InstallSnapshotReply { term: self.current_term };

        if args.last_included_index <= self.commit_index {
            debug!(node = self.id, index = args.last_included_index, commit = self.commit_index, "snapshot already covered");
            return (reply, true);
        }

        self.install(args.last_included_index, args.last_included_term, args.data);
        (reply, true)
    }

    fn install(&mut self, index: u64, term: u64, data: Vec<u8>) {
        if self.log.term_at(index) == Some(term) {
            self.log.compact_to(index, term);
        } else {
            self.log.reset_to(index, term);
        }
        self.snapshot = data;
        self.commit_index = self.commit_index.max(index);
        self.snapshot_pending = true;
        self.mark_dirty();
        info!(node = self.id, index, term, retained = self.log.len(), "installed snapshot");
    }

    /// Handle the reply to an InstallSnapshot this node sent to `from`.
    /// Returns true when the commit index moved.
    pub fn handle_install_snapshot_response(
        &mut self,
        from: NodeId,
        args: &InstallSnapshotArgs,
        reply: &InstallSnapshotReply,
    ) -> bool {
        if self.observe_term(reply.term) {
            return false;
        }
        if self.state != NodeState::Leader || args.term != self.current_term {
            return false;
        }
        let matched = self.match_index.get(&from).copied().unwrap_or(0).max(args.last_included_index);
        self.match_index.insert(from, matched);
        let next = self.next_index.get(&from).copied().unwrap_or(0).max(matched + 1);
        self.next_index.insert(from, next);
        self.advance_commit_index()
    }

    /// Whether the application may switch to the snapshot `(term, index)` it
    /// was handed.
    ///
    /// True for the snapshot the node currently holds. False when the node
    /// has since moved past it (a newer snapshot, or commits beyond `index`).
    /// A snapshot the node has never seen is installed here if it is still
    /// ahead of the commit index.
    pub fn cond_install_snapshot(&mut self, term: u64, index: u64, data: Vec<u8>) -> bool {
        if index == self.log.snapshot_index() {
            return term == self.log.snapshot_term();
        }
        if index < self.log.snapshot_index() || index <= self.commit_index {
            debug!(node = self.id, index, snapshot_index = self.log.snapshot_index(), commit = self.commit_index, "declining superseded snapshot");
            return false;
        }
        self.install(index, term, data);
        // the application already holds this snapshot
        self.snapshot_pending = false;
        self.last_applied = index;
        true
    }
}
