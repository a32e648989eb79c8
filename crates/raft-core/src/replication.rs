//! # replication
//!
//! why: move log entries from the leader to followers and decide what is committed
//! relations: extends node.rs; snapshot.rs takes over when a follower lags past the compacted prefix
//! what: proposals, outbound replication messages, AppendEntries handling on both sides, commit advancement

use tracing::{debug, trace};

use crate::log::LogEntry;
use crate::message::{
    AppendEntriesArgs, AppendEntriesReply, InstallSnapshotArgs, NodeId, RaftMessage,
};
use crate::node::{NodeState, RaftNode};

impl RaftNode {
    /// Append `command` to the log if this node is leader.
    ///
    /// Returns the index and term the entry will occupy if it ever commits.
    pub fn propose(&mut self, command: Vec<u8>) -> Option<(u64, u64)> {
        if !self.is_leader() {
            return None;
        }
        let index = self.log.append(self.current_term, command);
        self.mark_dirty();
        trace!(node = self.id, term = self.current_term, index, "appended proposal");
        // a lone node is its own majority
        self.advance_commit_index();
        Some((index, self.current_term))
    }

    /// Build the next replication message for `peer`: AppendEntries with
    /// everything from `next_index[peer]` on, or InstallSnapshot when that
    /// entry has been compacted away. None unless leader.
    pub fn replication_message(&self, peer: NodeId) -> Option<RaftMessage> {
        if !self.is_leader() {
            return None;
        }
        let next = self
            .next_index
            .get(&peer)
            .copied()
            .unwrap_or(self.log.last_index() + 1)
            .clamp(1, self.log.last_index() + 1);

        if next <= self.log.snapshot_index() {
            return Some(RaftMessage::InstallSnapshot(InstallSnapshotArgs {
                term: self.current_term,
                leader_id: self.id,
                last_included_index: self.log.snapshot_index(),
                last_included_term: self.log.snapshot_term(),
                data: self.snapshot.clone(),
            }));
        }

        let prev_log_index = next - 1;
        Some(RaftMessage::AppendEntries(AppendEntriesArgs {
            term: self.current_term,
            leader_id: self.id,
            prev_log_index,
            prev_log_term: self.log.term_at(prev_log_index).unwrap_or(0),
            entries: self.log.entries_from(next),
            leader_commit: self.commit_index,
        }))
    }

    /// Handle an incoming AppendEntries.
    ///
    /// Returns the reply and whether the election timer should be reset
    /// (any request from a current leader resets it, even a rejected one).
    pub fn handle_append_entries(&mut self, args: AppendEntriesArgs) -> (AppendEntriesReply, bool) {
        if args.term < self.current_term {
            debug!(node = self.id, term = self.current_term, leader = args.leader_id, stale = args.term, "rejecting stale append entries");
            return (AppendEntriesReply::rejected(self.current_term), false);
        }
        if args.term > self.current_term || self.state != NodeState::Follower {
            self.become_follower(args.term);
        }
        self.leader_id = Some(args.leader_id);

        if let Some(reply) = self.check_log_consistency(&args) {
            return (reply, true);
        }

        let last_new = args.last_index();
        self.merge_entries(args.prev_log_index, args.entries);

        if args.leader_commit > self.commit_index {
            let commit = args.leader_commit.min(last_new);
            if commit > self.commit_index {
                trace!(node = self.id, commit, "follower commit advanced");
                self.commit_index = commit;
            }
        }
        (AppendEntriesReply::accepted(self.current_term), true)
    }

    /// None when the log holds `prev_log_index` with `prev_log_term`,
    /// otherwise the rejection carrying conflict hints
    fn check_log_consistency(&self, args: &AppendEntriesArgs) -> Option<AppendEntriesReply> {
        let mut reply = AppendEntriesReply::rejected(self.current_term);

        if args.prev_log_index < self.log.snapshot_index() {
            // the prefix is already folded into our snapshot, resume right after it
            reply.conflict_index = Some(self.log.snapshot_index() + 1);
            return Some(reply);
        }

        match self.log.term_at(args.prev_log_index) {
            None => {
                reply.conflict_index = Some(self.log.last_index() + 1);
                debug!(node = self.id, prev = args.prev_log_index, last = self.log.last_index(), "log too short");
                Some(reply)
            }
            Some(term) if term != args.prev_log_term => {
                reply.conflict_term = Some(term);
                reply.conflict_index = Some(self.log.first_index_of_term_run(args.prev_log_index, term));
                debug!(node = self.id, prev = args.prev_log_index, term, expected = args.prev_log_term, "log term mismatch");
                Some(reply)
            }
            Some(_) => None,
        }
    }

    /// Merge entries that follow `prev_log_index`: matching entries stay,
    /// the first conflicting one truncates the rest, missing ones append.
    fn merge_entries(&mut self, prev_log_index: u64, entries: Vec<LogEntry>) {
        let mut first_new = None;
        for (offset, entry) in entries.iter().enumerate() {
            let index = prev_log_index + 1 + offset as u64;
            match self.log.term_at(index) {
                Some(term) if term == entry.term => continue,
                Some(_) => {
                    debug_assert!(index > self.commit_index, "committed entry {index} would be overwritten");
                    debug!(node = self.id, index, "truncating conflicting suffix");
                    self.log.truncate_from(index);
                }
                None => {}
            }
            first_new = Some(offset);
            break;
        }

        let Some(offset) = first_new else { return };
        for entry in entries.into_iter().skip(offset) {
            self.log.push(entry);
        }
        self.mark_dirty();
    }

    /// Handle the reply to an AppendEntries this node sent to `from`.
    ///
    /// Replies from a superseded term or role are ignored. Returns true when
    /// the commit index moved.
    pub fn handle_append_entries_response(
        &mut self,
        from: NodeId,
        args: &AppendEntriesArgs,
        reply: &AppendEntriesReply,
    ) -> bool {
        if self.observe_term(reply.term) {
            return false;
        }
        if self.state != NodeState::Leader || args.term != self.current_term {
            return false;
        }

        if reply.success {
            let matched = args.last_index();
            let current = self.match_index.get(&from).copied().unwrap_or(0);
            if matched >= current {
                self.match_index.insert(from, matched);
                self.next_index.insert(from, matched + 1);
            }
            return self.advance_commit_index();
        }

        // an older round's failure must not undo newer progress
        if self.next_index.get(&from).copied() != Some(args.prev_log_index + 1) {
            return false;
        }
        let next = match (reply.conflict_term, reply.conflict_index) {
            (Some(term), Some(index)) => self.log.last_index_of_term(term).map_or(index, |last| last + 1),
            (None, Some(index)) => index,
            _ => args.prev_log_index,
        };
        let next = next.clamp(1, self.log.last_index() + 1);
        debug!(node = self.id, peer = from, from_index = args.prev_log_index + 1, next, "backing off next index");
        self.next_index.insert(from, next);
        false
    }

    /// Commit the highest index stored on a majority whose entry belongs to
    /// the current term; earlier terms commit only by being below it.
    pub fn advance_commit_index(&mut self) -> bool {
        if self.state != NodeState::Leader {
            return false;
        }
        let mut index = self.log.last_index();
        while index > self.commit_index {
            if self.log.term_at(index) != Some(self.current_term) {
                // terms only decrease walking backwards
                break;
            }
            let replicas = 1 + self.match_index.values().filter(|m| **m >= index).count();
            if replicas >= self.quorum_size() {
                debug!(node = self.id, term = self.current_term, commit = index, "leader commit advanced");
                self.commit_index = index;
                return true;
            }
            index -= 1;
        }
        false
    }
}
