//! # log
//!
//! why: manage the replicated log of commands, including the prefix folded into a snapshot
//! relations: owned by node.rs, shipped inside message.rs rpcs, persisted through persist.rs
//! what: LogEntry, RaftLog (1-indexed, offset by the snapshot boundary)

use serde::{Deserialize, Serialize};

use crate::error::RaftError;

/// A single entry in the replicated log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// The term when this entry was created
    pub term: u64,
    /// The index of this entry in the log (1-indexed)
    pub index: u64,
    /// The command to be applied to the state machine
    pub command: Vec<u8>,
}

impl LogEntry {
    /// Create a new log entry
    pub fn new(term: u64, index: u64, command: Vec<u8>) -> Self {
        Self { term, index, command }
    }
}

/// The in-memory log of a node.
///
/// Retained entries cover `snapshot_index + 1 ..= last_index()`. Everything at
/// or below `snapshot_index` exists only inside the snapshot, of which the log
/// remembers the boundary index and term.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RaftLog {
    entries: Vec<LogEntry>,
    snapshot_index: u64,
    snapshot_term: u64,
}

impl RaftLog {
    /// create an empty log starting at index 1
    pub fn new() -> Self {
        Self::default()
    }

    /// rebuild a log from persisted parts, checking that indices are contiguous
    pub fn from_parts(
        snapshot_index: u64,
        snapshot_term: u64,
        entries: Vec<LogEntry>,
    ) -> Result<Self, RaftError> {
        for (offset, entry) in entries.iter().enumerate() {
            let expected = snapshot_index + 1 + offset as u64;
            if entry.index != expected {
                return Err(RaftError::CorruptState(format!(
                    "log entry at position {offset} has index {}, expected {expected}",
                    entry.index
                )));
            }
        }
        Ok(Self { entries, snapshot_index, snapshot_term })
    }

    /// index of the last entry folded into the snapshot (0 if none)
    pub fn snapshot_index(&self) -> u64 {
        self.snapshot_index
    }

    /// term of the last entry folded into the snapshot (0 if none)
    pub fn snapshot_term(&self) -> u64 {
        self.snapshot_term
    }

    /// index of the first retained entry
    pub fn first_index(&self) -> u64 {
        self.snapshot_index + 1
    }

    /// index of the last entry, counting the snapshot boundary
    pub fn last_index(&self) -> u64 {
        self.snapshot_index + self.entries.len() as u64
    }

    /// term of the last entry, counting the snapshot boundary
    pub fn last_term(&self) -> u64 {
        self.entries.last().map_or(self.snapshot_term, |e| e.term)
    }

    /// number of retained entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// retained entries, oldest first
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Term of the entry at `index`.
    ///
    /// The snapshot boundary itself is known (index 0 has term 0), indices
    /// strictly inside the snapshot or past the end are not.
    pub fn term_at(&self, index: u64) -> Option<u64> {
        if index == self.snapshot_index {
            return Some(self.snapshot_term);
        }
        self.get(index).map(|e| e.term)
    }

    /// the retained entry at `index`
    pub fn get(&self, index: u64) -> Option<&LogEntry> {
        if index <= self.snapshot_index {
            return None;
        }
        self.entries.get((index - self.snapshot_index - 1) as usize)
    }

    /// clones of every retained entry from `index` to the end
    pub fn entries_from(&self, index: u64) -> Vec<LogEntry> {
        let start = index.max(self.first_index());
        if start > self.last_index() {
            return Vec::new();
        }
        self.entries[(start - self.snapshot_index - 1) as usize..].to_vec()
    }

    /// append a new entry for `command` at the end of the log, returning its index
    pub fn append(&mut self, term: u64, command: Vec<u8>) -> u64 {
        let index = self.last_index() + 1;
        self.entries.push(LogEntry::new(term, index, command));
        index
    }

    /// push an already-indexed entry; it must directly follow the last one
    pub fn push(&mut self, entry: LogEntry) {
        debug_assert_eq!(entry.index, self.last_index() + 1, "log indices must be contiguous");
        self.entries.push(entry);
    }

    /// remove the entry at `index` and everything after it
    pub fn truncate_from(&mut self, index: u64) {
        if index <= self.snapshot_index {
            self.entries.clear();
            return;
        }
        self.entries.truncate((index - self.snapshot_index - 1) as usize);
    }

    /// last retained index whose entry has `term`, including the snapshot boundary
    pub fn last_index_of_term(&self, term: u64) -> Option<u64> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.term == term)
            .map(|e| e.index)
            .or_else(|| (self.snapshot_index > 0 && self.snapshot_term == term).then_some(self.snapshot_index))
    }

    /// first index of the run of `term` that ends at `index` (never below the first retained entry)
    pub fn first_index_of_term_run(&self, index: u64, term: u64) -> u64 {
        let mut first = index;
        while first > self.first_index() && self.term_at(first - 1) == Some(term) {
            first -= 1;
        }
        first
    }

    /// Fold everything up to and including `index` into the snapshot boundary.
    ///
    /// Entries after `index` are kept. If the log does not reach `index` the
    /// whole log is discarded.
    pub fn compact_to(&mut self, index: u64, term: u64) {
        if index <= self.snapshot_index {
            return;
        }
        if index >= self.last_index() {
            self.entries.clear();
        } else {
            self.entries.drain(..(index - self.snapshot_index) as usize);
        }
        self.snapshot_index = index;
        self.snapshot_term = term;
    }

    /// drop every entry and restart the log right after a snapshot boundary
    pub fn reset_to(&mut self, index: u64, term: u64) {
        self.entries.clear();
        self.snapshot_index = index;
        self.snapshot_term = term;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_with_terms(terms: &[u64]) -> RaftLog {
        let mut log = RaftLog::new();
        for term in terms {
            log.append(*term, vec![]);
        }
        log
    }

    #[test]
    fn empty_log_boundaries() {
        let log = RaftLog::new();
        assert_eq!(log.first_index(), 1);
        assert_eq!(log.last_index(), 0);
        assert_eq!(log.last_term(), 0);
        assert_eq!(log.term_at(0), Some(0));
        assert_eq!(log.term_at(1), None);
    }

    #[test]
    fn compaction_keeps_suffix_and_boundary_term() {
        let mut log = log_with_terms(&[1, 1, 2, 3, 3]);
        log.compact_to(3, 2);

        assert_eq!(log.snapshot_index(), 3);
        assert_eq!(log.first_index(), 4);
        assert_eq!(log.last_index(), 5);
        assert_eq!(log.term_at(3), Some(2));
        assert_eq!(log.term_at(2), None);
        assert_eq!(log.get(4).map(|e| e.index), Some(4));
        assert_eq!(log.entries_from(1).len(), 2);
    }

    #[test]
    fn compaction_past_end_clears_log() {
        let mut log = log_with_terms(&[1, 1]);
        log.compact_to(10, 4);

        assert!(log.is_empty());
        assert_eq!(log.last_index(), 10);
        assert_eq!(log.last_term(), 4);
        assert_eq!(log.append(5, vec![]), 11);
    }

    #[test]
    fn truncate_after_compaction() {
        let mut log = log_with_terms(&[1, 1, 1, 2, 2]);
        log.compact_to(2, 1);
        log.truncate_from(4);

        assert_eq!(log.last_index(), 3);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn term_run_lookup() {
        let log = log_with_terms(&[1, 2, 2, 2, 3]);
        assert_eq!(log.first_index_of_term_run(4, 2), 2);
        assert_eq!(log.last_index_of_term(2), Some(4));
        assert_eq!(log.last_index_of_term(7), None);
    }

    #[test]
    fn from_parts_rejects_gaps() {
        let entries = vec![LogEntry::new(1, 5, vec![]), LogEntry::new(1, 7, vec![])];
        assert!(RaftLog::from_parts(4, 1, entries).is_err());
    }
}
