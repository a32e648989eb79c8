//! # comprehensive storage tests
//!
//! why: verify all storage scenarios work correctly
//! relations: tests raft-storage crate, with raft-core's codec producing real state blobs
//! what: persistence, crash recovery, atomic replacement, edge cases

use raft_core::{LogEntry, PersistentState};
use raft_storage::{FileStorage, InMemoryStorage, Storage};
use std::fs;
use tempfile::tempdir;

fn encoded_state(term: u64, voted_for: Option<u64>, entries: u64) -> Vec<u8> {
    PersistentState {
        current_term: term,
        voted_for,
        log: (1..=entries).map(|i| LogEntry::new(term, i, format!("cmd{i}").into_bytes())).collect(),
        last_included_index: 0,
        last_included_term: 0,
    }
    .encode()
    .unwrap()
}

// =============================================================================
// SECTION 1: IN-MEMORY STORAGE TESTS
// =============================================================================

mod in_memory_basic {
    use super::*;

    #[test]
    fn new_storage_is_empty() {
        let storage = InMemoryStorage::new();

        assert!(storage.read_state().unwrap().is_empty());
        assert!(storage.read_snapshot().unwrap().is_empty());
        assert_eq!(storage.state_size().unwrap(), 0);
    }

    #[test]
    fn empty_state_decodes_to_fresh_node() {
        let storage = InMemoryStorage::new();

        let state = PersistentState::decode(&storage.read_state().unwrap()).unwrap();

        assert_eq!(state.current_term, 0);
        assert_eq!(state.voted_for, None);
        assert!(state.log.is_empty());
    }

    #[test]
    fn save_and_load_state() {
        let mut storage = InMemoryStorage::new();
        let blob = encoded_state(5, Some(3), 2);

        storage.save_state(&blob).unwrap();
        let state = PersistentState::decode(&storage.read_state().unwrap()).unwrap();

        assert_eq!(state.current_term, 5);
        assert_eq!(state.voted_for, Some(3));
        assert_eq!(state.log.len(), 2);
    }

    #[test]
    fn overwrite_state() {
        let mut storage = InMemoryStorage::new();

        storage.save_state(&encoded_state(1, Some(1), 0)).unwrap();
        storage.save_state(&encoded_state(5, Some(3), 0)).unwrap();

        let state = PersistentState::decode(&storage.read_state().unwrap()).unwrap();
        assert_eq!(state.current_term, 5);
        assert_eq!(state.voted_for, Some(3));
    }

    #[test]
    fn state_size_tracks_latest_blob() {
        let mut storage = InMemoryStorage::new();

        storage.save_state(&encoded_state(1, None, 10)).unwrap();
        let large = storage.state_size().unwrap();
        storage.save_state(&encoded_state(1, None, 1)).unwrap();

        assert!(storage.state_size().unwrap() < large);
    }

    #[test]
    fn snapshot_saved_with_state() {
        let mut storage = InMemoryStorage::new();

        storage.save_state_and_snapshot(b"state", b"snapshot").unwrap();

        assert_eq!(storage.read_state().unwrap(), b"state".to_vec());
        assert_eq!(storage.read_snapshot().unwrap(), b"snapshot".to_vec());
    }

    #[test]
    fn clear_resets_all_state() {
        let mut storage = InMemoryStorage::new();
        storage.save_state_and_snapshot(b"state", b"snapshot").unwrap();

        storage.clear().unwrap();

        assert!(storage.read_state().unwrap().is_empty());
        assert!(storage.read_snapshot().unwrap().is_empty());
    }

    #[test]
    fn restarted_handle_sees_previous_writes() {
        let mut first = InMemoryStorage::new();
        let second = first.clone();

        first.save_state_and_snapshot(b"state", b"snapshot").unwrap();
        drop(first);

        assert_eq!(second.read_state().unwrap(), b"state".to_vec());
        assert_eq!(second.read_snapshot().unwrap(), b"snapshot".to_vec());
    }
}

// =============================================================================
// SECTION 2: FILE STORAGE TESTS
// =============================================================================

mod file_storage_basic {
    use super::*;

    #[test]
    fn create_storage_creates_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("node-1");

        let _storage = FileStorage::new(&path).unwrap();

        assert!(path.is_dir());
    }

    #[test]
    fn new_storage_is_empty() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();

        assert!(storage.read_state().unwrap().is_empty());
        assert!(storage.read_snapshot().unwrap().is_empty());
        assert!(!storage.path().exists());
    }

    #[test]
    fn save_creates_state_file() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();

        storage.save_state(&encoded_state(1, None, 0)).unwrap();

        assert!(storage.path().exists());
    }

    #[test]
    fn save_state_keeps_snapshot() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();

        storage.save_state_and_snapshot(b"s1", b"snap").unwrap();
        storage.save_state(b"s2").unwrap();

        assert_eq!(storage.read_state().unwrap(), b"s2".to_vec());
        assert_eq!(storage.read_snapshot().unwrap(), b"snap".to_vec());
    }

    #[test]
    fn state_size_matches_blob() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();
        let blob = encoded_state(3, Some(1), 4);

        storage.save_state(&blob).unwrap();

        assert_eq!(storage.state_size().unwrap(), blob.len() as u64);
    }
}

// =============================================================================
// SECTION 3: CRASH RECOVERY TESTS
// =============================================================================

mod crash_recovery {
    use super::*;

    #[test]
    fn state_survives_restart() {
        let dir = tempdir().unwrap();

        {
            let mut storage = FileStorage::new(dir.path()).unwrap();
            storage.save_state(&encoded_state(10, Some(1), 3)).unwrap();
        }

        let storage = FileStorage::new(dir.path()).unwrap();
        let state = PersistentState::decode(&storage.read_state().unwrap()).unwrap();
        assert_eq!(state.current_term, 10);
        assert_eq!(state.voted_for, Some(1));
        assert_eq!(state.log.len(), 3);
    }

    #[test]
    fn snapshot_survives_restart() {
        let dir = tempdir().unwrap();

        {
            let mut storage = FileStorage::new(dir.path()).unwrap();
            storage.save_state_and_snapshot(&encoded_state(2, None, 0), b"kv:a=1").unwrap();
        }

        let storage = FileStorage::new(dir.path()).unwrap();
        assert_eq!(storage.read_snapshot().unwrap(), b"kv:a=1".to_vec());
    }

    #[test]
    fn multiple_restarts_preserve_state() {
        let dir = tempdir().unwrap();

        for term in 1..=5u64 {
            let mut storage = FileStorage::new(dir.path()).unwrap();
            let previous = PersistentState::decode(&storage.read_state().unwrap()).unwrap();
            assert_eq!(previous.current_term, term - 1);
            storage.save_state(&encoded_state(term, Some(term), 0)).unwrap();
        }

        let storage = FileStorage::new(dir.path()).unwrap();
        let state = PersistentState::decode(&storage.read_state().unwrap()).unwrap();
        assert_eq!(state.current_term, 5);
    }

    #[test]
    fn clear_removes_all_files() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();
        storage.save_state_and_snapshot(b"state", b"snapshot").unwrap();

        storage.clear().unwrap();

        assert!(!storage.path().exists());
        let reopened = FileStorage::new(dir.path()).unwrap();
        assert!(reopened.read_state().unwrap().is_empty());
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempdir().unwrap();
        {
            let mut storage = FileStorage::new(dir.path()).unwrap();
            storage.save_state_and_snapshot(b"state", b"snapshot").unwrap();
        }
        let path = dir.path().join("raft-state.bin");
        let mut contents = fs::read(&path).unwrap();
        contents.truncate(contents.len() - 3);
        fs::write(&path, contents).unwrap();

        let err = FileStorage::new(dir.path()).err().expect("truncated file must not load");
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}

// =============================================================================
// SECTION 4: ATOMIC WRITE TESTS
// =============================================================================

mod atomic_writes {
    use super::*;

    #[test]
    fn no_temp_files_remain() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();

        storage.save_state(b"state").unwrap();
        storage.save_state_and_snapshot(b"state", b"snapshot").unwrap();

        // temp files should be renamed away
        assert!(!dir.path().join("raft-state.tmp").exists());
    }

    #[test]
    fn stale_temp_file_is_ignored_on_open() {
        let dir = tempdir().unwrap();
        {
            let mut storage = FileStorage::new(dir.path()).unwrap();
            storage.save_state(b"committed").unwrap();
        }
        // a crash mid-write leaves a half-written temp file behind
        fs::write(dir.path().join("raft-state.tmp"), b"garbage").unwrap();

        let storage = FileStorage::new(dir.path()).unwrap();
        assert_eq!(storage.read_state().unwrap(), b"committed".to_vec());
    }

    #[test]
    fn state_and_snapshot_replaced_together() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();
        storage.save_state_and_snapshot(b"state-1", b"snapshot-1").unwrap();
        storage.save_state_and_snapshot(b"state-2", b"snapshot-2").unwrap();

        let reopened = FileStorage::new(dir.path()).unwrap();
        assert_eq!(reopened.read_state().unwrap(), b"state-2".to_vec());
        assert_eq!(reopened.read_snapshot().unwrap(), b"snapshot-2".to_vec());
    }
}

// =============================================================================
// SECTION 5: EDGE CASES
// =============================================================================

mod edge_cases {
    use super::*;

    #[test]
    fn large_snapshot() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();

        // 1MB snapshot
        let large = vec![7u8; 1024 * 1024];
        storage.save_state_and_snapshot(b"state", &large).unwrap();

        let reopened = FileStorage::new(dir.path()).unwrap();
        assert_eq!(reopened.read_snapshot().unwrap().len(), 1024 * 1024);
    }

    #[test]
    fn binary_blobs() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();

        let binary_data = vec![0x00, 0xFF, 0x7F, 0x80, 0xFE];
        storage.save_state_and_snapshot(&binary_data, &binary_data).unwrap();

        let reopened = FileStorage::new(dir.path()).unwrap();
        assert_eq!(reopened.read_state().unwrap(), binary_data);
        assert_eq!(reopened.read_snapshot().unwrap(), binary_data);
    }

    #[test]
    fn empty_state_with_snapshot() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();

        storage.save_state_and_snapshot(&[], b"snapshot").unwrap();

        let reopened = FileStorage::new(dir.path()).unwrap();
        assert!(reopened.read_state().unwrap().is_empty());
        assert_eq!(reopened.read_snapshot().unwrap(), b"snapshot".to_vec());
    }

    #[test]
    fn very_high_term_number() {
        let mut storage = InMemoryStorage::new();

        storage.save_state(&encoded_state(u64::MAX, Some(u64::MAX), 0)).unwrap();
        let state = PersistentState::decode(&storage.read_state().unwrap()).unwrap();

        assert_eq!(state.current_term, u64::MAX);
        assert_eq!(state.voted_for, Some(u64::MAX));
    }
}

// =============================================================================
// SECTION 6: STORAGE TRAIT POLYMORPHISM
// =============================================================================

mod trait_polymorphism {
    use super::*;

    fn test_storage_impl<S: Storage>(storage: &mut S) {
        // save and load state
        storage.save_state(&encoded_state(5, Some(2), 1)).unwrap();
        let state = PersistentState::decode(&storage.read_state().unwrap()).unwrap();
        assert_eq!(state.current_term, 5);
        assert_eq!(state.voted_for, Some(2));

        // compact into a snapshot
        let compacted = PersistentState {
            current_term: 5,
            voted_for: Some(2),
            log: vec![],
            last_included_index: 1,
            last_included_term: 5,
        };
        storage.save_state_and_snapshot(&compacted.encode().unwrap(), b"snap@1").unwrap();
        let state = PersistentState::decode(&storage.read_state().unwrap()).unwrap();
        assert_eq!(state.last_included_index, 1);
        assert_eq!(storage.read_snapshot().unwrap(), b"snap@1".to_vec());

        // clear
        storage.clear().unwrap();
        assert_eq!(storage.state_size().unwrap(), 0);
    }

    #[test]
    fn in_memory_implements_trait() {
        let mut storage = InMemoryStorage::new();
        test_storage_impl(&mut storage);
    }

    #[test]
    fn file_storage_implements_trait() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path()).unwrap();
        test_storage_impl(&mut storage);
    }

    #[test]
    fn boxed_storage_is_object_safe() {
        let mut storage: Box<dyn Storage> = Box::new(InMemoryStorage::new());
        storage.save_state(b"state").unwrap();
        assert_eq!(storage.read_state().unwrap(), b"state".to_vec());
    }
}
