//! # raft-storage
//!
//! why: provide durable persistence for raft state using standard rust fs apis
//! relations: written by the raft-node driver, which encodes state through raft-core's persist codec
//! what: Storage trait, FileStorage implementation, InMemoryStorage for testing

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, trace};

/// trait for durable storage of raft state
///
/// the store knows nothing about raft: it keeps two opaque blobs, the
/// encoded node state and the latest snapshot. writes replace both (or the
/// state alone) atomically, so a crash leaves either the old pair or the new one.
pub trait Storage: Send {
    /// replace the state blob, keeping the stored snapshot
    fn save_state(&mut self, state: &[u8]) -> io::Result<()>;

    /// replace the state blob and the snapshot together
    fn save_state_and_snapshot(&mut self, state: &[u8], snapshot: &[u8]) -> io::Result<()>;

    /// the last saved state blob (empty for a fresh node)
    fn read_state(&self) -> io::Result<Vec<u8>>;

    /// the last saved snapshot (empty if none)
    fn read_snapshot(&self) -> io::Result<Vec<u8>>;

    /// size in bytes of the stored state blob
    fn state_size(&self) -> io::Result<u64>;

    /// clear all persisted state (for testing)
    fn clear(&mut self) -> io::Result<()>;
}

// -- file storage implementation --

const STATE_FILE: &str = "raft-state.bin";
const TEMP_FILE: &str = "raft-state.tmp";
const HEADER_LEN: usize = 16;

/// file-based storage implementation using std::fs
///
/// keeps both blobs in one file so they are replaced together:
/// - 8 bytes: state length (little endian)
/// - 8 bytes: snapshot length (little endian)
/// - the state bytes, then the snapshot bytes
///
/// the current pair is cached in memory, so saving the state alone does not
/// re-read the snapshot from disk.
pub struct FileStorage {
    /// directory path for storing state files
    dir: PathBuf,
    state: Vec<u8>,
    snapshot: Vec<u8>,
}

impl FileStorage {
    /// open the storage at the given directory, loading whatever it holds
    /// creates the directory if it doesn't exist
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let (state, snapshot) = read_pair(&dir.join(STATE_FILE))?;
        debug!(dir = %dir.display(), state_len = state.len(), snapshot_len = snapshot.len(), "opened file storage");
        Ok(Self { dir, state, snapshot })
    }

    /// get the path to the state file
    pub fn path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    /// atomic write: write to temp file, fsync, then rename over the old one
    fn write_pair(&self, state: &[u8], snapshot: &[u8]) -> io::Result<()> {
        let temp_path = self.dir.join(TEMP_FILE);
        let mut file = File::create(&temp_path)?;
        file.write_all(&(state.len() as u64).to_le_bytes())?;
        file.write_all(&(snapshot.len() as u64).to_le_bytes())?;
        file.write_all(state)?;
        file.write_all(snapshot)?;
        file.sync_all()?;
        fs::rename(&temp_path, self.path())?;
        // the rename itself is only durable once the directory entry is
        File::open(&self.dir)?.sync_all()?;
        trace!(state_len = state.len(), snapshot_len = snapshot.len(), "persisted raft state");
        Ok(())
    }
}

fn read_pair(path: &Path) -> io::Result<(Vec<u8>, Vec<u8>)> {
    if !path.exists() {
        return Ok((Vec::new(), Vec::new())); // default for new nodes
    }

    let mut file = File::open(path)?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)?;
    decode_pair(&contents)
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

fn decode_pair(contents: &[u8]) -> io::Result<(Vec<u8>, Vec<u8>)> {
    let invalid = |msg: String| io::Error::new(io::ErrorKind::InvalidData, msg);

    if contents.len() < HEADER_LEN {
        return Err(invalid(format!("state file too short: {} bytes", contents.len())));
    }
    let (header, body) = contents.split_at(HEADER_LEN);
    let mut len = [0u8; 8];
    len.copy_from_slice(&header[..8]);
    let state_len = u64::from_le_bytes(len) as usize;
    len.copy_from_slice(&header[8..]);
    let snapshot_len = u64::from_le_bytes(len) as usize;

    if state_len.checked_add(snapshot_len) != Some(body.len()) {
        return Err(invalid(format!(
            "state file holds {} bytes, header claims {state_len} + {snapshot_len}",
            body.len()
        )));
    }
    let (state, snapshot) = body.split_at(state_len);
    Ok((state.to_vec(), snapshot.to_vec()))
}

impl Storage for FileStorage {
    fn save_state(&mut self, state: &[u8]) -> io::Result<()> {
        self.write_pair(state, &self.snapshot)?;
        self.state = state.to_vec();
        Ok(())
    }

    fn save_state_and_snapshot(&mut self, state: &[u8], snapshot: &[u8]) -> io::Result<()> {
        self.write_pair(state, snapshot)?;
        self.state = state.to_vec();
        self.snapshot = snapshot.to_vec();
        Ok(())
    }

    fn read_state(&self) -> io::Result<Vec<u8>> {
        Ok(self.state.clone())
    }

    fn read_snapshot(&self) -> io::Result<Vec<u8>> {
        Ok(self.snapshot.clone())
    }

    fn state_size(&self) -> io::Result<u64> {
        Ok(self.state.len() as u64)
    }

    fn clear(&mut self) -> io::Result<()> {
        remove_if_present(&self.path())?;
        remove_if_present(&self.dir.join(TEMP_FILE))?;
        self.state.clear();
        self.snapshot.clear();
        Ok(())
    }
}

// -- in-memory storage implementation --

#[derive(Default)]
struct Blobs {
    state: Vec<u8>,
    snapshot: Vec<u8>,
}

/// in-memory storage for testing
///
/// clones share the same blobs, so a test can hand one clone to a node,
/// drop the node, and restart a new one from another clone.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    blobs: Arc<Mutex<Blobs>>,
}

impl InMemoryStorage {
    /// create a new in-memory storage
    pub fn new() -> Self {
        Self::default()
    }

    fn blobs(&self) -> io::Result<MutexGuard<'_, Blobs>> {
        self.blobs
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "in-memory storage lock poisoned"))
    }
}

impl Storage for InMemoryStorage {
    fn save_state(&mut self, state: &[u8]) -> io::Result<()> {
        self.blobs()?.state = state.to_vec();
        Ok(())
    }

    fn save_state_and_snapshot(&mut self, state: &[u8], snapshot: &[u8]) -> io::Result<()> {
        let mut blobs = self.blobs()?;
        blobs.state = state.to_vec();
        blobs.snapshot = snapshot.to_vec();
        Ok(())
    }

    fn read_state(&self) -> io::Result<Vec<u8>> {
        Ok(self.blobs()?.state.clone())
    }

    fn read_snapshot(&self) -> io::Result<Vec<u8>> {
        Ok(self.blobs()?.snapshot.clone())
    }

    fn state_size(&self) -> io::Result<u64> {
        Ok(self.blobs()?.state.len() as u64)
    }

    fn clear(&mut self) -> io::Result<()> {
        let mut blobs = self.blobs()?;
        blobs.state.clear();
        blobs.snapshot.clear();
        Ok(())
    }
}
