//! An in-memory implementation of the `kvraft` storage contract, for tests
//! and demo hosts.
//!
//! `MemStorage` is a cheap-clone handle over a lock-guarded core, so a test
//! can keep writing through its own handle while the raft node reads through
//! another.


use std::sync::Arc;
use std::sync::RwLock;
use std::sync::RwLockReadGuard;
use std::sync::RwLockWriteGuard;

use kvraft::ConfState;
use kvraft::Entry;
use kvraft::HardState;
use kvraft::InitialState;
use kvraft::Snapshot;
use kvraft::SnapshotMetadata;
use kvraft::Storage;
use kvraft::StorageError;

/// The single-writer state behind a [`MemStorage`] handle.
#[derive(Debug, Clone, Default)]
pub struct MemStorageCore {
    /// The persisted `(term, vote, commit)` triple.
    hard_state: HardState,
    /// The latest snapshot; its metadata marks where the entry range begins.
    snapshot: Snapshot,
    /// Entries above the snapshot, contiguous and strictly increasing.
    entries: Vec<Entry>,
    /// When set, `snapshot()` reports a temporarily unavailable snapshot;
    /// lets tests exercise the caller's retry path.
    snap_unavailable: bool,
}

impl MemStorageCore {
    pub fn first_index(&self) -> u64 {
        match self.entries.first() {
            Some(e) => e.index,
            None => self.snapshot.metadata.index + 1,
        }
    }

    pub fn last_index(&self) -> u64 {
        match self.entries.last() {
            Some(e) => e.index,
            None => self.snapshot.metadata.index,
        }
    }

    fn term(&self, idx: u64) -> Result<u64, StorageError> {
        if idx == self.snapshot.metadata.index {
            return Ok(self.snapshot.metadata.term);
        }
        if idx < self.first_index() {
            return Err(StorageError::Compacted);
        }
        if idx > self.last_index() {
            return Err(StorageError::Unavailable);
        }

        let offset = self.entries[0].index;
        Ok(self.entries[(idx - offset) as usize].term)
    }

    pub fn set_hardstate(&mut self, hs: HardState) {
        self.hard_state = hs;
    }

    pub fn hard_state(&self) -> &HardState {
        &self.hard_state
    }

    pub fn set_conf_state(&mut self, cs: ConfState) {
        self.snapshot.metadata.conf_state = cs;
    }

    /// Persist entries, truncating any overlapping suffix first.
    ///
    /// The input must connect to the existing range: appending below the
    /// first index or leaving a gap after the last is a host bug.
    pub fn append(&mut self, ents: &[Entry]) {
        if ents.is_empty() {
            return;
        }

        let first = self.first_index();
        let last = self.last_index();
        assert!(
            ents[0].index >= first,
            "overwriting compacted entries: append at {}, first index {}",
            ents[0].index,
            first,
        );
        assert!(
            ents[0].index <= last + 1,
            "log entries must be contiguous: append at {}, last index {}",
            ents[0].index,
            last,
        );

        let offset = ents[0].index - first;
        self.entries.truncate(offset as usize);
        self.entries.extend_from_slice(ents);
    }

    /// Overwrite everything with `snapshot`. A snapshot older than the one
    /// already installed is refused.
    pub fn apply_snapshot(&mut self, snapshot: Snapshot) -> Result<(), StorageError> {
        let index = snapshot.metadata.index;
        if index < self.snapshot.metadata.index {
            return Err(StorageError::Compacted);
        }

        self.hard_state.commit = index;
        self.hard_state.term = std::cmp::max(self.hard_state.term, snapshot.metadata.term);
        self.entries.clear();
        self.snapshot = snapshot;

        Ok(())
    }

    /// Build a snapshot covering the log up to `idx`, keeping the current
    /// membership unless `conf_state` replaces it.
    pub fn create_snapshot(
        &mut self,
        idx: u64,
        conf_state: Option<ConfState>,
        data: Vec<u8>,
    ) -> Result<Snapshot, StorageError> {
        if idx <= self.snapshot.metadata.index {
            return Err(StorageError::Compacted);
        }
        if idx > self.last_index() {
            return Err(StorageError::Unavailable);
        }

        let term = self.term(idx)?;
        let conf_state = conf_state.unwrap_or_else(|| self.snapshot.metadata.conf_state.clone());

        self.snapshot = Snapshot {
            metadata: SnapshotMetadata {
                conf_state,
                index: idx,
                term,
            },
            data,
        };

        Ok(self.snapshot.clone())
    }

    pub fn trigger_snap_unavailable(&mut self, unavailable: bool) {
        self.snap_unavailable = unavailable;
    }

    /// Drop entries below `compact_index`; they live on only in the
    /// snapshot.
    pub fn compact(&mut self, compact_index: u64) -> Result<(), StorageError> {
        if compact_index <= self.first_index() {
            return Ok(());
        }
        if compact_index > self.last_index() + 1 {
            return Err(StorageError::Unavailable);
        }

        let offset = self.entries[0].index;
        self.entries.drain(..(compact_index - offset) as usize);
        Ok(())
    }
}

/// A thread-safe, cheap-clone [`Storage`] handle.
#[derive(Debug, Clone, Default)]
pub struct MemStorage {
    core: Arc<RwLock<MemStorageCore>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// A storage pre-seeded with a membership, as if a bootstrap had been
    /// persisted already.
    pub fn new_with_conf_state(peers: Vec<u64>) -> Self {
        let store = Self::new();
        store.wl().set_conf_state(ConfState { peers });
        store
    }

    /// Read-lock the core.
    pub fn rl(&self) -> RwLockReadGuard<'_, MemStorageCore> {
        self.core.read().unwrap()
    }

    /// Write-lock the core.
    pub fn wl(&self) -> RwLockWriteGuard<'_, MemStorageCore> {
        self.core.write().unwrap()
    }
}

impl Storage for MemStorage {
    fn initial_state(&self) -> Result<InitialState, StorageError> {
        let core = self.rl();
        Ok(InitialState {
            hard_state: core.hard_state,
            conf_state: core.snapshot.metadata.conf_state.clone(),
        })
    }

    fn entries(&self, low: u64, high: u64) -> Result<Vec<Entry>, StorageError> {
        let core = self.rl();
        if low < core.first_index() {
            return Err(StorageError::Compacted);
        }
        if high > core.last_index() + 1 {
            return Err(StorageError::Unavailable);
        }
        if low >= high {
            return Ok(vec![]);
        }

        let offset = core.entries[0].index;
        Ok(core.entries[(low - offset) as usize..(high - offset) as usize].to_vec())
    }

    fn term(&self, idx: u64) -> Result<u64, StorageError> {
        self.rl().term(idx)
    }

    fn first_index(&self) -> Result<u64, StorageError> {
        Ok(self.rl().first_index())
    }

    fn last_index(&self) -> Result<u64, StorageError> {
        Ok(self.rl().last_index())
    }

    fn snapshot(&self) -> Result<Snapshot, StorageError> {
        let core = self.rl();
        if core.snap_unavailable {
            return Err(StorageError::SnapshotTemporarilyUnavailable);
        }
        Ok(core.snapshot.clone())
    }
}
