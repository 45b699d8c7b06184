use std::error::Error;

use validit::Validate;

use crate::message::Entry;
use crate::message::Snapshot;
use crate::storage::Storage;
use crate::storage::StorageError;

/// The node's view of the replicated log.
///
/// Entries from `first_index` onwards are mirrored in memory; everything
/// below exists only in the snapshot. Three watermarks partition the window:
///
/// ```text
///   snapshot/first ..... applied ..... committed ..... last
/// ```
///
/// `stabled` tracks what the host has persisted and may trail `last`;
/// entries above it are the unstable tail handed out through the `Ready`
/// bundle. `committed` is the quorum watermark and `applied` what the state
/// machine has consumed.
#[derive(Debug, Clone)]
pub struct RaftLog<S: Storage> {
    store: S,

    /// Index of `entries[0]`.
    offset: u64,

    entries: Vec<Entry>,

    pub committed: u64,

    pub applied: u64,

    /// Highest index known persisted by the host.
    pub stabled: u64,

    /// A snapshot received from the leader, waiting for the host to install.
    pending_snapshot: Option<Snapshot>,
}

impl<S: Storage> RaftLog<S> {
    /// Recover the in-memory window from storage.
    pub fn new(store: S) -> Result<Self, StorageError> {
        let first = store.first_index()?;
        let last = store.last_index()?;
        let entries = store.entries(first, last + 1)?;

        Ok(Self {
            store,
            offset: first,
            entries,
            committed: first - 1,
            applied: first - 1,
            stabled: last,
            pending_snapshot: None,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn first_index(&self) -> u64 {
        self.offset
    }

    pub fn last_index(&self) -> u64 {
        if let Some(e) = self.entries.last() {
            return e.index;
        }
        if let Some(snap) = &self.pending_snapshot {
            return snap.metadata.index;
        }
        self.offset - 1
    }

    /// Term of the entry at `idx`, answering down to the snapshot boundary.
    pub fn term(&self, idx: u64) -> Result<u64, StorageError> {
        if idx >= self.offset {
            return match self.entries.get((idx - self.offset) as usize) {
                Some(e) => Ok(e.term),
                None => Err(StorageError::Unavailable),
            };
        }

        if let Some(snap) = &self.pending_snapshot {
            return if idx == snap.metadata.index {
                Ok(snap.metadata.term)
            } else {
                Err(StorageError::Compacted)
            };
        }

        self.store.term(idx)
    }

    pub fn last_term(&self) -> u64 {
        let last = self.last_index();
        self.term(last)
            .unwrap_or_else(|e| unreachable!("term of last index {} must be known: {}", last, e))
    }

    /// Whether a candidate log described by `(last_index, last_term)` is at
    /// least as up-to-date as ours.
    pub fn is_up_to_date(&self, last_index: u64, last_term: u64) -> bool {
        last_term > self.last_term()
            || (last_term == self.last_term() && last_index >= self.last_index())
    }

    pub fn match_term(&self, idx: u64, term: u64) -> bool {
        self.term(idx).map(|t| t == term).unwrap_or(false)
    }

    /// Entries in `[lo, hi)` from the in-memory window.
    pub fn slice(&self, lo: u64, hi: u64) -> Result<Vec<Entry>, StorageError> {
        if lo < self.offset {
            return Err(StorageError::Compacted);
        }
        if hi > self.last_index() + 1 {
            return Err(StorageError::Unavailable);
        }
        if lo >= hi {
            return Ok(vec![]);
        }

        let lo = (lo - self.offset) as usize;
        let hi = (hi - self.offset) as usize;
        Ok(self.entries[lo..hi].to_vec())
    }

    /// All entries from `idx` through the last, for replication sends.
    pub fn entries_from(&self, idx: u64) -> Result<Vec<Entry>, StorageError> {
        self.slice(idx, self.last_index() + 1)
    }

    /// Append entries, truncating a conflicting tail first.
    ///
    /// The first entry must be above `committed`; overwriting a committed
    /// entry means a broken leader and is unrecoverable.
    pub fn append(&mut self, ents: &[Entry]) -> u64 {
        if ents.is_empty() {
            return self.last_index();
        }

        let after = ents[0].index;
        assert!(
            after > self.committed,
            "appending at {} would overwrite committed entry (committed {})",
            after,
            self.committed,
        );

        if after <= self.last_index() {
            tracing::debug!(
                after = after,
                last_index = self.last_index(),
                "truncating conflicting tail"
            );
            self.entries.truncate((after - self.offset) as usize);
            self.stabled = std::cmp::min(self.stabled, after - 1);
        }

        self.entries.extend_from_slice(ents);
        self.last_index()
    }

    /// Find the first entry in `ents` whose `(index, term)` does not match
    /// our log. Returns 0 when everything matches.
    fn find_conflict(&self, ents: &[Entry]) -> u64 {
        for e in ents {
            if !self.match_term(e.index, e.term) {
                return e.index;
            }
        }
        0
    }

    /// The follower-side append rule.
    ///
    /// If our term at `prev_index` matches `prev_log_term`, overwrite/extend
    /// from `prev_index + 1`, advance commit to
    /// `min(commit, index of last new entry)`, and return that last index.
    /// On mismatch return None; the caller replies with a conflict hint.
    pub fn maybe_append(
        &mut self,
        prev_index: u64,
        prev_log_term: u64,
        commit: u64,
        ents: &[Entry],
    ) -> Option<u64> {
        if !self.match_term(prev_index, prev_log_term) {
            return None;
        }

        let last_new = prev_index + ents.len() as u64;

        let conflict = self.find_conflict(ents);
        if conflict != 0 {
            let start = (conflict - prev_index - 1) as usize;
            self.append(&ents[start..]);
        }

        self.commit_to(std::cmp::min(commit, last_new));
        Some(last_new)
    }

    /// The conflict hint for rejecting an append at `prev_index`:
    /// `(conflict_term, first index of that term)`. When our log is shorter
    /// than `prev_index` the hint is `(0, last_index + 1)`.
    pub fn find_conflict_hint(&self, prev_index: u64) -> (u64, u64) {
        let last = self.last_index();
        if prev_index > last {
            return (0, last + 1);
        }

        let conflict_term = match self.term(prev_index) {
            Ok(t) => t,
            Err(_) => return (0, last + 1),
        };

        let mut first = prev_index;
        while first > self.offset {
            match self.term(first - 1) {
                Ok(t) if t == conflict_term => first -= 1,
                _ => break,
            }
        }

        (conflict_term, first)
    }

    /// Raise the commit watermark. Never regresses.
    pub fn commit_to(&mut self, to: u64) {
        if to <= self.committed {
            return;
        }

        assert!(
            to <= self.last_index(),
            "commit({}) is out of range [last index {}]",
            to,
            self.last_index(),
        );

        tracing::debug!(committed = to, "advancing commit");
        self.committed = to;
    }

    pub fn applied_to(&mut self, idx: u64) {
        if idx == 0 {
            return;
        }

        assert!(
            idx >= self.applied && idx <= self.committed,
            "applied({}) is out of range [prev applied {}, committed {}]",
            idx,
            self.applied,
            self.committed,
        );

        self.applied = idx;
    }

    /// Record that the host persisted entries up to `idx`.
    pub fn stable_to(&mut self, idx: u64) {
        debug_assert!(idx <= self.last_index());
        self.stabled = std::cmp::max(self.stabled, idx);
    }

    /// The tail not yet persisted by the host.
    pub fn unstable_entries(&self) -> &[Entry] {
        let start = ((self.stabled + 1).saturating_sub(self.offset)) as usize;
        &self.entries[start.min(self.entries.len())..]
    }

    pub fn has_next_ents(&self) -> bool {
        self.committed > std::cmp::max(self.applied, self.offset - 1)
    }

    /// Committed entries the state machine has not consumed yet.
    pub fn next_ents(&self) -> Vec<Entry> {
        let lo = std::cmp::max(self.applied + 1, self.offset);
        if self.committed + 1 <= lo {
            return vec![];
        }

        self.slice(lo, self.committed + 1).unwrap_or_else(|e| {
            unreachable!("committed entries [{}, {}] must be in the window: {}", lo, self.committed, e)
        })
    }

    /// Replace the whole window with a snapshot.
    pub fn restore(&mut self, snap: Snapshot) {
        tracing::info!(
            index = snap.metadata.index,
            term = snap.metadata.term,
            "restoring log from snapshot"
        );

        let index = snap.metadata.index;
        self.entries.clear();
        self.offset = index + 1;
        self.committed = index;
        self.applied = index;
        self.stabled = index;
        self.pending_snapshot = Some(snap);
    }

    /// The snapshot to ship to a lagging follower.
    pub fn snapshot(&self) -> Result<Snapshot, StorageError> {
        if let Some(snap) = &self.pending_snapshot {
            return Ok(snap.clone());
        }
        self.store.snapshot()
    }

    pub fn pending_snapshot(&self) -> Option<&Snapshot> {
        self.pending_snapshot.as_ref()
    }

    /// Hand the pending snapshot to the host and clear it.
    pub(crate) fn take_pending_snapshot(&mut self) -> Option<Snapshot> {
        self.pending_snapshot.take()
    }
}

impl<S: Storage> Validate for RaftLog<S> {
    fn validate(&self) -> Result<(), Box<dyn Error>> {
        validit::less_equal!(self.applied, self.committed);
        validit::less_equal!(self.committed, self.last_index());
        validit::less_equal!(self.offset - 1, self.stabled);
        validit::less_equal!(self.stabled, self.last_index());

        if let Some(first) = self.entries.first() {
            validit::equal!(first.index, self.offset);
        }

        Ok(())
    }
}
