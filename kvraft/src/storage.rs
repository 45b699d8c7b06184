//! The stable-storage contract consumed by the consensus core.
//!
//! The core never writes through this trait. It reads persisted state during
//! construction and log windows during replication; all writes happen in the
//! host, driven by the [`Ready`](crate::node::Ready) bundle.

use std::error::Error;

use anyerror::AnyError;

use crate::message::ConfState;
use crate::message::Entry;
use crate::message::HardState;
use crate::message::Snapshot;

/// Errors a storage implementation may report.
///
/// `Compacted` and `SnapshotTemporarilyUnavailable` are expected during
/// normal operation and the core degrades gracefully on them. Anything
/// surfaced as `Other` is fatal to the node.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("requested index precedes the first index; log has been compacted")]
    Compacted,

    #[error("requested entry is not available yet")]
    Unavailable,

    #[error("snapshot is temporarily unavailable")]
    SnapshotTemporarilyUnavailable,

    #[error(transparent)]
    Other(AnyError),
}

impl StorageError {
    /// Wrap an implementation-specific failure.
    pub fn other(e: &(impl Error + 'static)) -> Self {
        StorageError::Other(AnyError::new(e))
    }
}

/// The state persisted before the node last went down.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitialState {
    pub hard_state: HardState,
    pub conf_state: ConfState,
}

/// Read access to the persisted raft state.
///
/// Index arithmetic follows the usual raft convention: entries are
/// contiguous, `first_index()` is the first entry still present (everything
/// below it lives only in the snapshot), and `term(first_index() - 1)` must
/// still answer so the log-matching check works at the compaction boundary.
pub trait Storage {
    /// The hard state and membership persisted at shutdown.
    fn initial_state(&self) -> Result<InitialState, StorageError>;

    /// Entries in the half-open range `[low, high)`.
    ///
    /// Returns `Compacted` if `low` precedes `first_index()`, `Unavailable`
    /// if `high` runs past `last_index() + 1`.
    fn entries(&self, low: u64, high: u64) -> Result<Vec<Entry>, StorageError>;

    /// Term of the entry at `idx`.
    ///
    /// Must answer for `idx == first_index() - 1` (the snapshot boundary).
    fn term(&self, idx: u64) -> Result<u64, StorageError>;

    fn first_index(&self) -> Result<u64, StorageError>;

    fn last_index(&self) -> Result<u64, StorageError>;

    /// The most recent snapshot.
    ///
    /// May return `SnapshotTemporarilyUnavailable` while one is being
    /// prepared; the core will retry on a later send.
    fn snapshot(&self) -> Result<Snapshot, StorageError>;
}
