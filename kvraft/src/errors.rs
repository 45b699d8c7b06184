//! Errors returned by the consensus core's API.

use crate::config::ConfigError;
use crate::storage::StorageError;

/// Errors surfaced by [`Raft::step`](crate::raft::Raft::step) and the
/// [`RawNode`](crate::node::RawNode) API.
///
/// Protocol-level negative outcomes (a denied vote, a rejected append, a
/// stale snapshot) are not errors: they are normal messages with
/// `reject == true`, handled by the opposite party.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The proposal could not be accepted here: there is no known leader to
    /// forward to, the node is campaigning, or a membership change is gated.
    /// The caller should retry at the (new) leader.
    #[error("raft proposal dropped")]
    ProposalDropped,

    #[error(transparent)]
    ConfigInvalid(#[from] ConfigError),

    /// A local message type (`Hup`, `Beat`) arrived through the network
    /// surface.
    #[error("cannot step raft local message")]
    StepLocalMsg,

    /// A response arrived from a peer that is not in the progress table.
    #[error("cannot step a response from peer not tracked in progress")]
    StepPeerNotFound,

    #[error(transparent)]
    Store(#[from] StorageError),
}
