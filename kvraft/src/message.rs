//! The abstract wire model exchanged between peers.
//!
//! The host owns the actual encoding; these structs only fix the fields and
//! their meaning. Everything here derives serde so a host can plug in any
//! self-describing codec without wrapping the types.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// The kind of a raft message.
///
/// `Hup`, `Beat` and `Propose` are local messages: they are stepped into the
/// node by its own host and never travel over the network, which is why they
/// carry term `0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    /// Local: start a campaign.
    #[default]
    Hup,
    /// Local: broadcast a heartbeat round.
    Beat,
    /// Local or forwarded: a client proposal.
    Propose,
    /// Leader -> follower log replication.
    Append,
    AppendResponse,
    /// Candidate -> peer election request.
    RequestVote,
    RequestVoteResponse,
    /// Leader -> follower install of a compacted log prefix.
    Snapshot,
    Heartbeat,
    HeartbeatResponse,
    /// Client -> leader request to hand leadership over.
    TransferLeader,
    /// Leader -> transfer target: campaign immediately.
    TimeoutNow,
}

impl MessageType {
    /// Local messages are injected by the host and must not arrive from the
    /// network.
    pub fn is_local(&self) -> bool {
        matches!(self, MessageType::Hup | MessageType::Beat)
    }

    /// Response messages are only meaningful from a known peer.
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            MessageType::AppendResponse
                | MessageType::RequestVoteResponse
                | MessageType::HeartbeatResponse
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// What a log entry carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    #[default]
    Normal,
    /// The payload is a host-encoded [`ConfChange`].
    ConfChange,
}

/// A single record of the replicated log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub entry_type: EntryType,
    pub term: u64,
    pub index: u64,
    pub data: Vec<u8>,
}

impl Entry {
    pub fn new(index: u64, term: u64, data: Vec<u8>) -> Self {
        Self {
            entry_type: EntryType::Normal,
            term,
            index,
            data,
        }
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.term, self.index)
    }
}

/// The crash-persistent triple. It must be saved before any message it
/// justifies is sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardState {
    pub term: u64,
    pub vote: u64,
    pub commit: u64,
}

/// The persisted membership: ids of all voting peers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfState {
    pub peers: Vec<u64>,
}

/// Metadata describing the log prefix a snapshot replaces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub conf_state: ConfState,
    /// The last log index covered by this snapshot.
    pub index: u64,
    /// The term of the entry at [`Self::index`].
    pub term: u64,
}

/// An application snapshot plus the log metadata needed to install it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub metadata: SnapshotMetadata,
    pub data: Vec<u8>,
}

impl Snapshot {
    /// A snapshot with a zero last index carries nothing.
    pub fn is_empty(&self) -> bool {
        self.metadata.index == 0
    }
}

/// Membership change kinds. At most one change may be uncommitted at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfChangeType {
    #[default]
    AddNode,
    RemoveNode,
}

/// A single-step membership change carried in a [`EntryType::ConfChange`]
/// entry. The host encodes it into the entry payload and decodes it back
/// when applying.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfChange {
    pub change_type: ConfChangeType,
    pub node_id: u64,
}

/// A raft protocol message.
///
/// Which fields are meaningful depends on `msg_type`; unused fields stay at
/// their default. `reject_hint` and `log_term` together carry the conflict
/// hint of a rejected append: the conflicting term and the first index of
/// that term on the rejecting node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub msg_type: MessageType,
    pub to: u64,
    pub from: u64,
    pub term: u64,
    /// Term of the entry preceding `entries`, or the conflict hint term in
    /// an `AppendResponse`.
    pub log_term: u64,
    /// Index of the entry preceding `entries`, the acknowledged index in an
    /// `AppendResponse`, or the candidate's last index in a `RequestVote`.
    pub index: u64,
    pub entries: Vec<Entry>,
    /// Sender's commit index.
    pub commit: u64,
    pub snapshot: Option<Snapshot>,
    pub reject: bool,
    pub reject_hint: u64,
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}->{} term:{} log_term:{} index:{} commit:{} reject:{} ents:{}",
            self.msg_type,
            self.from,
            self.to,
            self.term,
            self.log_term,
            self.index,
            self.commit,
            self.reject,
            self.entries.len(),
        )
    }
}
