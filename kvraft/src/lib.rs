//! A deterministic Raft consensus core.
//!
//! This crate is the consensus half of a replicated key-value system: a
//! pure, single-threaded automaton driving leader election, log replication
//! and membership among a fixed set of peers. It performs no I/O of its own.
//! The host:
//!
//! - drives a logical clock into [`RawNode::tick`],
//! - feeds every inbound message to [`RawNode::step`],
//! - and whenever [`RawNode::has_ready`] reports work, takes a [`Ready`]
//!   bundle, persists its hard state and entries, ships its messages in
//!   FIFO order, applies its committed entries, and acknowledges with
//!   [`RawNode::advance`].
//!
//! Stable storage is abstracted behind the read-only [`Storage`] trait; the
//! `memstore` companion crate provides the in-memory implementation used
//! throughout the tests.

#![deny(unused_qualifications)]

pub mod config;
pub mod errors;
pub mod message;
pub mod node;
pub mod progress;
pub mod quorum;
pub mod raft;
pub mod raft_log;
pub mod storage;

pub use crate::config::Config;
pub use crate::config::ConfigError;
pub use crate::errors::Error;
pub use crate::message::ConfChange;
pub use crate::message::ConfChangeType;
pub use crate::message::ConfState;
pub use crate::message::Entry;
pub use crate::message::EntryType;
pub use crate::message::HardState;
pub use crate::message::Message;
pub use crate::message::MessageType;
pub use crate::message::Snapshot;
pub use crate::message::SnapshotMetadata;
pub use crate::node::RawNode;
pub use crate::node::Ready;
pub use crate::node::SoftState;
pub use crate::progress::Progress;
pub use crate::quorum::VoteResult;
pub use crate::raft::Raft;
pub use crate::raft::StateRole;
pub use crate::raft_log::RaftLog;
pub use crate::storage::InitialState;
pub use crate::storage::Storage;
pub use crate::storage::StorageError;

/// The reserved node id meaning "no leader / no vote".
pub const NONE: u64 = 0;
