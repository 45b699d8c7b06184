//! Majority arithmetic and the candidate's per-term vote record.
//!
//! A quorum is any subset of peers strictly larger than half the cluster.

pub(crate) mod tally;


pub use tally::VoteResult;
pub(crate) use tally::VoteTally;
