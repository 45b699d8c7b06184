//! The leader's view of a follower's replication state.

mod entry;


pub use entry::Progress;
