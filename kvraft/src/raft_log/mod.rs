//! In-memory window over the persisted log.

mod log;


pub use log::RaftLog;
