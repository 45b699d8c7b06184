/// Errors raised when a [`Config`](crate::Config) fails validation.
///
/// These are programmer errors: the node is never created.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("id must not be zero")]
    NodeIdZero,

    #[error("heartbeat tick({0}) must be greater than 0")]
    HeartbeatTick(usize),

    #[error("election tick({election_tick}) must be greater than heartbeat tick({heartbeat_tick})")]
    ElectionTick {
        election_tick: usize,
        heartbeat_tick: usize,
    },

    #[error("bootstrap peers and a persisted membership must not both be set")]
    PeersConflict,
}
