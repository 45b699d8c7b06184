use crate::config::ConfigError;
use crate::NONE;

/// Parameters for starting a raft node.
///
/// The storage handle is passed to [`Raft::new`](crate::raft::Raft::new)
/// alongside the config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// The identity of the local node. Must not be zero.
    pub id: u64,

    /// Ids of all peers (including self) when bootstrapping a new cluster.
    ///
    /// Must be empty when restarting from persisted state; the membership is
    /// then read back from storage.
    pub peers: Vec<u64>,

    /// Ticks that must elapse without hearing from a leader before a
    /// follower campaigns. Must be greater than `heartbeat_tick`; a 10x
    /// ratio avoids needless leader churn.
    pub election_tick: usize,

    /// Ticks between two heartbeat broadcasts of a leader.
    pub heartbeat_tick: usize,

    /// The index already applied to the state machine, set on restart so
    /// committed entries below it are not handed out again.
    pub applied: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            id: NONE,
            peers: vec![],
            election_tick: 10,
            heartbeat_tick: 1,
            applied: 0,
        }
    }
}

impl Config {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id == NONE {
            return Err(ConfigError::NodeIdZero);
        }

        if self.heartbeat_tick == 0 {
            return Err(ConfigError::HeartbeatTick(self.heartbeat_tick));
        }

        if self.election_tick <= self.heartbeat_tick {
            return Err(ConfigError::ElectionTick {
                election_tick: self.election_tick,
                heartbeat_tick: self.heartbeat_tick,
            });
        }

        Ok(())
    }
}
