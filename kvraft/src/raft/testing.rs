//! Shared helpers for the state-machine tests.

use memstore::MemStorage;

use crate::config::Config;
use crate::message::Entry;
use crate::message::Message;
use crate::message::MessageType;
use crate::raft::Raft;

pub(crate) fn new_test_config(
    id: u64,
    peers: Vec<u64>,
    election_tick: usize,
    heartbeat_tick: usize,
) -> Config {
    Config {
        id,
        peers,
        election_tick,
        heartbeat_tick,
        applied: 0,
    }
}

/// A raft node over a `MemStorage`, with the randomized election timeout
/// pinned to its minimum so tick arithmetic is deterministic.
pub(crate) fn new_test_raft(
    id: u64,
    peers: Vec<u64>,
    election_tick: usize,
    heartbeat_tick: usize,
    store: MemStorage,
) -> Raft<MemStorage> {
    let config = new_test_config(id, peers, election_tick, heartbeat_tick);
    let mut r = Raft::new(&config, store).expect("failed to create test raft");
    r.randomized_election_timeout = r.election_timeout;
    r
}

pub(crate) fn msg(from: u64, to: u64, term: u64, msg_type: MessageType) -> Message {
    Message {
        msg_type,
        from,
        to,
        term,
        ..Default::default()
    }
}

pub(crate) fn ent(index: u64, term: u64) -> Entry {
    Entry::new(index, term, vec![])
}

/// Drive a node from follower to leader by feeding it the required grants.
pub(crate) fn elect(r: &mut Raft<MemStorage>, voters: &[u64]) {
    r.step(Message {
        msg_type: MessageType::Hup,
        from: r.id,
        ..Default::default()
    })
    .expect("campaign");
    let term = r.term;
    for id in voters {
        r.step(msg(*id, r.id, term, MessageType::RequestVoteResponse))
            .expect("vote response");
    }
}
