use std::collections::BTreeMap;
use std::fmt;

use rand::Rng;
use validit::Valid;

use crate::config::Config;
use crate::config::ConfigError;
use crate::errors::Error;
use crate::message::Entry;
use crate::message::HardState;
use crate::message::Message;
use crate::message::MessageType;
use crate::progress::Progress;
use crate::quorum::VoteResult;
use crate::quorum::VoteTally;
use crate::raft_log::RaftLog;
use crate::storage::Storage;
use crate::storage::StorageError;
use crate::NONE;

/// The role of a node in its cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StateRole {
    #[default]
    Follower,
    Candidate,
    Leader,
}

impl fmt::Display for StateRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The deterministic consensus core.
///
/// A pure automaton: the host drives it with [`Raft::tick`] on a logical
/// clock and [`Raft::step`] for every inbound message; the core mutates its
/// in-memory state and enqueues outbound messages, which the host drains in
/// FIFO order and ships over its transport. The core itself never performs
/// I/O.
pub struct Raft<S: Storage> {
    pub id: u64,

    pub term: u64,

    /// Whom we voted for in `term`, or [`NONE`].
    pub vote: u64,

    pub raft_log: Valid<RaftLog<S>>,

    /// Per-peer replication cursors, maintained while leading.
    pub prs: BTreeMap<u64, Progress>,

    pub state: StateRole,

    /// The believed leader of the current term, or [`NONE`].
    pub lead: u64,

    pub(crate) votes: VoteTally,

    /// Outbound queue, drained by the host in FIFO order.
    pub(crate) msgs: Vec<Message>,

    heartbeat_timeout: usize,
    pub(crate) election_timeout: usize,

    /// Election timeout for the current pass, re-drawn from
    /// `[election_timeout, 2 * election_timeout)` on every reset to reduce
    /// split votes.
    pub(crate) randomized_election_timeout: usize,

    heartbeat_elapsed: usize,
    pub(crate) election_elapsed: usize,

    /// Target of an in-flight leadership transfer, or [`NONE`].
    pub lead_transferee: u64,

    /// Index of the latest proposed but not-yet-applied membership change.
    /// While it is above `applied`, no further change may enter the log.
    pub pending_conf_index: u64,
}

impl<S: Storage> Raft<S> {
    /// Create a node from a validated config and its persisted state.
    ///
    /// `config.peers` bootstraps a brand-new cluster; a restart reads the
    /// membership back from storage instead, and setting both is rejected.
    pub fn new(c: &Config, store: S) -> Result<Self, Error> {
        c.validate()?;

        let init = store.initial_state()?;
        let hs = init.hard_state;

        if !c.peers.is_empty() && !init.conf_state.peers.is_empty() {
            return Err(Error::ConfigInvalid(ConfigError::PeersConflict));
        }
        let peers = if c.peers.is_empty() {
            &init.conf_state.peers
        } else {
            &c.peers
        };

        let mut raft_log = RaftLog::new(store)?;
        raft_log.commit_to(hs.commit);

        let mut r = Raft {
            id: c.id,
            term: hs.term,
            vote: hs.vote,
            raft_log: Valid::new(raft_log),
            prs: peers.iter().map(|id| (*id, Progress::default())).collect(),
            state: StateRole::Follower,
            lead: NONE,
            votes: VoteTally::default(),
            msgs: vec![],
            heartbeat_timeout: c.heartbeat_tick,
            election_timeout: c.election_tick,
            randomized_election_timeout: 0,
            heartbeat_elapsed: 0,
            election_elapsed: 0,
            lead_transferee: NONE,
            pending_conf_index: 0,
        };

        if c.applied > 0 {
            r.raft_log.applied_to(c.applied);
        }

        let term = r.term;
        r.become_follower(term, NONE);

        tracing::info!(
            id = r.id,
            term = r.term,
            vote = r.vote,
            committed = r.raft_log.committed,
            last_index = r.raft_log.last_index(),
            peers = debug(r.prs.keys().collect::<Vec<_>>()),
            "new raft node"
        );

        Ok(r)
    }

    /// The crash-persistent triple as of now.
    pub fn hard_state(&self) -> HardState {
        HardState {
            term: self.term,
            vote: self.vote,
            commit: self.raft_log.committed,
        }
    }

    /// Whether this node may campaign: it must be part of the membership.
    pub fn promotable(&self) -> bool {
        self.prs.contains_key(&self.id)
    }

    /// Drain the outbound queue.
    pub fn read_messages(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.msgs)
    }

    /// Enqueue `m` for the host to ship.
    ///
    /// Messages originated here get stamped with our id and term; forwarded
    /// messages (a proposal or transfer request relayed to the leader) keep
    /// their original sender, and proposals stay at term 0 so the receiving
    /// leader stamps them itself.
    pub(crate) fn send(&mut self, mut m: Message) {
        if m.from == NONE {
            m.from = self.id;
        }

        match m.msg_type {
            MessageType::RequestVote | MessageType::RequestVoteResponse => {
                debug_assert!(m.term != 0, "vote messages carry an explicit term");
            }
            MessageType::Propose => {}
            _ => {
                debug_assert_eq!(0, m.term, "message term is stamped on send");
                m.term = self.term;
            }
        }

        tracing::debug!(msg = display(&m), "enqueue message");
        self.msgs.push(m);
    }

    /// Advance the logical clock by one tick.
    pub fn tick(&mut self) {
        match self.state {
            StateRole::Follower | StateRole::Candidate => self.tick_election(),
            StateRole::Leader => self.tick_heartbeat(),
        }
    }

    fn tick_election(&mut self) {
        self.election_elapsed += 1;

        if self.election_elapsed >= self.randomized_election_timeout {
            self.election_elapsed = 0;
            let m = Message {
                msg_type: MessageType::Hup,
                from: self.id,
                ..Default::default()
            };
            if let Err(e) = self.step(m) {
                tracing::warn!(error = display(e), "error starting election");
            }
        }
    }

    fn tick_heartbeat(&mut self) {
        self.heartbeat_elapsed += 1;
        self.election_elapsed += 1;

        if self.election_elapsed >= self.election_timeout {
            self.election_elapsed = 0;

            // A transfer that does not finish within one election timeout is
            // abandoned so the leader accepts proposals again.
            if self.lead_transferee != NONE {
                tracing::info!(
                    transferee = self.lead_transferee,
                    "leadership transfer timed out"
                );
                self.abort_leader_transfer();
            }
        }

        if self.heartbeat_elapsed >= self.heartbeat_timeout {
            self.heartbeat_elapsed = 0;
            let m = Message {
                msg_type: MessageType::Beat,
                from: self.id,
                ..Default::default()
            };
            if let Err(e) = self.step(m) {
                tracing::warn!(error = display(e), "error broadcasting heartbeat");
            }
        }
    }

    /// Shared transition prologue: adopt `term`, forget the leader, zero the
    /// clocks, re-draw the election timeout and drop any transfer in flight.
    fn reset(&mut self, term: u64) {
        if self.term != term {
            self.term = term;
            self.vote = NONE;
        }
        self.lead = NONE;

        self.election_elapsed = 0;
        self.heartbeat_elapsed = 0;
        self.reset_randomized_election_timeout();

        self.abort_leader_transfer();
        self.votes.clear();
    }

    fn reset_randomized_election_timeout(&mut self) {
        let mut rng = rand::thread_rng();
        self.randomized_election_timeout =
            rng.gen_range(self.election_timeout..2 * self.election_timeout);
    }

    pub fn become_follower(&mut self, term: u64, lead: u64) {
        debug_assert!(term >= self.term, "term never regresses");

        self.reset(term);
        self.lead = lead;
        self.state = StateRole::Follower;

        tracing::info!(id = self.id, term = self.term, lead = lead, "became follower");
    }

    pub fn become_candidate(&mut self) {
        assert_ne!(
            StateRole::Leader,
            self.state,
            "invalid transition [leader -> candidate]"
        );

        let term = self.term + 1;
        self.reset(term);
        self.vote = self.id;
        self.state = StateRole::Candidate;

        // Our own ballot is cast right away.
        self.votes.record(self.id, true, self.prs.len());

        tracing::info!(id = self.id, term = self.term, "became candidate");
    }

    pub fn become_leader(&mut self) {
        assert_ne!(
            StateRole::Follower,
            self.state,
            "invalid transition [follower -> leader]"
        );

        self.reset(self.term);
        self.state = StateRole::Leader;
        self.lead = self.id;

        let last_index = self.raft_log.last_index();
        for (id, pr) in self.prs.iter_mut() {
            *pr = Progress::new(last_index + 1);
            if *id == self.id {
                pr.matched = last_index;
            }
        }

        // Conf entries appended by prior leaders may still be unapplied;
        // keep gating new membership changes until the log catches up.
        self.pending_conf_index = last_index;

        tracing::info!(id = self.id, term = self.term, "became leader");

        // Entries of earlier terms are only committed transitively through
        // an entry of the current term, so replicate a no-op at once.
        self.append_entry(vec![Entry::default()]);
        self.bcast_append();
    }

    /// Start a new election pass.
    pub(crate) fn campaign(&mut self) {
        self.become_candidate();

        if self.votes.tally(self.prs.len()) == VoteResult::Won {
            // Single-node cluster: our own ballot is the quorum.
            self.become_leader();
            return;
        }

        let last_index = self.raft_log.last_index();
        let last_term = self.raft_log.last_term();

        let ids: Vec<u64> = self.prs.keys().copied().filter(|id| *id != self.id).collect();
        for id in ids {
            tracing::info!(
                id = self.id,
                to = id,
                term = self.term,
                last_index = last_index,
                last_term = last_term,
                "requesting vote"
            );
            self.send(Message {
                msg_type: MessageType::RequestVote,
                to: id,
                term: self.term,
                index: last_index,
                log_term: last_term,
                ..Default::default()
            });
        }
    }

    /// Record a vote response and tally the election.
    pub(crate) fn poll(&mut self, from: u64, granted: bool) -> VoteResult {
        tracing::info!(
            id = self.id,
            from = from,
            granted = granted,
            term = self.term,
            "vote response"
        );
        self.votes.record(from, granted, self.prs.len())
    }

    /// Stamp term and index onto `es` and append them as the leader.
    pub(crate) fn append_entry(&mut self, mut es: Vec<Entry>) {
        let li = self.raft_log.last_index();
        for (i, e) in es.iter_mut().enumerate() {
            e.term = self.term;
            e.index = li + 1 + i as u64;
        }
        self.raft_log.append(&es);

        let last = self.raft_log.last_index();
        if let Some(pr) = self.prs.get_mut(&self.id) {
            pr.maybe_update(last);
        }

        self.maybe_commit();
    }

    /// Re-evaluate the quorum commit rule after a `matched` change.
    ///
    /// The candidate index is the ⌊N/2⌋-th highest `matched`; it only
    /// commits if its entry is of the current term.
    pub(crate) fn maybe_commit(&mut self) -> bool {
        if self.prs.is_empty() {
            return false;
        }

        let mut matched: Vec<u64> = self.prs.values().map(|pr| pr.matched).collect();
        matched.sort_unstable_by(|a, b| b.cmp(a));
        let quorum_index = matched[self.prs.len() / 2];

        if quorum_index <= self.raft_log.committed {
            return false;
        }
        if self.raft_log.term(quorum_index).unwrap_or(0) != self.term {
            // A prior-term entry is never committed by counting replicas.
            return false;
        }

        self.raft_log.commit_to(quorum_index);
        true
    }

    /// Replicate to `to` whatever its cursor says it is missing.
    ///
    /// Falls back to a snapshot when the needed prefix has been compacted
    /// away. Returns whether a message was enqueued.
    pub(crate) fn send_append(&mut self, to: u64) -> bool {
        let pr = match self.prs.get(&to) {
            Some(pr) => *pr,
            None => return false,
        };

        let prev_index = pr.next_idx - 1;
        let term_res = self.raft_log.term(prev_index);
        let ents_res = self.raft_log.entries_from(pr.next_idx);

        let (prev_term, ents) = match (term_res, ents_res) {
            (Ok(t), Ok(es)) => (t, es),
            (Err(StorageError::Compacted), _) | (_, Err(StorageError::Compacted)) => {
                return self.send_snapshot(to);
            }
            (Err(e), _) | (_, Err(e)) => {
                // The log between first and last index must be readable.
                panic!("fetching entries at {} for {}: {}", prev_index, to, e);
            }
        };

        self.send(Message {
            msg_type: MessageType::Append,
            to,
            index: prev_index,
            log_term: prev_term,
            entries: ents,
            commit: self.raft_log.committed,
            ..Default::default()
        });
        true
    }

    fn send_snapshot(&mut self, to: u64) -> bool {
        let snap = match self.raft_log.snapshot() {
            Ok(s) => s,
            Err(StorageError::SnapshotTemporarilyUnavailable) => {
                tracing::debug!(to = to, "snapshot not ready, skipping this round");
                return false;
            }
            Err(e) => panic!("fetching snapshot for {}: {}", to, e),
        };

        assert!(!snap.is_empty(), "replicating an empty snapshot to {}", to);

        tracing::info!(
            to = to,
            index = snap.metadata.index,
            term = snap.metadata.term,
            "sending snapshot"
        );

        if let Some(pr) = self.prs.get_mut(&to) {
            pr.next_idx = snap.metadata.index + 1;
        }

        self.send(Message {
            msg_type: MessageType::Snapshot,
            to,
            snapshot: Some(snap),
            ..Default::default()
        });
        true
    }

    fn send_heartbeat(&mut self, to: u64) {
        // Cap the advertised commit at what the follower acknowledged, so it
        // never learns a commit index it does not hold entries for.
        let matched = self.prs.get(&to).map(|pr| pr.matched).unwrap_or(0);
        let commit = std::cmp::min(matched, self.raft_log.committed);

        self.send(Message {
            msg_type: MessageType::Heartbeat,
            to,
            commit,
            ..Default::default()
        });
    }

    pub(crate) fn bcast_append(&mut self) {
        let ids: Vec<u64> = self.prs.keys().copied().filter(|id| *id != self.id).collect();
        for id in ids {
            self.send_append(id);
        }
    }

    pub(crate) fn bcast_heartbeat(&mut self) {
        let ids: Vec<u64> = self.prs.keys().copied().filter(|id| *id != self.id).collect();
        for id in ids {
            self.send_heartbeat(id);
        }
    }

    pub(crate) fn send_timeout_now(&mut self, to: u64) {
        self.send(Message {
            msg_type: MessageType::TimeoutNow,
            to,
            ..Default::default()
        });
    }

    pub(crate) fn abort_leader_transfer(&mut self) {
        self.lead_transferee = NONE;
    }

    /// Admit a peer to the progress table, applied by the host once its
    /// conf-change entry commits.
    pub fn add_node(&mut self, id: u64) {
        if self.prs.contains_key(&id) {
            return;
        }

        let next_idx = self.raft_log.last_index() + 1;
        self.prs.insert(id, Progress::new(next_idx));
        tracing::info!(id = self.id, added = id, "added node");
    }

    pub fn remove_node(&mut self, id: u64) {
        self.prs.remove(&id);
        tracing::info!(id = self.id, removed = id, "removed node");

        if self.prs.is_empty() {
            return;
        }

        // The quorum shrank; pending entries may now have enough acks.
        if self.state == StateRole::Leader && self.maybe_commit() {
            self.bcast_append();
        }

        if self.state == StateRole::Leader && self.lead_transferee == id {
            self.abort_leader_transfer();
        }
    }
}
