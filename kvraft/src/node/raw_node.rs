use crate::config::Config;
use crate::errors::Error;
use crate::message::ConfChange;
use crate::message::ConfChangeType;
use crate::message::ConfState;
use crate::message::Entry;
use crate::message::EntryType;
use crate::message::HardState;
use crate::message::Message;
use crate::message::MessageType;
use crate::message::Snapshot;
use crate::raft::Raft;
use crate::raft::StateRole;
use crate::storage::Storage;

/// Volatile state the host may want to observe but never needs to persist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SoftState {
    pub lead: u64,
    pub raft_state: StateRole,
}

/// Everything the host must act on since the last [`RawNode::advance`]:
/// persist `hard_state` and `entries`, install `snapshot`, apply
/// `committed_entries`, and ship `messages` in order.
///
/// Hard state and entries must hit stable storage before the messages go
/// out; a message must never justify state its sender might forget in a
/// crash.
#[derive(Debug, Clone, Default)]
pub struct Ready {
    ss: Option<SoftState>,
    hs: Option<HardState>,
    entries: Vec<Entry>,
    snapshot: Option<Snapshot>,
    committed_entries: Vec<Entry>,
    messages: Vec<Message>,

    // Watermarks recorded at creation, so `advance` stays correct even
    // after the host takes the vecs out of the bundle.
    stable_to: Option<u64>,
    apply_to: Option<u64>,
}

impl Ready {
    /// The new role/leader, if either changed.
    pub fn soft_state(&self) -> Option<&SoftState> {
        self.ss.as_ref()
    }

    /// The hard state to persist, if it changed.
    pub fn hard_state(&self) -> Option<&HardState> {
        self.hs.as_ref()
    }

    /// Entries to persist before sending `messages`.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// A snapshot to install into storage and the state machine.
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    /// Entries ready to be applied to the state machine.
    pub fn committed_entries(&self) -> &[Entry] {
        &self.committed_entries
    }

    /// Outbound messages, to be shipped in FIFO order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn take_messages(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.messages)
    }

    pub fn take_committed_entries(&mut self) -> Vec<Entry> {
        std::mem::take(&mut self.committed_entries)
    }
}

/// The consensus core plus the bookkeeping that decides what goes into the
/// next [`Ready`].
///
/// The host owns the event loop: tick a logical clock into [`RawNode::tick`],
/// feed network traffic to [`RawNode::step`], and whenever
/// [`RawNode::has_ready`] says so, take a [`Ready`], act on it, and call
/// [`RawNode::advance`]. All calls must come from one thread.
pub struct RawNode<S: Storage> {
    pub raft: Raft<S>,
    prev_ss: SoftState,
    prev_hs: HardState,
}

impl<S: Storage> RawNode<S> {
    pub fn new(config: &Config, store: S) -> Result<Self, Error> {
        let raft = Raft::new(config, store)?;
        let prev_ss = SoftState {
            lead: raft.lead,
            raft_state: raft.state,
        };
        let prev_hs = raft.hard_state();

        Ok(Self {
            raft,
            prev_ss,
            prev_hs,
        })
    }

    fn soft_state(&self) -> SoftState {
        SoftState {
            lead: self.raft.lead,
            raft_state: self.raft.state,
        }
    }

    /// Advance the logical clock by one tick.
    pub fn tick(&mut self) {
        self.raft.tick();
    }

    /// Campaign without waiting for the election timeout.
    pub fn campaign(&mut self) -> Result<(), Error> {
        self.raft.step(Message {
            msg_type: MessageType::Hup,
            ..Default::default()
        })
    }

    /// Propose an application payload for replication.
    pub fn propose(&mut self, data: Vec<u8>) -> Result<(), Error> {
        self.raft.step(Message {
            msg_type: MessageType::Propose,
            entries: vec![Entry {
                data,
                ..Default::default()
            }],
            ..Default::default()
        })
    }

    /// Propose a membership change. `data` is the host-encoded
    /// [`ConfChange`]; it comes back in a committed entry for
    /// [`RawNode::apply_conf_change`].
    pub fn propose_conf_change(&mut self, data: Vec<u8>) -> Result<(), Error> {
        self.raft.step(Message {
            msg_type: MessageType::Propose,
            entries: vec![Entry {
                entry_type: EntryType::ConfChange,
                data,
                ..Default::default()
            }],
            ..Default::default()
        })
    }

    /// Apply a committed membership change and return the resulting
    /// membership for the host to persist.
    pub fn apply_conf_change(&mut self, cc: &ConfChange) -> ConfState {
        match cc.change_type {
            ConfChangeType::AddNode => self.raft.add_node(cc.node_id),
            ConfChangeType::RemoveNode => self.raft.remove_node(cc.node_id),
        }

        ConfState {
            peers: self.raft.prs.keys().copied().collect(),
        }
    }

    /// Ask the leader to hand leadership to `transferee`.
    pub fn transfer_leader(&mut self, transferee: u64) -> Result<(), Error> {
        self.raft.step(Message {
            msg_type: MessageType::TransferLeader,
            from: transferee,
            ..Default::default()
        })
    }

    /// Feed a message received from the network.
    pub fn step(&mut self, m: Message) -> Result<(), Error> {
        if m.msg_type.is_local() {
            return Err(Error::StepLocalMsg);
        }
        if m.msg_type.is_response() && !self.raft.prs.contains_key(&m.from) {
            return Err(Error::StepPeerNotFound);
        }
        self.raft.step(m)
    }

    /// Whether a [`Ready`] is pending.
    pub fn has_ready(&self) -> bool {
        if !self.raft.msgs.is_empty() {
            return true;
        }
        if self.raft.raft_log.pending_snapshot().is_some() {
            return true;
        }
        if !self.raft.raft_log.unstable_entries().is_empty() {
            return true;
        }
        if self.raft.raft_log.has_next_ents() {
            return true;
        }

        self.soft_state() != self.prev_ss || self.raft.hard_state() != self.prev_hs
    }

    /// Collect everything the host must act on.
    pub fn ready(&mut self) -> Ready {
        let ss = self.soft_state();
        let hs = self.raft.hard_state();

        let entries = self.raft.raft_log.unstable_entries().to_vec();
        let committed_entries = self.raft.raft_log.next_ents();

        Ready {
            ss: (ss != self.prev_ss).then_some(ss),
            hs: (hs != self.prev_hs).then_some(hs),
            stable_to: entries.last().map(|e| e.index),
            apply_to: committed_entries.last().map(|e| e.index),
            entries,
            snapshot: self.raft.raft_log.pending_snapshot().cloned(),
            committed_entries,
            messages: self.raft.read_messages(),
        }
    }

    /// Acknowledge a [`Ready`]: the host has persisted, installed, applied
    /// and shipped its contents, so the watermarks may move.
    pub fn advance(&mut self, rd: Ready) {
        if let Some(ss) = rd.ss {
            self.prev_ss = ss;
        }
        if let Some(hs) = rd.hs {
            self.prev_hs = hs;
        }

        if rd.snapshot.is_some() {
            self.raft.raft_log.take_pending_snapshot();
        }
        if let Some(idx) = rd.stable_to {
            self.raft.raft_log.stable_to(idx);
        }
        if let Some(idx) = rd.apply_to {
            self.raft.raft_log.applied_to(idx);
        }
    }
}
