//! Message dispatch: the term preamble, the universal handlers, and the
//! per-role routing.

use crate::errors::Error;
use crate::message::Entry;
use crate::message::EntryType;
use crate::message::Message;
use crate::message::MessageType;
use crate::progress::Progress;
use crate::quorum::VoteResult;
use crate::raft::Raft;
use crate::raft::StateRole;
use crate::storage::Storage;
use crate::NONE;

impl<S: Storage> Raft<S> {
    /// Feed one message into the node.
    ///
    /// Classification runs in three stages: the term preamble (adopt or drop
    /// by term), the handlers every role shares (`Hup`, `RequestVote`), and
    /// the per-role handlers for everything else.
    pub fn step(&mut self, m: Message) -> Result<(), Error> {
        if m.term == 0 {
            // A local message; terms do not apply.
        } else if m.term > self.term {
            if m.msg_type == MessageType::RequestVote {
                // Leader lease: while we heard from a live leader within the
                // election timeout, a campaigning peer is ignored outright,
                // not even answered.
                let in_lease =
                    self.lead != NONE && self.election_elapsed < self.election_timeout;
                if in_lease {
                    tracing::info!(
                        id = self.id,
                        from = m.from,
                        msg_term = m.term,
                        term = self.term,
                        lead = self.lead,
                        remaining_ticks = self.election_timeout - self.election_elapsed,
                        "ignoring vote request, lease has not expired"
                    );
                    return Ok(());
                }
            }

            tracing::info!(
                id = self.id,
                msg_type = display(m.msg_type),
                from = m.from,
                msg_term = m.term,
                term = self.term,
                "received a message with higher term"
            );
            match m.msg_type {
                MessageType::Append | MessageType::Heartbeat | MessageType::Snapshot => {
                    self.become_follower(m.term, m.from);
                }
                _ => {
                    self.become_follower(m.term, NONE);
                }
            }
        } else if m.term < self.term {
            // Older-term messages convey no authority.
            tracing::info!(
                id = self.id,
                msg_type = display(m.msg_type),
                from = m.from,
                msg_term = m.term,
                term = self.term,
                "ignoring a message with lower term"
            );
            return Ok(());
        }

        match m.msg_type {
            MessageType::Hup => {
                self.hup();
                Ok(())
            }
            MessageType::RequestVote => {
                self.handle_request_vote(&m);
                Ok(())
            }
            _ => match self.state {
                StateRole::Follower => self.step_follower(m),
                StateRole::Candidate => self.step_candidate(m),
                StateRole::Leader => self.step_leader(m),
            },
        }
    }

    fn hup(&mut self) {
        if self.state == StateRole::Leader {
            tracing::debug!(id = self.id, "already leader, ignoring campaign trigger");
            return;
        }

        if !self.promotable() {
            tracing::warn!(id = self.id, "not in the membership, cannot campaign");
            return;
        }

        tracing::info!(id = self.id, term = self.term, "starting a new election");
        self.campaign();
    }

    /// Decide a vote request that passed the term preamble.
    ///
    /// Grant iff we are free to vote for the candidate in this term (repeat
    /// vote, or no vote cast and no leader known) and its log is at least as
    /// up-to-date as ours.
    fn handle_request_vote(&mut self, m: &Message) {
        let can_vote = self.vote == m.from || (self.vote == NONE && self.lead == NONE);

        if can_vote && self.raft_log.is_up_to_date(m.index, m.log_term) {
            tracing::info!(
                id = self.id,
                to = m.from,
                term = self.term,
                "casting vote"
            );
            self.election_elapsed = 0;
            self.vote = m.from;
            self.send(Message {
                msg_type: MessageType::RequestVoteResponse,
                to: m.from,
                term: self.term,
                ..Default::default()
            });
        } else {
            tracing::info!(
                id = self.id,
                to = m.from,
                term = self.term,
                vote = self.vote,
                lead = self.lead,
                "rejecting vote request"
            );
            self.send(Message {
                msg_type: MessageType::RequestVoteResponse,
                to: m.from,
                term: self.term,
                reject: true,
                ..Default::default()
            });
        }
    }

    fn step_follower(&mut self, mut m: Message) -> Result<(), Error> {
        match m.msg_type {
            MessageType::Propose => {
                if self.lead == NONE {
                    tracing::info!(id = self.id, term = self.term, "no leader, dropping proposal");
                    return Err(Error::ProposalDropped);
                }
                m.to = self.lead;
                self.send(m);
            }
            MessageType::Append => {
                self.election_elapsed = 0;
                self.lead = m.from;
                self.handle_append_entries(&m);
            }
            MessageType::Heartbeat => {
                self.election_elapsed = 0;
                self.lead = m.from;
                self.handle_heartbeat(&m);
            }
            MessageType::Snapshot => {
                self.election_elapsed = 0;
                self.lead = m.from;
                self.handle_snapshot(m);
            }
            MessageType::TransferLeader => {
                if self.lead == NONE {
                    tracing::info!(id = self.id, "no leader, dropping transfer request");
                    return Ok(());
                }
                m.to = self.lead;
                self.send(m);
            }
            MessageType::TimeoutNow => {
                if !self.promotable() {
                    tracing::warn!(id = self.id, "not in the membership, ignoring transfer order");
                    return Ok(());
                }
                tracing::info!(
                    id = self.id,
                    from = m.from,
                    term = self.term,
                    "received a transfer order, campaigning immediately"
                );
                self.campaign();
            }
            _ => {}
        }
        Ok(())
    }

    fn step_candidate(&mut self, m: Message) -> Result<(), Error> {
        match m.msg_type {
            MessageType::Propose => {
                tracing::info!(id = self.id, term = self.term, "not leader, dropping proposal");
                return Err(Error::ProposalDropped);
            }
            // A same-term Append/Heartbeat/Snapshot means this term elected
            // someone else; step down and handle it as a follower.
            MessageType::Append => {
                self.become_follower(m.term, m.from);
                self.handle_append_entries(&m);
            }
            MessageType::Heartbeat => {
                self.become_follower(m.term, m.from);
                self.handle_heartbeat(&m);
            }
            MessageType::Snapshot => {
                self.become_follower(m.term, m.from);
                self.handle_snapshot(m);
            }
            MessageType::RequestVoteResponse => {
                match self.poll(m.from, !m.reject) {
                    VoteResult::Won => self.become_leader(),
                    VoteResult::Lost => self.become_follower(self.term, NONE),
                    VoteResult::Pending => {}
                }
            }
            MessageType::TimeoutNow => {
                tracing::debug!(id = self.id, "already campaigning, ignoring transfer order");
            }
            _ => {}
        }
        Ok(())
    }

    fn step_leader(&mut self, m: Message) -> Result<(), Error> {
        match m.msg_type {
            MessageType::Beat => {
                self.bcast_heartbeat();
            }
            MessageType::Propose => {
                return self.handle_propose(m);
            }
            MessageType::AppendResponse => {
                self.handle_append_response(&m);
            }
            MessageType::HeartbeatResponse => {
                let last_index = self.raft_log.last_index();
                let behind = self
                    .prs
                    .get(&m.from)
                    .map(|pr| pr.matched < last_index)
                    .unwrap_or(false);
                if behind {
                    self.send_append(m.from);
                }
            }
            MessageType::TransferLeader => {
                self.handle_transfer_leader(&m);
            }
            _ => {}
        }
        Ok(())
    }

    fn handle_propose(&mut self, mut m: Message) -> Result<(), Error> {
        if m.entries.is_empty() {
            tracing::warn!(id = self.id, "dropping an empty proposal");
            return Err(Error::ProposalDropped);
        }

        if !self.prs.contains_key(&self.id) {
            // This node was removed from the cluster while leading.
            return Err(Error::ProposalDropped);
        }

        if self.lead_transferee != NONE {
            tracing::debug!(
                id = self.id,
                transferee = self.lead_transferee,
                "leadership transfer in progress, dropping proposal"
            );
            return Err(Error::ProposalDropped);
        }

        for (i, e) in m.entries.iter_mut().enumerate() {
            if e.entry_type != EntryType::ConfChange {
                continue;
            }

            // At most one uncommitted membership change at a time; a second
            // one degrades to a no-op instead of entering the log.
            if self.pending_conf_index > self.raft_log.applied {
                tracing::info!(
                    id = self.id,
                    pending = self.pending_conf_index,
                    applied = self.raft_log.applied,
                    "a membership change is in flight, replacing proposal with a no-op"
                );
                *e = Entry::default();
            } else {
                self.pending_conf_index = self.raft_log.last_index() + 1 + i as u64;
            }
        }

        self.append_entry(m.entries);
        self.bcast_append();
        Ok(())
    }

    fn handle_append_response(&mut self, m: &Message) {
        if !self.prs.contains_key(&m.from) {
            tracing::debug!(id = self.id, from = m.from, "response from unknown peer");
            return;
        }

        if m.reject {
            tracing::debug!(
                id = self.id,
                from = m.from,
                rejected = m.index,
                hint = m.reject_hint,
                conflict_term = m.log_term,
                "append was rejected"
            );

            let mut retry = false;
            if let Some(pr) = self.prs.get_mut(&m.from) {
                retry = pr.maybe_decr_to(m.index, m.reject_hint);
            }
            if retry {
                self.send_append(m.from);
            }
            return;
        }

        let mut updated = false;
        if let Some(pr) = self.prs.get_mut(&m.from) {
            updated = pr.maybe_update(m.index);
        }
        if !updated {
            return;
        }

        if self.maybe_commit() {
            // Spread the new commit index right away.
            self.bcast_append();
        } else {
            let more = self
                .prs
                .get(&m.from)
                .map(|pr| pr.next_idx <= self.raft_log.last_index())
                .unwrap_or(false);
            if more {
                self.send_append(m.from);
            }
        }

        let caught_up = self
            .prs
            .get(&m.from)
            .map(|pr| pr.matched == self.raft_log.last_index())
            .unwrap_or(false);
        if self.lead_transferee == m.from && caught_up {
            tracing::info!(
                id = self.id,
                transferee = m.from,
                "transfer target caught up, ordering it to campaign"
            );
            self.send_timeout_now(m.from);
        }
    }

    fn handle_transfer_leader(&mut self, m: &Message) {
        let transferee = m.from;

        if transferee == self.id {
            tracing::debug!(id = self.id, "already leading, ignoring transfer to self");
            return;
        }

        if !self.prs.contains_key(&transferee) {
            tracing::debug!(
                id = self.id,
                transferee = transferee,
                "transfer target is not in the membership"
            );
            return;
        }

        if self.lead_transferee == transferee {
            tracing::info!(
                id = self.id,
                transferee = transferee,
                "transfer already in progress"
            );
            return;
        }
        if self.lead_transferee != NONE {
            self.abort_leader_transfer();
        }

        self.lead_transferee = transferee;
        self.election_elapsed = 0;
        tracing::info!(id = self.id, transferee = transferee, "transferring leadership");

        let caught_up = self
            .prs
            .get(&transferee)
            .map(|pr| pr.matched == self.raft_log.last_index())
            .unwrap_or(false);
        if caught_up {
            self.send_timeout_now(transferee);
        } else {
            self.send_append(transferee);
        }
    }

    /// Follower-side log replication.
    fn handle_append_entries(&mut self, m: &Message) {
        if m.index < self.raft_log.committed {
            // Everything up to the commit watermark is immutable; just tell
            // the leader where we stand.
            self.send(Message {
                msg_type: MessageType::AppendResponse,
                to: m.from,
                index: self.raft_log.committed,
                ..Default::default()
            });
            return;
        }

        match self
            .raft_log
            .maybe_append(m.index, m.log_term, m.commit, &m.entries)
        {
            Some(last_new) => {
                self.send(Message {
                    msg_type: MessageType::AppendResponse,
                    to: m.from,
                    index: last_new,
                    ..Default::default()
                });
            }
            None => {
                let (conflict_term, hint) = self.raft_log.find_conflict_hint(m.index);
                tracing::debug!(
                    id = self.id,
                    from = m.from,
                    index = m.index,
                    log_term = m.log_term,
                    conflict_term = conflict_term,
                    hint = hint,
                    "rejecting append, log mismatch"
                );
                self.send(Message {
                    msg_type: MessageType::AppendResponse,
                    to: m.from,
                    index: m.index,
                    log_term: conflict_term,
                    reject: true,
                    reject_hint: hint,
                    ..Default::default()
                });
            }
        }
    }

    fn handle_heartbeat(&mut self, m: &Message) {
        let to_commit = std::cmp::min(m.commit, self.raft_log.last_index());
        self.raft_log.commit_to(to_commit);

        self.send(Message {
            msg_type: MessageType::HeartbeatResponse,
            to: m.from,
            ..Default::default()
        });
    }

    /// Follower-side snapshot install.
    fn handle_snapshot(&mut self, m: Message) {
        let snap = match m.snapshot {
            Some(s) => s,
            None => {
                tracing::warn!(id = self.id, from = m.from, "snapshot message without payload");
                return;
            }
        };

        if snap.metadata.index <= self.raft_log.committed {
            tracing::info!(
                id = self.id,
                index = snap.metadata.index,
                committed = self.raft_log.committed,
                "ignoring stale snapshot"
            );
            self.send(Message {
                msg_type: MessageType::AppendResponse,
                to: m.from,
                index: self.raft_log.last_index(),
                ..Default::default()
            });
            return;
        }

        // The snapshot's membership replaces ours wholesale.
        self.prs = snap
            .metadata
            .conf_state
            .peers
            .iter()
            .map(|id| (*id, Progress::default()))
            .collect();

        self.raft_log.restore(snap);

        self.send(Message {
            msg_type: MessageType::AppendResponse,
            to: m.from,
            index: self.raft_log.last_index(),
            ..Default::default()
        });
    }
}
