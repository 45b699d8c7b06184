use std::collections::BTreeMap;

/// The smallest number of peers that constitutes a quorum in a cluster of
/// `n`: strictly more than half.
pub(crate) fn majority(n: usize) -> usize {
    n / 2 + 1
}

/// Outcome of an election tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteResult {
    /// A quorum granted.
    Won,
    /// A quorum denied.
    Lost,
    /// Neither side holds a quorum yet.
    Pending,
}

/// Per-term record of received votes.
///
/// Recording is first-write-wins: a duplicate response from the same peer
/// never double-counts, so tallying is idempotent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct VoteTally {
    votes: BTreeMap<u64, bool>,
}

impl VoteTally {
    /// Record a vote from `from` and return the tally over a cluster of
    /// `cluster_size` voters.
    pub(crate) fn record(&mut self, from: u64, granted: bool, cluster_size: usize) -> VoteResult {
        self.votes.entry(from).or_insert(granted);
        self.tally(cluster_size)
    }

    pub(crate) fn tally(&self, cluster_size: usize) -> VoteResult {
        let granted = self.votes.values().filter(|g| **g).count();
        let denied = self.votes.len() - granted;

        let quorum = majority(cluster_size);
        if granted >= quorum {
            VoteResult::Won
        } else if denied >= quorum {
            VoteResult::Lost
        } else {
            VoteResult::Pending
        }
    }

    // This method is only used by tests.
    #[allow(dead_code)]
    pub(crate) fn granted(&self, id: u64) -> bool {
        self.votes.get(&id).copied().unwrap_or(false)
    }

    pub(crate) fn clear(&mut self) {
        self.votes.clear();
    }
}
