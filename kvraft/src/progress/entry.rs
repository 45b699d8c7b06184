use std::fmt;

/// Replication cursor for one follower.
///
/// `matched` is the highest index known replicated on the follower and only
/// ever grows. `next_idx` is the index of the next entry to send; it moves
/// backwards while the leader probes for the point where the two logs agree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub matched: u64,
    pub next_idx: u64,
}

impl Progress {
    pub fn new(next_idx: u64) -> Self {
        Self {
            matched: 0,
            next_idx,
        }
    }

    /// Acknowledge replication up to `n`.
    ///
    /// Returns true iff `matched` actually advanced, i.e. the ack was not a
    /// reordered duplicate.
    pub fn maybe_update(&mut self, n: u64) -> bool {
        let updated = n > self.matched;
        if updated {
            self.matched = n;
        }
        self.next_idx = std::cmp::max(self.next_idx, n + 1);
        updated
    }

    /// Back the cursor off after a rejected append.
    ///
    /// `rejected` is the prev-index the follower refused; `match_hint` is the
    /// follower's conflict hint (first index of the conflicting term, or one
    /// past its last index when its log is short). Returns false for stale
    /// rejections that would move the cursor onto already-acknowledged
    /// entries or that do not refer to the probe in flight.
    pub fn maybe_decr_to(&mut self, rejected: u64, match_hint: u64) -> bool {
        if rejected <= self.matched {
            // The follower acknowledged this index already.
            return false;
        }

        if rejected != self.next_idx - 1 {
            // Not a response to the probe we last sent.
            return false;
        }

        let next = std::cmp::min(rejected, match_hint);
        self.next_idx = std::cmp::max(next, self.matched + 1).max(1);

        tracing::debug!(
            rejected = rejected,
            match_hint = match_hint,
            next_idx = self.next_idx,
            "append rejected, backing off"
        );

        true
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[matched={}, next={}]", self.matched, self.next_idx)
    }
}
