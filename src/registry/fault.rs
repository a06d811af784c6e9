//! Faulted-peer bookkeeping

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::network::Peer;

/// A peer that failed a liveness or validity check
#[derive(Debug, Clone)]
pub struct FaultRecord {
    pub peer: Arc<Peer>,
    pub last_fault_time: Instant,
}

impl FaultRecord {
    pub fn new(peer: Arc<Peer>) -> Self {
        Self {
            peer,
            last_fault_time: Instant::now(),
        }
    }

    /// Cooldown check: returns `(eligible, remaining)` where
    /// `remaining = max(0, limit - (now - last_fault_time))`.
    /// Eligibility only permits a recovery attempt; it does not un-fault.
    pub fn check(&self, now: Instant, limit: Duration) -> (bool, Duration) {
        let elapsed = now.saturating_duration_since(self.last_fault_time);
        let remaining = limit.saturating_sub(elapsed);
        (remaining.is_zero(), remaining)
    }

    /// Restart the cooldown after another failed check
    pub fn refresh(&mut self) {
        self.last_fault_time = Instant::now();
    }
}
