//! Read-only counter snapshot.

use serde::{Deserialize, Serialize};

use crate::state::BreakerState;

/// Cumulative counters of a breaker plus its state at snapshot time.
///
/// Counters only ever grow; state transitions never reset them. In every
/// snapshot `success_requests + failure_requests + rejected_requests ==
/// total_requests`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub total_requests: u64,
    pub success_requests: u64,
    pub failure_requests: u64,
    pub rejected_requests: u64,
    pub state: BreakerState,
}

impl Stats {
    /// Requests that actually reached the operation.
    pub fn attempted(&self) -> u64 {
        self.success_requests + self.failure_requests
    }

    /// Fraction of attempted requests that failed; `0.0` if none were attempted.
    pub fn failure_rate(&self) -> f64 {
        match self.attempted() {
            0 => 0.0,
            n => self.failure_requests as f64 / n as f64,
        }
    }
}
