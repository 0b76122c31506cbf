//! Breaker state enum.

use serde::{Deserialize, Serialize};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Normal operation; failures are counted.
    Closed,
    /// All requests rejected until `recovery_timeout` has elapsed.
    Open,
    /// A bounded number of probe requests test whether the dependency recovered.
    HalfOpen,
}

impl BreakerState {
    /// Numeric encoding used for gauges: 0 closed, 1 half-open, 2 open.
    pub fn as_gauge(self) -> u64 {
        match self {
            Self::Closed => 0,
            Self::HalfOpen => 1,
            Self::Open => 2,
        }
    }
}

impl Default for BreakerState {
    fn default() -> Self {
        Self::Closed
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_serde_names() {
        assert_eq!(BreakerState::HalfOpen.to_string(), "half-open");
        assert_eq!(
            serde_json::to_string(&BreakerState::HalfOpen).unwrap(),
            "\"half_open\""
        );
        let s: BreakerState = serde_json::from_str("\"open\"").unwrap();
        assert_eq!(s, BreakerState::Open);
    }

    #[test]
    fn gauge_ordering() {
        assert!(BreakerState::Closed.as_gauge() < BreakerState::HalfOpen.as_gauge());
        assert!(BreakerState::HalfOpen.as_gauge() < BreakerState::Open.as_gauge());
    }
}
