//! Breaker tuning parameters.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for a [`CircuitBreaker`](crate::CircuitBreaker).
///
/// Supplied once at construction and never mutated afterwards. In JSON the
/// durations are integer milliseconds (`timeout_ms`, `recovery_timeout_ms`,
/// `sliding_window_ms`) and every field may be omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that trip `Closed` → `Open`.
    pub failure_threshold: u32,
    /// Consecutive half-open successes required to close the circuit.
    pub success_threshold: u32,
    /// Per-call deadline enforced by `execute_with_context`.
    #[serde(rename = "timeout_ms", with = "millis")]
    pub timeout: Duration,
    /// How long to stay open before the next call is admitted as a probe.
    #[serde(rename = "recovery_timeout_ms", with = "millis")]
    pub recovery_timeout: Duration,
    /// Window over which failures are considered. Counting is consecutive
    /// since the last reset; the window is carried for reporting.
    #[serde(rename = "sliding_window_ms", with = "millis")]
    pub sliding_window: Duration,
    /// Maximum probe calls in flight while half-open.
    pub max_requests: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            timeout: Duration::from_secs(2),
            recovery_timeout: Duration::from_secs(30),
            sliding_window: Duration::from_secs(60),
            max_requests: 10,
        }
    }
}

/// The default configuration.
pub fn default_config() -> BreakerConfig {
    BreakerConfig::default()
}

impl BreakerConfig {
    /// Check every invariant the breaker relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::InvalidThreshold { field: "failure_threshold" });
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::InvalidThreshold { field: "success_threshold" });
        }
        if self.max_requests == 0 {
            return Err(ConfigError::InvalidThreshold { field: "max_requests" });
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroDuration { field: "timeout" });
        }
        if self.recovery_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration { field: "recovery_timeout" });
        }
        Ok(())
    }

    /// Parse a JSON object and validate it.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_failure_threshold(mut self, n: u32) -> Self {
        self.failure_threshold = n;
        self
    }

    pub fn with_success_threshold(mut self, n: u32) -> Self {
        self.success_threshold = n;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    pub fn with_sliding_window(mut self, window: Duration) -> Self {
        self.sliding_window = window;
        self
    }

    pub fn with_max_requests(mut self, n: u32) -> Self {
        self.max_requests = n;
        self
    }
}

/// `Duration` ↔ integer milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
