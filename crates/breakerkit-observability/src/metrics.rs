//! BreakerKit metrics definitions.
//!
//! All metrics use OpenTelemetry conventions and go to whatever meter
//! provider the application installed.

use breakerkit_core::{BreakerState, CircuitBreaker, MetricsRegistry, Stats};
use opentelemetry::{
    metrics::{Counter, Gauge, Meter},
    KeyValue,
};

/// Central metrics handle for BreakerKit.
#[derive(Clone)]
pub struct BreakerMetrics {
    pub transitions: Counter<u64>,
    pub requests: Gauge<u64>,
    pub state: Gauge<u64>,
}

impl BreakerMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            transitions: meter
                .u64_counter("breakerkit.transitions")
                .with_description("Circuit breaker state transitions")
                .build(),
            requests: meter
                .u64_gauge("breakerkit.requests")
                .with_description("Cumulative requests per breaker, by outcome")
                .build(),
            state: meter
                .u64_gauge("breakerkit.state")
                .with_description("Current breaker state: 0 closed, 1 half-open, 2 open")
                .build(),
        }
    }

    /// Count every transition of `breaker` under `name`, and refresh its
    /// gauges from a fresh snapshot each time.
    pub fn attach(&self, name: &str, breaker: &CircuitBreaker) {
        let metrics = self.clone();
        let name = name.to_string();
        let handle = breaker.downgrade();
        breaker.on_state_change(move |from, to| {
            metrics.record_transition(&name, from, to);
            if let Some(breaker) = handle.upgrade() {
                metrics.record_stats(&name, &breaker.stats());
            }
        });
    }

    /// Count one transition.
    ///
    /// Observers from different threads may deliver transitions out of
    /// order, so the `state` gauge is not set here; it is only published
    /// from snapshots in [`record_stats`](Self::record_stats).
    pub fn record_transition(&self, breaker: &str, from: BreakerState, to: BreakerState) {
        self.transitions.add(
            1,
            &[
                KeyValue::new("breaker", breaker.to_string()),
                KeyValue::new("from", from.to_string()),
                KeyValue::new("to", to.to_string()),
            ],
        );
    }

    pub fn record_stats(&self, breaker: &str, stats: &Stats) {
        for (outcome, value) in outcome_values(stats) {
            self.requests.record(
                value,
                &[
                    KeyValue::new("breaker", breaker.to_string()),
                    KeyValue::new("outcome", outcome),
                ],
            );
        }
        self.state.record(
            stats.state.as_gauge(),
            &[KeyValue::new("breaker", breaker.to_string())],
        );
    }

    /// Publish a snapshot of every breaker in `registry`.
    pub fn record_registry(&self, registry: &MetricsRegistry) {
        for (name, stats) in registry.all_stats() {
            self.record_stats(&name, &stats);
        }
    }
}

fn outcome_values(stats: &Stats) -> [(&'static str, u64); 4] {
    [
        ("total", stats.total_requests),
        ("success", stats.success_requests),
        ("failure", stats.failure_requests),
        ("rejected", stats.rejected_requests),
    ]
}
