//! # breakerkit-observability
//!
//! Structured logging and OpenTelemetry metrics for BreakerKit.
//!
//! ## Built-in metrics
//! - `breakerkit.transitions` — counter, tagged with breaker + from + to
//! - `breakerkit.requests`    — gauge, tagged with breaker + outcome
//! - `breakerkit.state`       — gauge, tagged with breaker (0 closed, 1 half-open, 2 open)
//!
//! ## Structured logging
//! Text or JSON logs via `tracing-subscriber`, with per-component levels.

pub mod metrics;
pub mod tracing_setup;

pub use metrics::BreakerMetrics;
pub use tracing_setup::{init_tracing, LogConfig};
