//! breakerkit-core — circuit breaker primitive and metrics registry.
//!
//! # Overview
//!
//! One [`CircuitBreaker`] protects one logical dependency. Every call to that
//! dependency is wrapped in [`CircuitBreaker::execute`] (blocking) or
//! [`CircuitBreaker::execute_with_context`] (async, deadline + cancellation),
//! and the breaker decides whether to run it, run it under a deadline, or
//! reject it outright.
//!
//! ```text
//!            failures >= failure_threshold
//!   Closed ─────────────────────────────────▶ Open
//!     ▲                                        │ recovery_timeout elapsed
//!     │ successes >= success_threshold         ▼ (next call is a probe)
//!     └──────────────────────────────────── HalfOpen
//!                 any probe failure ──▶ Open
//! ```
//!
//! The crate defines:
//!
//! - [`BreakerConfig`] — immutable tuning parameters
//! - [`CircuitBreaker`] — the state machine and execution guard
//! - [`CallContext`] — deadline / cancellation for the async path
//! - [`Stats`] — consistent counter snapshot
//! - [`MetricsRegistry`] — named collection of breakers
//! - [`BreakerError`] / [`ConfigError`] — structured errors
//! - [`unstable`] module — synthetic flaky dependency for tests and simulations

pub mod breaker;
pub mod config;
pub mod context;
pub mod error;
pub mod registry;
pub mod state;
pub mod stats;
pub mod unstable;

pub use breaker::{CircuitBreaker, StateChangeCallback, WeakCircuitBreaker};
pub use config::{default_config, BreakerConfig};
pub use context::CallContext;
pub use error::{BreakerError, ConfigError, OPEN_ERROR_MESSAGE};
pub use registry::MetricsRegistry;
pub use state::BreakerState;
pub use stats::Stats;
pub use unstable::{ServiceError, UnstableService};
