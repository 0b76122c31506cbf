//! A synthetic flaky dependency for exercising breakers.
//!
//! Not part of the breaker's contract: it exists so tests and the CLI
//! simulator have something that fails on demand.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

/// Failure reported by [`UnstableService`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unstable service failed (call #{call})")]
pub struct ServiceError {
    /// 1-based index of the failing call.
    pub call: u64,
}

/// Fails with a fixed probability, optionally after a fixed delay.
pub struct UnstableService {
    failure_rate: f64,
    delay: Duration,
    rng: Mutex<StdRng>,
    calls: AtomicU64,
    failures: AtomicU64,
}

impl UnstableService {
    /// `failure_rate` is clamped to `[0, 1]`.
    pub fn new(failure_rate: f64) -> Self {
        Self {
            failure_rate: clamp_rate(failure_rate),
            delay: Duration::ZERO,
            rng: Mutex::new(StdRng::from_entropy()),
            calls: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Sleep this long before every answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Deterministic failure sequence.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn failure_rate(&self) -> f64 {
        self.failure_rate
    }

    /// Blocking call; sleeps the calling thread for the configured delay.
    pub fn call(&self) -> Result<(), ServiceError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.roll()
    }

    /// Async call; sleeps on the tokio timer for the configured delay.
    pub async fn call_async(&self) -> Result<(), ServiceError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.roll()
    }

    /// Calls answered so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Calls that failed so far.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    fn roll(&self) -> Result<(), ServiceError> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        let failed = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            rng.gen_bool(self.failure_rate)
        };
        if failed {
            self.failures.fetch_add(1, Ordering::Relaxed);
            Err(ServiceError { call })
        } else {
            Ok(())
        }
    }
}

fn clamp_rate(rate: f64) -> f64 {
    if rate.is_nan() {
        0.0
    } else {
        rate.clamp(0.0, 1.0)
    }
}

impl std::fmt::Debug for UnstableService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnstableService")
            .field("failure_rate", &self.failure_rate)
            .field("delay", &self.delay)
            .field("calls", &self.calls())
            .finish()
    }
}
