//! Three-state circuit breaker: Closed → Open → Half-Open.
//!
//! State transitions:
//! - `Closed` → `Open`:       consecutive failures reach `failure_threshold`
//! - `Open` → `Half-Open`:    first call after `recovery_timeout` has elapsed
//! - `Half-Open` → `Closed`:  `success_threshold` probes succeed
//! - `Half-Open` → `Open`:    any probe fails
//!
//! All mutable state sits behind one mutex. The lock is held only to admit a
//! call and to record its outcome, never while the operation runs, and never
//! while observers are invoked.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Instant;

use crate::config::BreakerConfig;
use crate::context::CallContext;
use crate::error::{BreakerError, ConfigError};
use crate::state::BreakerState;
use crate::stats::Stats;

/// Observer invoked with `(from, to)` on every state transition.
pub type StateChangeCallback = Arc<dyn Fn(BreakerState, BreakerState) + Send + Sync + 'static>;

type Transition = (BreakerState, BreakerState);

struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    last_state_change: Instant,
    /// Probes admitted in the current half-open period and not yet settled.
    in_flight: u32,
    /// Bumped on every transition; outcomes from an older generation only
    /// touch the counters.
    generation: u64,
    total_requests: u64,
    success_requests: u64,
    failure_requests: u64,
    rejected_requests: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            success_count: 0,
            last_state_change: Instant::now(),
            in_flight: 0,
            generation: 0,
            total_requests: 0,
            success_requests: 0,
            failure_requests: 0,
            rejected_requests: 0,
        }
    }

    fn reject(&mut self) {
        self.total_requests += 1;
        self.rejected_requests += 1;
    }

    fn set_state(&mut self, to: BreakerState) -> Transition {
        let from = self.state;
        self.state = to;
        self.generation += 1;
        self.last_state_change = Instant::now();
        self.in_flight = 0;
        self.success_count = 0;
        if to != BreakerState::HalfOpen {
            self.failure_count = 0;
        }
        (from, to)
    }

    fn snapshot(&self) -> Stats {
        Stats {
            total_requests: self.total_requests,
            success_requests: self.success_requests,
            failure_requests: self.failure_requests,
            rejected_requests: self.rejected_requests,
            state: self.state,
        }
    }
}

struct Shared {
    name: Option<String>,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    observers: RwLock<Vec<StateChangeCallback>>,
}

/// Thread-safe circuit breaker protecting one dependency.
///
/// Cloning is cheap and every clone drives the same state machine.
#[derive(Clone)]
pub struct CircuitBreaker {
    shared: Arc<Shared>,
}

/// Non-owning handle returned by [`CircuitBreaker::downgrade`].
#[derive(Clone)]
pub struct WeakCircuitBreaker {
    shared: Weak<Shared>,
}

impl WeakCircuitBreaker {
    pub fn upgrade(&self) -> Option<CircuitBreaker> {
        self.shared.upgrade().map(|shared| CircuitBreaker { shared })
    }
}

impl CircuitBreaker {
    /// Create a breaker in `Closed` state with all counters at zero.
    ///
    /// Fails if `config` violates any of its invariants.
    pub fn new(config: BreakerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(None, config))
    }

    /// Like [`new`](Self::new), with a label attached to every log event.
    pub fn named(name: impl Into<String>, config: BreakerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(Some(name.into()), config))
    }

    /// A breaker with [`BreakerConfig::default`].
    pub fn with_defaults() -> Self {
        Self::build(None, BreakerConfig::default())
    }

    fn build(name: Option<String>, config: BreakerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                name,
                config,
                inner: Mutex::new(BreakerInner::new()),
                observers: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.shared.config
    }

    pub fn name(&self) -> Option<&str> {
        self.shared.name.as_deref()
    }

    /// Instantaneous state. Does not perform the lazy Open → Half-Open step;
    /// that only happens when a call arrives.
    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    /// Consistent snapshot of the cumulative counters.
    pub fn stats(&self) -> Stats {
        self.lock().snapshot()
    }

    /// A handle that does not keep the breaker alive. Observers that need to
    /// read the breaker they are registered on hold one of these.
    pub fn downgrade(&self) -> WeakCircuitBreaker {
        WeakCircuitBreaker {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Register an observer for state transitions.
    ///
    /// Observers run synchronously on the thread that caused the transition,
    /// after the breaker's lock has been released. They should return quickly.
    /// Two transitions caused by different threads can reach observers in
    /// either order; [`stats`](Self::stats) always carries the current state.
    pub fn on_state_change<F>(&self, callback: F)
    where
        F: Fn(BreakerState, BreakerState) + Send + Sync + 'static,
    {
        self.shared
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    /// Run `op` on the calling thread if the circuit admits it.
    ///
    /// Returns the operation's error verbatim as [`BreakerError::Operation`],
    /// or [`BreakerError::Open`] without running `op` when rejected.
    pub fn execute<T, E, F>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let permit = self.acquire::<E>()?;
        match op() {
            Ok(value) => {
                permit.settle(true);
                Ok(value)
            }
            Err(e) => {
                permit.settle(false);
                Err(BreakerError::Operation(e))
            }
        }
    }

    /// Run the future produced by `op` under the breaker's `timeout` and the
    /// context's deadline and cancellation, whichever fires first.
    ///
    /// On deadline the future is dropped and [`BreakerError::DeadlineExceeded`]
    /// is returned; on cancellation [`BreakerError::Cancelled`]. Both count as
    /// failures. The future is polled on the caller's task, so a future that
    /// blocks the thread can only be judged once it returns: a result that
    /// lands after the deadline is still reported as `DeadlineExceeded`. Use
    /// [`execute_blocking_with_context`](Self::execute_blocking_with_context)
    /// for synchronous work.
    pub async fn execute_with_context<T, E, F, Fut>(
        &self,
        ctx: &CallContext,
        op: F,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.acquire::<E>()?;
        let started = tokio::time::Instant::now();
        let deadline = ctx.binding_deadline(self.shared.config.timeout);
        let budget = deadline.saturating_duration_since(started);

        tokio::select! {
            biased;
            _ = ctx.cancelled() => {
                permit.settle(false);
                Err(BreakerError::Cancelled)
            }
            res = tokio::time::timeout_at(deadline, op()) => match res {
                Ok(res) => self.finish_before(permit, deadline, budget, res),
                Err(_) => self.abandon(permit, budget),
            }
        }
    }

    /// Run the synchronous `op` on tokio's blocking pool and wait for it under
    /// the same deadline and cancellation rules as
    /// [`execute_with_context`](Self::execute_with_context).
    ///
    /// The caller gets its answer at the deadline even if `op` is still
    /// running; the blocking task is detached and its eventual result
    /// discarded.
    pub async fn execute_blocking_with_context<T, E, F>(
        &self,
        ctx: &CallContext,
        op: F,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let permit = self.acquire::<E>()?;
        let started = tokio::time::Instant::now();
        let deadline = ctx.binding_deadline(self.shared.config.timeout);
        let budget = deadline.saturating_duration_since(started);
        let handle = tokio::task::spawn_blocking(op);

        tokio::select! {
            biased;
            _ = ctx.cancelled() => {
                permit.settle(false);
                Err(BreakerError::Cancelled)
            }
            joined = handle => match joined {
                Ok(res) => self.finish_before(permit, deadline, budget, res),
                Err(e) if e.is_panic() => {
                    permit.settle(false);
                    std::panic::resume_unwind(e.into_panic())
                }
                Err(_) => {
                    permit.settle(false);
                    Err(BreakerError::Cancelled)
                }
            },
            _ = tokio::time::sleep_until(deadline) => self.abandon(permit, budget),
        }
    }

    /// Settle a finished call, treating anything that finished past
    /// `deadline` as a deadline failure.
    fn finish_before<T, E>(
        &self,
        permit: Permit<'_>,
        deadline: tokio::time::Instant,
        budget: std::time::Duration,
        res: Result<T, E>,
    ) -> Result<T, BreakerError<E>> {
        if tokio::time::Instant::now() > deadline {
            return self.abandon(permit, budget);
        }
        match res {
            Ok(value) => {
                permit.settle(true);
                Ok(value)
            }
            Err(e) => {
                permit.settle(false);
                Err(BreakerError::Operation(e))
            }
        }
    }

    fn abandon<T, E>(
        &self,
        permit: Permit<'_>,
        budget: std::time::Duration,
    ) -> Result<T, BreakerError<E>> {
        tracing::debug!(
            breaker = self.label(),
            budget_ms = budget.as_millis() as u64,
            "call abandoned at deadline"
        );
        permit.settle(false);
        Err(BreakerError::DeadlineExceeded {
            ms: budget.as_millis() as u64,
        })
    }

    /// Admission: rejects, admits, or admits as a half-open probe.
    fn acquire<E>(&self) -> Result<Permit<'_>, BreakerError<E>> {
        let mut transition = None;
        let admitted = {
            let mut inner = self.lock();
            if inner.state == BreakerState::Open {
                if inner.last_state_change.elapsed() >= self.shared.config.recovery_timeout {
                    transition = Some(inner.set_state(BreakerState::HalfOpen));
                    tracing::info!(breaker = self.label(), "circuit breaker → half-open");
                } else {
                    inner.reject();
                    tracing::debug!(breaker = self.label(), "rejected: circuit open");
                }
            }
            match inner.state {
                BreakerState::Closed => Some(inner.generation),
                BreakerState::HalfOpen if inner.in_flight < self.shared.config.max_requests => {
                    inner.in_flight += 1;
                    Some(inner.generation)
                }
                BreakerState::HalfOpen => {
                    inner.reject();
                    tracing::debug!(
                        breaker = self.label(),
                        in_flight = inner.in_flight,
                        "rejected: half-open probe window full"
                    );
                    None
                }
                BreakerState::Open => None,
            }
        };

        if let Some((from, to)) = transition {
            self.notify(from, to);
        }
        match admitted {
            Some(generation) => Ok(Permit {
                breaker: self,
                generation,
                settled: false,
            }),
            None => Err(BreakerError::Open),
        }
    }

    /// Record the outcome of an admitted call.
    fn record(&self, generation: u64, success: bool) {
        let transition = {
            let mut inner = self.lock();
            inner.total_requests += 1;
            if success {
                inner.success_requests += 1;
            } else {
                inner.failure_requests += 1;
            }
            if generation != inner.generation {
                return;
            }
            self.advance(&mut inner, success)
        };

        if let Some((from, to)) = transition {
            self.notify(from, to);
        }
    }

    fn advance(&self, inner: &mut BreakerInner, success: bool) -> Option<Transition> {
        let config = &self.shared.config;
        match (inner.state, success) {
            (BreakerState::Closed, true) => {
                inner.failure_count = 0;
                None
            }
            (BreakerState::Closed, false) => {
                inner.failure_count += 1;
                if inner.failure_count < config.failure_threshold {
                    return None;
                }
                tracing::warn!(
                    breaker = self.label(),
                    failures = inner.failure_count,
                    "circuit breaker → open"
                );
                Some(inner.set_state(BreakerState::Open))
            }
            (BreakerState::HalfOpen, true) => {
                inner.in_flight = inner.in_flight.saturating_sub(1);
                inner.success_count += 1;
                if inner.success_count < config.success_threshold {
                    return None;
                }
                tracing::info!(
                    breaker = self.label(),
                    successes = inner.success_count,
                    "circuit breaker → closed"
                );
                Some(inner.set_state(BreakerState::Closed))
            }
            (BreakerState::HalfOpen, false) => {
                tracing::warn!(breaker = self.label(), "circuit breaker probe failed → open");
                Some(inner.set_state(BreakerState::Open))
            }
            // Generation check makes this unreachable: entering Open bumps it.
            (BreakerState::Open, _) => None,
        }
    }

    fn notify(&self, from: BreakerState, to: BreakerState) {
        let observers: Vec<StateChangeCallback> = self
            .shared
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in observers {
            observer(from, to);
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn label(&self) -> &str {
        self.shared.name.as_deref().unwrap_or("unnamed")
    }

    #[cfg(test)]
    fn backdate(&self, by: std::time::Duration) {
        let mut inner = self.lock();
        if let Some(earlier) = inner.last_state_change.checked_sub(by) {
            inner.last_state_change = earlier;
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish()
    }
}

/// An admitted call. Dropping it unsettled (panic in the operation, or the
/// async caller going away) records a failure.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    settled: bool,
}

impl Permit<'_> {
    fn settle(mut self, success: bool) {
        self.settled = true;
        self.breaker.record(self.generation, success);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.record(self.generation, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn cb(failures: u32, successes: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            BreakerConfig::default()
                .with_failure_threshold(failures)
                .with_success_threshold(successes)
                .with_recovery_timeout(Duration::from_secs(60)),
        )
        .unwrap()
    }

    fn fail(c: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        c.execute(|| Err::<(), _>("boom"))
    }

    fn succeed(c: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        c.execute(|| Ok::<(), &'static str>(()))
    }

    #[test]
    fn starts_closed() {
        let c = cb(5, 1);
        assert_eq!(c.state(), BreakerState::Closed);
        assert_eq!(c.stats().total_requests, 0);
    }

    #[test]
    fn invalid_config_fails_fast() {
        let err = CircuitBreaker::new(BreakerConfig::default().with_failure_threshold(0));
        assert!(err.is_err());
    }

    #[test]
    fn opens_after_threshold_failures() {
        let c = cb(3, 1);
        fail(&c).unwrap_err();
        fail(&c).unwrap_err();
        assert_eq!(c.state(), BreakerState::Closed);
        fail(&c).unwrap_err();
        assert_eq!(c.state(), BreakerState::Open);
    }

    #[test]
    fn open_rejects_without_running() {
        let c = cb(1, 1);
        fail(&c).unwrap_err();

        let ran = AtomicU32::new(0);
        let res: Result<(), BreakerError<&str>> = c.execute(|| {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert!(res.unwrap_err().is_rejected());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(c.stats().rejected_requests, 1);
    }

    #[test]
    fn success_resets_failure_count() {
        let c = cb(3, 1);
        fail(&c).unwrap_err();
        fail(&c).unwrap_err();
        succeed(&c).unwrap();
        fail(&c).unwrap_err();
        fail(&c).unwrap_err();
        assert_eq!(c.state(), BreakerState::Closed);
    }

    #[test]
    fn operation_error_passes_through() {
        let c = cb(5, 1);
        let err = fail(&c).unwrap_err();
        assert_eq!(err.into_operation(), Some("boom"));
    }

    #[test]
    fn half_open_after_recovery_timeout() {
        let c = cb(1, 2);
        fail(&c).unwrap_err();
        c.backdate(Duration::from_secs(61));

        succeed(&c).unwrap();
        assert_eq!(c.state(), BreakerState::HalfOpen);
        succeed(&c).unwrap();
        assert_eq!(c.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_on_failure_reopens() {
        let c = cb(1, 3);
        fail(&c).unwrap_err();
        c.backdate(Duration::from_secs(61));

        succeed(&c).unwrap();
        assert_eq!(c.state(), BreakerState::HalfOpen);
        fail(&c).unwrap_err();
        assert_eq!(c.state(), BreakerState::Open);
        // Recovery timer restarted
        assert!(succeed(&c).unwrap_err().is_rejected());
    }

    #[test]
    fn half_open_probe_cap() {
        let c = CircuitBreaker::new(
            BreakerConfig::default()
                .with_failure_threshold(1)
                .with_success_threshold(5)
                .with_max_requests(1)
                .with_recovery_timeout(Duration::from_secs(60)),
        )
        .unwrap();
        fail(&c).unwrap_err();
        c.backdate(Duration::from_secs(61));

        // The probe is still running when a second call arrives.
        let inner: Result<(), BreakerError<&str>> = c.execute(|| {
            assert!(succeed(&c).unwrap_err().is_rejected());
            Ok(())
        });
        inner.unwrap();
        assert_eq!(c.state(), BreakerState::HalfOpen);
        assert_eq!(c.stats().rejected_requests, 1);

        // Once it settled the window has room again.
        succeed(&c).unwrap();
    }

    #[test]
    fn observers_see_every_transition() {
        let c = cb(1, 1);
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let second = Arc::new(AtomicU32::new(0));
        {
            let seen = seen.clone();
            c.on_state_change(move |from, to| seen.lock().unwrap().push((from, to)));
        }
        {
            let second = second.clone();
            c.on_state_change(move |_, _| {
                second.fetch_add(1, Ordering::SeqCst);
            });
        }

        fail(&c).unwrap_err();
        c.backdate(Duration::from_secs(61));
        succeed(&c).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (BreakerState::Closed, BreakerState::Open),
                (BreakerState::Open, BreakerState::HalfOpen),
                (BreakerState::HalfOpen, BreakerState::Closed),
            ]
        );
        assert_eq!(second.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn panicking_operation_counts_as_failure() {
        let c = cb(1, 1);
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _: Result<(), BreakerError<&str>> = c.execute(|| panic!("kaboom"));
        }));
        assert!(res.is_err());
        assert_eq!(c.state(), BreakerState::Open);
        assert_eq!(c.stats().failure_requests, 1);
    }

    #[test]
    fn clones_share_state() {
        let a = cb(1, 1);
        let b = a.clone();
        fail(&a).unwrap_err();
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn context_success_and_failure() {
        let c = cb(5, 1);
        let ctx = CallContext::background();
        let v: Result<u32, BreakerError<&str>> =
            c.execute_with_context(&ctx, || async { Ok(7) }).await;
        assert_eq!(v.unwrap(), 7);

        let e: Result<u32, BreakerError<&str>> =
            c.execute_with_context(&ctx, || async { Err("nope") }).await;
        assert_eq!(e.unwrap_err().into_operation(), Some("nope"));
        assert_eq!(c.stats().failure_requests, 1);
    }

    #[tokio::test]
    async fn context_deadline_counts_as_failure() {
        let c = CircuitBreaker::new(
            BreakerConfig::default()
                .with_failure_threshold(1)
                .with_timeout(Duration::from_millis(20)),
        )
        .unwrap();
        let res: Result<(), BreakerError<&str>> = c
            .execute_with_context(&CallContext::background(), || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(res.unwrap_err().is_timeout());
        assert_eq!(c.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn cancelled_context_returns_immediately() {
        let c = cb(5, 1);
        let token = tokio_util::sync::CancellationToken::new();
        token.cancel();
        let ctx = CallContext::background().with_cancellation(token);

        let res: Result<(), BreakerError<&str>> = c
            .execute_with_context(&ctx, || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(res.unwrap_err().is_cancelled());
        assert_eq!(c.stats().failure_requests, 1);
    }

    #[tokio::test]
    async fn thread_blocking_future_past_deadline_counts_as_failure() {
        let c = CircuitBreaker::new(
            BreakerConfig::default()
                .with_failure_threshold(5)
                .with_timeout(Duration::from_millis(30)),
        )
        .unwrap();
        let res: Result<(), BreakerError<&str>> = c
            .execute_with_context(&CallContext::background(), || async {
                std::thread::sleep(Duration::from_millis(120));
                Ok(())
            })
            .await;
        assert!(res.unwrap_err().is_timeout());
        let stats = c.stats();
        assert_eq!(stats.failure_requests, 1);
        assert_eq!(stats.success_requests, 0);
    }

    #[tokio::test]
    async fn expired_context_resolves_immediately() {
        let c = cb(5, 1);
        let ctx = CallContext::background().with_deadline(tokio::time::Instant::now());
        let start = std::time::Instant::now();
        let res: Result<(), BreakerError<&str>> = c
            .execute_with_context(&ctx, || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(res.unwrap_err().is_timeout());
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(c.stats().failure_requests, 1);
    }

    #[test]
    fn named_breaker_keeps_label_and_validates() {
        let cb = CircuitBreaker::named("payments", BreakerConfig::default()).unwrap();
        assert_eq!(cb.name(), Some("payments"));
        assert_eq!(cb.state(), BreakerState::Closed);
        assert!(CircuitBreaker::new(BreakerConfig::default()).unwrap().name().is_none());
        let bad = BreakerConfig::default().with_max_requests(0);
        assert!(CircuitBreaker::named("bad", bad).is_err());
    }

    #[test]
    fn stale_outcome_only_touches_counters() {
        let c = cb(1, 3);
        let permit = c.acquire::<&str>().unwrap();

        fail(&c).unwrap_err();
        assert_eq!(c.state(), BreakerState::Open);
        c.backdate(Duration::from_secs(61));
        succeed(&c).unwrap();
        assert_eq!(c.state(), BreakerState::HalfOpen);

        permit.settle(false);
        assert_eq!(c.state(), BreakerState::HalfOpen);
        let stats = c.stats();
        assert_eq!(stats.failure_requests, 2);
        assert_eq!(stats.total_requests, 3);
    }
}
