//! Deadline and cancellation carried into `execute_with_context`.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Caller-supplied bounds for a single guarded call.
///
/// The breaker's own `timeout` always applies; a context deadline only
/// matters when it is earlier. Cancelling the token makes the pending call
/// return [`BreakerError::Cancelled`](crate::BreakerError::Cancelled) at once.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: Option<CancellationToken>,
}

impl CallContext {
    /// A context with no deadline and no cancellation.
    pub fn background() -> Self {
        Self::default()
    }

    /// Set an absolute deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set a deadline relative to now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Attach a cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns `true` if the attached token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    /// The earlier of the context deadline and `now + timeout`.
    pub(crate) fn binding_deadline(&self, timeout: Duration) -> Instant {
        let own = Instant::now() + timeout;
        match self.deadline {
            Some(d) if d < own => d,
            _ => own,
        }
    }

    /// Resolves when the token is cancelled; never resolves without a token.
    pub(crate) async fn cancelled(&self) {
        match &self.cancel {
            Some(token) => token.cancelled().await,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn binding_deadline_prefers_earlier() {
        let ctx = CallContext::background().with_timeout(Duration::from_millis(10));
        let d = ctx.binding_deadline(Duration::from_secs(5));
        assert!(d <= Instant::now() + Duration::from_millis(10));

        let ctx = CallContext::background().with_timeout(Duration::from_secs(60));
        let d = ctx.binding_deadline(Duration::from_millis(20));
        assert!(d <= Instant::now() + Duration::from_millis(20));
    }

    #[test]
    fn cancellation_flag() {
        let token = CancellationToken::new();
        let ctx = CallContext::background().with_cancellation(token.clone());
        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
        assert!(!CallContext::background().is_cancelled());
    }
}
