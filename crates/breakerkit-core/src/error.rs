//! Breaker-level error types.

use thiserror::Error;

/// Stable message carried by [`BreakerError::Open`].
///
/// Callers that only see the rendered error can match on this string to tell
/// a breaker rejection apart from a failure of the operation itself.
pub const OPEN_ERROR_MESSAGE: &str = "circuit breaker is open";

/// Outcome of a guarded call that did not produce a value.
///
/// `E` is the error type of the wrapped operation and is returned verbatim
/// inside [`BreakerError::Operation`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The call was not attempted: the circuit is open, or the half-open
    /// probe window is full.
    #[error("circuit breaker is open")]
    Open,

    /// The operation did not finish before the binding deadline.
    #[error("deadline exceeded after {ms}ms")]
    DeadlineExceeded { ms: u64 },

    /// The caller's context was cancelled while the operation was running.
    #[error("context cancelled")]
    Cancelled,

    /// The operation ran and failed.
    #[error("{0}")]
    Operation(E),
}

impl<E> BreakerError<E> {
    /// Returns `true` if the breaker refused to run the operation.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns `true` if the call was abandoned at its deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::DeadlineExceeded { .. })
    }

    /// Returns `true` if the call was abandoned because the context was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns the operation's own error, if that is what this is.
    pub fn into_operation(self) -> Option<E> {
        match self {
            Self::Operation(e) => Some(e),
            _ => None,
        }
    }

    /// Borrowing variant of [`into_operation`](Self::into_operation).
    pub fn operation(&self) -> Option<&E> {
        match self {
            Self::Operation(e) => Some(e),
            _ => None,
        }
    }
}

/// Invalid breaker configuration, reported at construction time.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A count-valued field that must be positive was zero.
    #[error("{field} must be greater than zero")]
    InvalidThreshold { field: &'static str },

    /// A duration-valued field that must be positive was zero.
    #[error("{field} must be a positive duration")]
    ZeroDuration { field: &'static str },

    /// The configuration document could not be parsed.
    #[error("invalid breaker config: {0}")]
    Parse(#[from] serde_json::Error),
}
