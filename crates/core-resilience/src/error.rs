//! Error types for the resilience primitives

use thiserror::Error;

/// Errors raised by the resilience primitives themselves
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResilienceError {
    /// Circuit breaker is open, rejecting requests
    #[error("Circuit breaker is open, rejecting requests")]
    CircuitOpen,

    /// Configuration rejected by a validator
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Transient error that may be retried
    #[error("Transient error: {0}")]
    Transient(String),

    /// Permanent error that should not be retried
    #[error("Permanent error: {0}")]
    Permanent(String),

    /// Timeout occurred
    #[error("Operation timeout after {0:?}")]
    Timeout(std::time::Duration),
}

impl ResilienceError {
    /// Check if this error is transient and can be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ResilienceError::Transient(_) | ResilienceError::Timeout(_)
        )
    }

    /// Check if this error is permanent and should not be retried
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ResilienceError::Permanent(_)
                | ResilienceError::CircuitOpen
                | ResilienceError::InvalidConfig(_)
        )
    }

    /// Check if this error should contribute to circuit breaker failure count
    pub fn should_trip_breaker(&self) -> bool {
        !matches!(
            self,
            ResilienceError::CircuitOpen | ResilienceError::InvalidConfig(_)
        )
    }
}

/// Raised in place of the protected call while a breaker is open and no
/// fallback is configured.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Circuit breaker '{name}' is open")]
pub struct CircuitOpenError {
    /// Name of the breaker that rejected the call
    pub name: String,
}

impl CircuitOpenError {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Outcome of a failed [`CircuitBreaker::execute`](crate::CircuitBreaker::execute) call.
///
/// Callers branch on the variant: `Open` means the dependency was never
/// contacted and the caller should degrade gracefully, `Inner` carries the
/// dependency's own error unchanged.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BreakerError<E> {
    /// Call was short-circuited because the breaker is open
    #[error(transparent)]
    Open(CircuitOpenError),

    /// Error returned by the protected operation
    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    /// True if the call never reached the protected operation
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, BreakerError::Open(_))
    }

    /// Borrow the operation's error, if there is one
    pub fn inner(&self) -> Option<&E> {
        match self {
            BreakerError::Inner(e) => Some(e),
            BreakerError::Open(_) => None,
        }
    }

    /// Take the operation's error, if there is one
    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Inner(e) => Some(e),
            BreakerError::Open(_) => None,
        }
    }
}

impl<E> From<CircuitOpenError> for BreakerError<E> {
    fn from(err: CircuitOpenError) -> Self {
        BreakerError::Open(err)
    }
}

/// Failure of a [`retry`](crate::retry::retry) run
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RetryError<E> {
    /// Every attempt failed; carries the last real error unmodified
    #[error("All {attempts} attempts failed: {last_error}")]
    Exhausted { attempts: u32, last_error: E },

    /// The attempt budget was zero so the operation never ran
    #[error("Retry budget allowed no attempts")]
    NoAttempts,
}

impl<E> RetryError<E> {
    /// Borrow the last observed error
    pub fn last_error(&self) -> Option<&E> {
        match self {
            RetryError::Exhausted { last_error, .. } => Some(last_error),
            RetryError::NoAttempts => None,
        }
    }

    /// Take the last observed error
    pub fn into_last_error(self) -> Option<E> {
        match self {
            RetryError::Exhausted { last_error, .. } => Some(last_error),
            RetryError::NoAttempts => None,
        }
    }

    /// Number of attempts that ran
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::NoAttempts => 0,
        }
    }
}
