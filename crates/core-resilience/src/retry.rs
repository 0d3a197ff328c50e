//! Retry with fixed or exponential backoff
//!
//! Stateless: a [`RetryOptions`] value describes the budget and the delay
//! schedule, and [`retry`] runs one operation against it.
//!
//! # Delay schedule
//!
//! For the wait that follows failed attempt `n` (1-based):
//! ```text
//! fixed:       delay
//! exponential: min(delay * 2^(n-1), max_delay)
//! ```

use crate::error::{ResilienceError, RetryError};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Observer invoked before each wait with the error and the 1-based
/// number of the attempt that just failed
pub type RetryObserver<E> = Arc<dyn Fn(&E, u32) + Send + Sync>;

/// Gate deciding whether an error is worth another attempt
pub type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Retry budget and backoff schedule
pub struct RetryOptions<E> {
    /// Total attempts, the first call included
    pub retries: u32,
    /// Base delay between attempts
    pub delay: Duration,
    /// Double the delay after every failed attempt
    pub exponential: bool,
    /// Cap applied to exponential delays
    pub max_delay: Duration,
    pub on_retry: Option<RetryObserver<E>>,
    /// When set, errors it rejects end the loop immediately
    pub retry_if: Option<RetryPredicate<E>>,
}

impl<E> Default for RetryOptions<E> {
    fn default() -> Self {
        Self {
            retries: 3,
            delay: Duration::from_secs(1),
            exponential: false,
            max_delay: Duration::from_secs(30),
            on_retry: None,
            retry_if: None,
        }
    }
}

impl<E> Clone for RetryOptions<E> {
    fn clone(&self) -> Self {
        Self {
            retries: self.retries,
            delay: self.delay,
            exponential: self.exponential,
            max_delay: self.max_delay,
            on_retry: self.on_retry.clone(),
            retry_if: self.retry_if.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryOptions<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("retries", &self.retries)
            .field("delay", &self.delay)
            .field("exponential", &self.exponential)
            .field("max_delay", &self.max_delay)
            .field("on_retry", &self.on_retry.is_some())
            .field("retry_if", &self.retry_if.is_some())
            .finish()
    }
}

impl<E> RetryOptions<E> {
    /// Fixed delay between `retries` attempts
    pub fn fixed(retries: u32, delay: Duration) -> Self {
        Self {
            retries,
            delay,
            ..Default::default()
        }
    }

    /// Doubling delay between `retries` attempts, capped at the default `max_delay`
    pub fn exponential(retries: u32, delay: Duration) -> Self {
        Self {
            retries,
            delay,
            exponential: true,
            ..Default::default()
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_on_retry<F>(mut self, observer: F) -> Self
    where
        F: Fn(&E, u32) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    pub fn with_retry_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.retry_if = Some(Arc::new(predicate));
        self
    }

    fn should_retry(&self, err: &E) -> bool {
        self.retry_if.as_ref().map_or(true, |predicate| predicate(err))
    }

    /// Wait that follows failed attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if !self.exponential {
            return self.delay;
        }

        let exponent = attempt.saturating_sub(1);
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn validate(&self) -> Result<(), ResilienceError> {
        if self.retries == 0 {
            return Err(ResilienceError::InvalidConfig(
                "retries must be at least 1".to_string(),
            ));
        }
        if self.exponential && self.max_delay < self.delay {
            return Err(ResilienceError::InvalidConfig(format!(
                "max_delay {:?} is shorter than delay {:?}",
                self.max_delay, self.delay
            )));
        }
        Ok(())
    }
}

/// Run `op` until it succeeds or the attempt budget is spent
///
/// On exhaustion the last real error is returned inside
/// [`RetryError::Exhausted`]; it is never replaced by a generic message.
pub async fn retry<F, Fut, T, E>(options: &RetryOptions<E>, mut op: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    for attempt in 1..=options.retries {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if attempt == options.retries {
            tracing::warn!(
                attempt,
                budget = options.retries,
                error = %err,
                "retry budget exhausted"
            );
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last_error: err,
            });
        }

        if !options.should_retry(&err) {
            tracing::debug!(attempt, error = %err, "error is not retryable");
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last_error: err,
            });
        }

        let delay = options.delay_for(attempt);
        tracing::warn!(
            attempt,
            budget = options.retries,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "attempt failed, retrying"
        );
        if let Some(observer) = &options.on_retry {
            observer(&err, attempt);
        }
        tokio::time::sleep(delay).await;
    }

    Err(RetryError::NoAttempts)
}

/// Exponential retry with a caller-supplied budget and base delay
pub async fn retry_with_backoff<F, Fut, T, E>(
    op: F,
    retries: u32,
    delay: Duration,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    retry(&RetryOptions::exponential(retries, delay), op).await
}
