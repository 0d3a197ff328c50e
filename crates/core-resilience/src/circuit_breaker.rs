//! Circuit Breaker implementation for fault tolerance
//!
//! The circuit breaker prevents cascading failures by failing fast when a service
//! is experiencing issues. It has three states:
//! - Closed: Normal operation, requests pass through and counted failures
//!   accumulate in a sliding time window
//! - Open: Service is unhealthy, requests are short-circuited to the fallback
//! - HalfOpen: Testing if service has recovered
//!
//! # State Transitions
//! ```text
//! Closed   → Open:     failures inside `failure_window` reach `failure_threshold`
//! Open     → HalfOpen: reset timer fires after `reset_timeout`
//! HalfOpen → Closed:   `success_threshold` successes
//! HalfOpen → Open:     any counted failure
//! ```
//!
//! The Open → HalfOpen edge is driven by a timer task owned by the breaker,
//! not by incoming calls. At most one timer is live; entering Open replaces
//! it and entering Closed cancels it. A generation number guards against a
//! timer that was already running when it got replaced.
//!
//! The breaker never retries. Compose a [`retry`](crate::retry::retry) inside
//! the closure passed to [`CircuitBreaker::execute`] for that.

use crate::error::{BreakerError, CircuitOpenError, ResilienceError};
use crate::events::{BreakerEvent, EventBus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// State of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed, requests pass through normally
    Closed,
    /// Circuit is open, requests fail immediately
    Open,
    /// Circuit is half-open, testing service recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Decides whether an error counts toward tripping the breaker
pub type FailurePredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Produces the result of a short-circuited call
pub type Fallback<T, E> = Arc<dyn Fn() -> Result<T, BreakerError<E>> + Send + Sync>;

/// Configuration for circuit breaker behavior
pub struct CircuitBreakerConfig<T, E> {
    /// Breaker identity, unique within a registry
    pub name: String,
    /// Number of failures inside `failure_window` that opens the circuit
    pub failure_threshold: usize,
    /// Number of successes in half-open needed to close the circuit
    pub success_threshold: usize,
    /// Time spent open before probing in half-open
    pub reset_timeout: Duration,
    /// Trailing interval in which failures are counted
    pub failure_window: Duration,
    /// Errors for which this returns false pass through uncounted
    pub is_failure: FailurePredicate<E>,
    /// Replaces the call while open. `None` raises [`CircuitOpenError`].
    pub fallback: Option<Fallback<T, E>>,
}

impl<T: 'static, E: 'static> Default for CircuitBreakerConfig<T, E> {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(30),
            failure_window: Duration::from_secs(60),
            is_failure: Arc::new(|_| true),
            fallback: None,
        }
    }
}

impl<T, E> Clone for CircuitBreakerConfig<T, E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            reset_timeout: self.reset_timeout,
            failure_window: self.failure_window,
            is_failure: Arc::clone(&self.is_failure),
            fallback: self.fallback.clone(),
        }
    }
}

impl<T, E> fmt::Debug for CircuitBreakerConfig<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerConfig")
            .field("name", &self.name)
            .field("failure_threshold", &self.failure_threshold)
            .field("success_threshold", &self.success_threshold)
            .field("reset_timeout", &self.reset_timeout)
            .field("failure_window", &self.failure_window)
            .field("fallback", &self.fallback.is_some())
            .finish_non_exhaustive()
    }
}

impl<T: 'static, E: 'static> CircuitBreakerConfig<T, E> {
    /// Default configuration under the given name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

impl<T, E> CircuitBreakerConfig<T, E> {
    /// Only errors matching `predicate` count toward the thresholds
    pub fn with_failure_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.is_failure = Arc::new(predicate);
        self
    }

    /// Serve short-circuited calls from `fallback`
    pub fn with_fallback<F>(mut self, fallback: F) -> Self
    where
        F: Fn() -> Result<T, BreakerError<E>> + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(fallback));
        self
    }

    /// Reject thresholds and durations that would make the breaker inert
    pub fn validate(&self) -> Result<(), ResilienceError> {
        if self.name.is_empty() {
            return Err(ResilienceError::InvalidConfig(
                "breaker name must not be empty".to_string(),
            ));
        }
        if self.failure_threshold == 0 {
            return Err(ResilienceError::InvalidConfig(format!(
                "breaker '{}': failure_threshold must be at least 1",
                self.name
            )));
        }
        if self.success_threshold == 0 {
            return Err(ResilienceError::InvalidConfig(format!(
                "breaker '{}': success_threshold must be at least 1",
                self.name
            )));
        }
        if self.reset_timeout.is_zero() {
            return Err(ResilienceError::InvalidConfig(format!(
                "breaker '{}': reset_timeout must be non-zero",
                self.name
            )));
        }
        if self.failure_window.is_zero() {
            return Err(ResilienceError::InvalidConfig(format!(
                "breaker '{}': failure_window must be non-zero",
                self.name
            )));
        }
        Ok(())
    }
}

/// Immutable snapshot of a breaker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    /// Counted failures since the circuit last closed or saw a success
    pub failures: u64,
    /// Counted failures still inside the failure window
    pub window_failures: usize,
    /// Successes since the last state entry
    pub successes: u64,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_successes: u64,
}

/// Outstanding Open → HalfOpen transition
#[derive(Debug)]
struct ResetTimer {
    /// `None` when no Tokio runtime was available to schedule on
    handle: Option<JoinHandle<()>>,
    deadline: Instant,
}

impl ResetTimer {
    fn cancel(self) {
        if let Some(handle) = self.handle {
            handle.abort();
        }
    }
}

/// Internal state of the circuit breaker
#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_times: VecDeque<Instant>,
    failures: u64,
    successes: u64,
    last_failure: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
    total_calls: u64,
    total_failures: u64,
    total_successes: u64,
    reset_timer: Option<ResetTimer>,
    /// Bumped every time a timer is armed or cancelled
    timer_generation: u64,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_times: VecDeque::new(),
            failures: 0,
            successes: 0,
            last_failure: None,
            last_success: None,
            total_calls: 0,
            total_failures: 0,
            total_successes: 0,
            reset_timer: None,
            timer_generation: 0,
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.failure_times.front() {
            if now.duration_since(oldest) > window {
                self.failure_times.pop_front();
            } else {
                break;
            }
        }
    }

    fn cancel_timer(&mut self) {
        self.timer_generation += 1;
        if let Some(timer) = self.reset_timer.take() {
            timer.cancel();
        }
    }

    fn enter_half_open(&mut self, bus: &EventBus) {
        let from = self.state;
        self.state = CircuitState::HalfOpen;
        self.successes = 0;
        self.reset_timer = None;
        bus.emit(BreakerEvent::StateChange {
            from,
            to: CircuitState::HalfOpen,
        });
        bus.emit(BreakerEvent::HalfOpen);
    }

    fn enter_closed(&mut self, bus: &EventBus) {
        let from = self.state;
        self.state = CircuitState::Closed;
        self.failures = 0;
        self.successes = 0;
        self.failure_times.clear();
        self.cancel_timer();
        if from != CircuitState::Closed {
            bus.emit(BreakerEvent::StateChange {
                from,
                to: CircuitState::Closed,
            });
            bus.emit(BreakerEvent::Close);
        }
    }

    fn enter_open(&mut self, bus: &EventBus, state: &Arc<Mutex<BreakerState>>, timeout: Duration) {
        let from = self.state;
        self.state = CircuitState::Open;
        self.successes = 0;
        self.arm_timer(bus, state, timeout);
        if from != CircuitState::Open {
            bus.emit(BreakerEvent::StateChange {
                from,
                to: CircuitState::Open,
            });
            bus.emit(BreakerEvent::Open);
        }
    }

    fn arm_timer(&mut self, bus: &EventBus, state: &Arc<Mutex<BreakerState>>, timeout: Duration) {
        self.cancel_timer();
        let generation = self.timer_generation;
        let deadline = Instant::now() + timeout;

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let weak = Arc::downgrade(state);
                let bus = bus.clone();
                Some(runtime.spawn(reset_after(weak, bus, generation, deadline)))
            }
            Err(_) => {
                tracing::warn!(
                    breaker = %bus.name(),
                    "no Tokio runtime; half-open transition applied on next observation"
                );
                None
            }
        };

        self.reset_timer = Some(ResetTimer { handle, deadline });
    }

    /// Apply an unscheduled deadline. Only relevant when no runtime was
    /// available at the time the breaker opened.
    fn poll_unscheduled_deadline(&mut self, bus: &EventBus) {
        let expired = matches!(
            &self.reset_timer,
            Some(ResetTimer { handle: None, deadline }) if Instant::now() >= *deadline
        );
        if expired && self.state == CircuitState::Open {
            self.enter_half_open(bus);
        }
    }
}

impl Drop for BreakerState {
    fn drop(&mut self) {
        if let Some(timer) = self.reset_timer.take() {
            timer.cancel();
        }
    }
}

async fn reset_after(
    state: Weak<Mutex<BreakerState>>,
    bus: EventBus,
    generation: u64,
    deadline: Instant,
) {
    tokio::time::sleep_until(deadline).await;

    let Some(state) = state.upgrade() else {
        return;
    };
    let mut guard = lock_state(&state);
    if guard.timer_generation == generation && guard.state == CircuitState::Open {
        guard.enter_half_open(&bus);
    }
}

fn lock_state(state: &Mutex<BreakerState>) -> MutexGuard<'_, BreakerState> {
    // State stays consistent across a panicking subscriber, so poisoning is ignored
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Circuit breaker for protecting against cascading failures
///
/// Cloning is cheap and yields a handle to the same breaker.
///
/// # Example
/// ```no_run
/// use tripwire_core_resilience::{CircuitBreaker, CircuitBreakerConfig, ResilienceError};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let breaker: CircuitBreaker<u32, ResilienceError> =
///         CircuitBreaker::new(CircuitBreakerConfig::named("inventory"));
///
///     let result = breaker.execute(|| async {
///         Ok::<_, ResilienceError>(42)
///     }).await?;
///
///     println!("Result: {}", result);
///     Ok(())
/// }
/// ```
pub struct CircuitBreaker<T, E> {
    config: Arc<CircuitBreakerConfig<T, E>>,
    state: Arc<Mutex<BreakerState>>,
    bus: EventBus,
}

impl<T, E> Clone for CircuitBreaker<T, E> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            state: Arc::clone(&self.state),
            bus: self.bus.clone(),
        }
    }
}

impl<T, E> fmt::Debug for CircuitBreaker<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.config.name)
            .field("state", &self.state())
            .finish()
    }
}

impl<T: 'static, E: 'static> CircuitBreaker<T, E> {
    /// Create a new circuit breaker with default configuration
    pub fn new_default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl<T, E> CircuitBreaker<T, E> {
    /// Create a new circuit breaker with the given configuration
    ///
    /// The configuration must pass [`CircuitBreakerConfig::validate`]; use
    /// [`CircuitBreaker::try_new`] when it comes from outside the program.
    pub fn new(config: CircuitBreakerConfig<T, E>) -> Self {
        debug_assert!(
            config.validate().is_ok(),
            "invalid circuit breaker configuration: {:?}",
            config.validate()
        );
        let bus = EventBus::new(config.name.clone());
        Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(BreakerState::new())),
            bus,
        }
    }

    /// Create a breaker after validating its configuration
    pub fn try_new(config: CircuitBreakerConfig<T, E>) -> Result<Self, ResilienceError> {
        config.validate()?;
        Ok(Self::new(config))
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig<T, E> {
        &self.config
    }

    /// True if both handles refer to the same breaker
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Receive every event this breaker emits from now on
    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.bus.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        let mut guard = lock_state(&self.state);
        guard.poll_unscheduled_deadline(&self.bus);
        guard
    }

    /// Get the current state of the circuit breaker
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// False while the circuit is open
    pub fn is_callable(&self) -> bool {
        self.state() != CircuitState::Open
    }

    /// Snapshot of state and counters
    pub fn stats(&self) -> CircuitBreakerStats {
        let state = self.lock();
        CircuitBreakerStats {
            name: self.config.name.clone(),
            state: state.state,
            failures: state.failures,
            window_failures: state.failure_times.len(),
            successes: state.successes,
            last_failure: state.last_failure,
            last_success: state.last_success,
            total_calls: state.total_calls,
            total_failures: state.total_failures,
            total_successes: state.total_successes,
        }
    }

    /// Trip the circuit regardless of failure history
    pub fn force_open(&self) {
        let mut state = self.lock();
        state.enter_open(&self.bus, &self.state, self.config.reset_timeout);
    }

    /// Close the circuit regardless of its current state
    pub fn force_close(&self) {
        let mut state = self.lock();
        state.enter_closed(&self.bus);
    }

    /// Close the circuit and zero every counter and timestamp
    pub fn reset(&self) {
        let mut state = self.lock();
        state.enter_closed(&self.bus);
        state.last_failure = None;
        state.last_success = None;
        state.total_calls = 0;
        state.total_failures = 0;
        state.total_successes = 0;
    }

    /// Execute an operation with circuit breaker protection
    ///
    /// While open the operation is not invoked; the configured fallback (or
    /// a [`CircuitOpenError`]) takes its place. Otherwise the operation's
    /// error is always returned unchanged as [`BreakerError::Inner`].
    pub async fn execute<F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let admitted = {
            let mut state = self.lock();
            state.total_calls += 1;
            state.state != CircuitState::Open
        };

        if !admitted {
            self.bus.emit(BreakerEvent::Fallback);
            return match &self.config.fallback {
                Some(fallback) => fallback(),
                None => Err(BreakerError::Open(CircuitOpenError::new(
                    self.config.name.clone(),
                ))),
            };
        }

        match op().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure(&err);
                Err(BreakerError::Inner(err))
            }
        }
    }

    /// Handle successful operation
    fn on_success(&self) {
        let mut state = self.lock();
        state.successes += 1;
        state.total_successes += 1;
        state.last_success = Some(Utc::now());
        self.bus.emit(BreakerEvent::Success);

        match state.state {
            CircuitState::HalfOpen => {
                if state.successes >= self.config.success_threshold as u64 {
                    state.enter_closed(&self.bus);
                }
            }
            CircuitState::Closed => {
                // A success wipes the accumulated failure history
                state.failure_times.clear();
                state.failures = 0;
            }
            CircuitState::Open => {
                // Admitted before a concurrent call tripped the circuit
            }
        }
    }

    /// Handle failed operation
    fn on_failure(&self, err: &E)
    where
        E: fmt::Display,
    {
        let counted = (self.config.is_failure)(err);
        let mut state = self.lock();
        state.total_failures += 1;

        if !counted {
            tracing::debug!(breaker = %self.config.name, error = %err, "ignored failure");
            return;
        }

        let now = Instant::now();
        state.failures += 1;
        state.prune(now, self.config.failure_window);
        state.failure_times.push_back(now);
        state.last_failure = Some(Utc::now());
        self.bus.emit(BreakerEvent::Failure {
            error: err.to_string(),
        });

        match state.state {
            CircuitState::HalfOpen => {
                // A single failed probe reopens the circuit
                state.enter_open(&self.bus, &self.state, self.config.reset_timeout);
            }
            CircuitState::Closed => {
                if state.failure_times.len() >= self.config.failure_threshold {
                    state.enter_open(&self.bus, &self.state, self.config.reset_timeout);
                }
            }
            CircuitState::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Breaker = CircuitBreaker<u32, ResilienceError>;

    fn config(failure_threshold: usize, reset_timeout: Duration) -> CircuitBreakerConfig<u32, ResilienceError> {
        CircuitBreakerConfig {
            name: "test".to_string(),
            failure_threshold,
            reset_timeout,
            ..Default::default()
        }
    }

    async fn fail(breaker: &Breaker) -> Result<u32, BreakerError<ResilienceError>> {
        breaker
            .execute(|| async { Err(ResilienceError::Transient("test error".to_string())) })
            .await
    }

    async fn succeed(breaker: &Breaker) -> Result<u32, BreakerError<ResilienceError>> {
        breaker.execute(|| async { Ok(7) }).await
    }

    #[tokio::test]
    async fn test_starts_closed() {
        let breaker = Breaker::new_default();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.is_callable());
        assert_eq!(breaker.name(), "default");
    }

    #[tokio::test]
    async fn test_circuit_breaker_closed_to_open() {
        let breaker = Breaker::new(config(3, Duration::from_millis(100)));

        for _ in 0..3 {
            let result = fail(&breaker).await;
            assert!(matches!(result, Err(BreakerError::Inner(_))));
        }

        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.is_callable());
    }

    #[tokio::test]
    async fn test_open_circuit_does_not_invoke_operation() {
        let breaker = Breaker::new(config(3, Duration::from_secs(30)));
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let calls = Arc::clone(&calls);
            let _ = breaker
                .execute(|| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<u32, _>(ResilienceError::Transient("down".to_string()))
                })
                .await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let stats = breaker.stats();
        assert_eq!(stats.total_calls, 4);
        assert_eq!(stats.total_failures, 3);
    }

    #[tokio::test]
    async fn test_open_circuit_raises_circuit_open_error() {
        let breaker = Breaker::new(config(1, Duration::from_secs(30)));
        let _ = fail(&breaker).await;

        match succeed(&breaker).await {
            Err(BreakerError::Open(err)) => assert_eq!(err.name, "test"),
            other => panic!("expected open circuit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_custom_fallback_replaces_call() {
        let breaker = Breaker::new(config(1, Duration::from_secs(30)).with_fallback(|| Ok(0)));
        let _ = fail(&breaker).await;

        assert_eq!(succeed(&breaker).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_moves_open_to_half_open() {
        let breaker = Breaker::new(config(1, Duration::from_millis(100)));
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(99)).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_half_open_to_closed() {
        let breaker = Breaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            success_threshold: 2,
            reset_timeout: Duration::from_millis(50),
            ..config(2, Duration::from_millis(50))
        });

        for _ in 0..2 {
            let _ = fail(&breaker).await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_in_half_open_reopens() {
        let breaker = Breaker::new(CircuitBreakerConfig {
            success_threshold: 2,
            ..config(1, Duration::from_millis(50))
        });

        let _ = fail(&breaker).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        // The reopened circuit gets a fresh cooldown
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_failures_leave_the_window() {
        let breaker = Breaker::new(CircuitBreakerConfig {
            failure_window: Duration::from_millis(100),
            ..config(3, Duration::from_secs(30))
        });

        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        let _ = fail(&breaker).await;

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().window_failures, 1);
    }

    #[tokio::test]
    async fn test_success_clears_failure_history() {
        let breaker = Breaker::new(config(3, Duration::from_secs(30)));

        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        succeed(&breaker).await.unwrap();
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().window_failures, 2);
    }

    #[tokio::test]
    async fn test_ignored_failures_do_not_count() {
        let breaker = Breaker::new(
            config(1, Duration::from_secs(30))
                .with_failure_predicate(|err: &ResilienceError| !err.is_permanent()),
        );

        let result = breaker
            .execute(|| async { Err(ResilienceError::Permanent("bad input".to_string())) })
            .await;

        assert_eq!(
            result,
            Err(BreakerError::Inner(ResilienceError::Permanent(
                "bad input".to_string()
            )))
        );
        assert_eq!(breaker.state(), CircuitState::Closed);
        let stats = breaker.stats();
        assert_eq!(stats.failures, 0);
        assert_eq!(stats.total_failures, 1);
        assert!(stats.last_failure.is_none());
    }

    #[tokio::test]
    async fn test_reset() {
        let breaker = Breaker::new(config(1, Duration::from_secs(30)));
        succeed(&breaker).await.unwrap();
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();

        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.total_calls, 0);
        assert_eq!(stats.total_failures, 0);
        assert_eq!(stats.total_successes, 0);
        assert_eq!(stats.failures, 0);
        assert!(stats.last_failure.is_none());
        assert!(stats.last_success.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_close_cancels_reset_timer() {
        let breaker = Breaker::new(config(1, Duration::from_millis(50)));
        breaker.force_open();
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.force_close();
        let mut events = breaker.subscribe();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_from_before_close_and_reopen_is_ignored() {
        let breaker = Breaker::new(config(1, Duration::from_millis(100)));
        breaker.force_open();

        tokio::time::sleep(Duration::from_millis(50)).await;
        breaker.force_close();
        breaker.force_open();

        // The first timer would have fired at t100
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(45)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_keep_counters_consistent() {
        let breaker = Breaker::new(CircuitBreakerConfig {
            name: "contended".to_string(),
            failure_threshold: 8,
            failure_window: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(60),
            ..Default::default()
        });
        let invoked = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..64 {
            let breaker = breaker.clone();
            let invoked = Arc::clone(&invoked);
            handles.push(tokio::spawn(async move {
                breaker
                    .execute(|| async move {
                        invoked.fetch_add(1, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        Err::<u32, _>(ResilienceError::Transient("down".to_string()))
                    })
                    .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_err());
        }

        let stats = breaker.stats();
        let invoked = invoked.load(Ordering::SeqCst) as u64;
        assert_eq!(stats.total_calls, 64);
        assert_eq!(stats.total_failures, invoked);
        assert_eq!(stats.failures, invoked);
        assert!(invoked >= 8);
        assert_eq!(stats.state, CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_count_outlives_window_pruning() {
        let breaker = Breaker::new(CircuitBreakerConfig {
            name: "windowed".to_string(),
            failure_threshold: 5,
            failure_window: Duration::from_millis(100),
            ..Default::default()
        });

        let _ = fail(&breaker).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        let _ = fail(&breaker).await;

        let stats = breaker.stats();
        assert_eq!(stats.failures, 2);
        assert_eq!(stats.window_failures, 1);
    }

    #[test]
    fn test_try_new_rejects_zero_thresholds() {
        let err = Breaker::try_new(CircuitBreakerConfig {
            failure_threshold: 0,
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, ResilienceError::InvalidConfig(_)));

        assert!(Breaker::try_new(CircuitBreakerConfig {
            success_threshold: 0,
            ..Default::default()
        })
        .is_err());
        assert!(Breaker::try_new(config(3, Duration::from_secs(1))).is_ok());
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "invalid circuit breaker configuration")]
    fn test_new_asserts_valid_config() {
        let _ = Breaker::new(CircuitBreakerConfig {
            success_threshold: 0,
            ..Default::default()
        });
    }

    #[tokio::test]
    async fn test_events_follow_transitions() {
        let breaker = Breaker::new(config(1, Duration::from_secs(30)));
        let mut events = breaker.subscribe();

        let _ = fail(&breaker).await;
        let _ = succeed(&breaker).await;

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }

        assert_eq!(
            seen,
            vec![
                BreakerEvent::Failure {
                    error: "Transient error: test error".to_string()
                },
                BreakerEvent::StateChange {
                    from: CircuitState::Closed,
                    to: CircuitState::Open
                },
                BreakerEvent::Open,
                BreakerEvent::Fallback,
            ]
        );
    }

    #[test]
    fn test_without_runtime_deadline_applies_on_observation() {
        let breaker = Breaker::new(config(1, Duration::from_millis(10)));
        breaker.force_open();
        assert_eq!(breaker.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_validate_rejects_zero_thresholds() {
        let cfg: CircuitBreakerConfig<(), ResilienceError> = CircuitBreakerConfig {
            failure_threshold: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ResilienceError::InvalidConfig(_))));

        let cfg: CircuitBreakerConfig<(), ResilienceError> = CircuitBreakerConfig {
            reset_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        assert!(CircuitBreakerConfig::<(), ResilienceError>::default().validate().is_ok());
    }
}
