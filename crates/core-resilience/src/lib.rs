//! Tripwire Core Resilience: Pure-logic fault tolerance primitives
//!
//! # Overview
//!
//! This crate provides the building blocks for calling an unreliable
//! dependency without letting its failures cascade into the caller:
//!
//! - **Circuit Breaker**: Stops calling a failing dependency for a cooldown,
//!   then probes recovery
//! - **Registry**: One breaker per named dependency, created on first use
//! - **Retry**: Fixed or exponential backoff around a fallible async operation
//! - **Interceptor Pipeline**: Ordered request, response and error transforms
//!   around a single call
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - Network protocols (HTTP, gRPC)
//! - Logging sinks or configuration formats
//! - Application-specific concerns
//!
//! It only emits `tracing` events and never installs a subscriber.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Your Application                │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Interceptor Pipeline              │  ← Transform request/response/error
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Circuit Breaker                   │  ← Fail-fast protection
//! │  (looked up by name in the Registry)    │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Retry                             │  ← Absorb transient failures
//! │  (fixed or exponential backoff)         │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//!         External Service
//! ```
//!
//! # Usage Example
//!
//! ```no_run
//! use tripwire_core_resilience::prelude::*;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry: CircuitBreakerRegistry<u32, RetryError<ResilienceError>> =
//!     CircuitBreakerRegistry::new();
//! let breaker = registry.get("inventory", None);
//! let options = RetryOptions::exponential(3, Duration::from_millis(100));
//!
//! let result = breaker
//!     .execute(|| retry(&options, || async { Ok::<_, ResilienceError>(42) }))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod error;
pub mod events;
pub mod interceptor;
pub mod registry;
pub mod retry;

// Re-export main types for convenience
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState, Fallback,
    FailurePredicate,
};
pub use error::{BreakerError, CircuitOpenError, ResilienceError, RetryError};
pub use events::BreakerEvent;
pub use interceptor::{InterceptorHandle, InterceptorPipeline, StageKind};
pub use registry::{BreakerHealth, CircuitBreakerRegistry, HealthSummary};
pub use retry::{retry, retry_with_backoff, RetryObserver, RetryOptions, RetryPredicate};

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use tripwire_core_resilience::prelude::*;
/// ```
pub mod prelude {
    pub use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
    pub use super::error::{BreakerError, CircuitOpenError, ResilienceError, RetryError};
    pub use super::events::BreakerEvent;
    pub use super::interceptor::InterceptorPipeline;
    pub use super::registry::CircuitBreakerRegistry;
    pub use super::retry::{retry, retry_with_backoff, RetryOptions};
}
