/*!
 * Tripwire - circuit breaking for unreliable dependencies
 *
 * Wraps calls to remote services with:
 * - A circuit breaker per named dependency, shared through a registry
 * - Retry with fixed or exponential backoff inside the breaker
 * - Request, response and error interceptors around each call
 * - Health reporting for every breaker
 *
 * The state machines live in `tripwire-core-resilience`; this crate adds
 * configuration, logging, an HTTP transport and the client that wires
 * them together.
 */

pub mod client;
pub mod config;
pub mod error;
pub mod interceptors;
pub mod logging;
pub mod transport;

// Re-export commonly used types
pub use client::{ClientError, ResilientClient};
pub use config::TripwireConfig;
pub use error::{Result, TripwireError};
pub use transport::{RequestConfig, ReqwestTransport, Response, Transport, TransportError};
pub use tripwire_core_resilience as resilience;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
