/*!
 * Resilient client
 *
 * Threads one call through the interceptor pipeline, the dependency's
 * circuit breaker, the retry loop and finally the transport:
 *
 * ```text
 * request stages → breaker(dependency).execute(|| retry(|| transport.send)) → response stages
 *                                                                            ↘ error stages
 * ```
 */

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::Instrument;
use tripwire_core_resilience::{
    retry, BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry,
    CircuitOpenError, HealthSummary, InterceptorPipeline, RetryError, RetryOptions,
};

use crate::config::{ClientSettings, TripwireConfig};
use crate::error::Result;
use crate::interceptors;
use crate::transport::{ReqwestTransport, RequestConfig, Response, Transport, TransportError};

/// Error type a client breaker sees: the outcome of a whole retry run
pub type CallError = RetryError<TransportError>;

pub type ClientBreaker = CircuitBreaker<Response, CallError>;
pub type ClientRegistry = CircuitBreakerRegistry<Response, CallError>;
pub type ClientPipeline = InterceptorPipeline<RequestConfig, Response, ClientError>;

/// Failure of a [`ResilientClient::call`]
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClientError {
    /// The dependency's breaker is open; nothing was sent
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// Every attempt failed; carries the last transport error
    #[error("request failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// Single attempt failed, or the error was not worth retrying
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("client configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// True when the call was rejected without contacting the dependency
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ClientError::CircuitOpen(_))
    }

    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            ClientError::RetriesExhausted { source, .. } => Some(source),
            ClientError::Transport(err) => Some(err),
            _ => None,
        }
    }

    pub fn transport_mut(&mut self) -> Option<&mut TransportError> {
        match self {
            ClientError::RetriesExhausted { source, .. } => Some(source),
            ClientError::Transport(err) => Some(err),
            _ => None,
        }
    }

    /// Server-requested wait, when the error stages found one
    pub fn retry_after(&self) -> Option<Duration> {
        self.transport().and_then(|err| err.retry_after)
    }
}

impl From<BreakerError<CallError>> for ClientError {
    fn from(err: BreakerError<CallError>) -> Self {
        match err {
            BreakerError::Open(open) => ClientError::CircuitOpen(open),
            BreakerError::Inner(RetryError::Exhausted {
                attempts: 1,
                last_error,
            }) => ClientError::Transport(last_error),
            BreakerError::Inner(RetryError::Exhausted {
                attempts,
                last_error,
            }) => ClientError::RetriesExhausted {
                attempts,
                source: last_error,
            },
            BreakerError::Inner(RetryError::NoAttempts) => {
                ClientError::Config("retry budget allowed no attempts".to_string())
            }
        }
    }
}

/// Only failures that say something about the dependency count toward its breaker
fn counts_against_dependency(err: &CallError) -> bool {
    err.last_error()
        .map_or(true, TransportError::counts_against_dependency)
}

/// Calls remote dependencies through per-dependency breakers
pub struct ResilientClient {
    transport: Arc<dyn Transport>,
    registry: Arc<ClientRegistry>,
    interceptors: Arc<ClientPipeline>,
    retry: RetryOptions<TransportError>,
    config: TripwireConfig,
}

impl fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientClient")
            .field("registry", &self.registry)
            .field("interceptors", &self.interceptors)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ResilientClient {
    /// Client over `transport` with default settings and no interceptors
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self::build(Arc::new(transport), TripwireConfig::default())
    }

    /// Client over reqwest with the built-in interceptors `config` enables
    pub fn from_config(config: &TripwireConfig) -> Result<Self> {
        Self::with_transport(config, Arc::new(ReqwestTransport::new()))
    }

    /// Client over `transport` with the built-in interceptors `config` enables
    pub fn with_transport(config: &TripwireConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let client = Self::build(transport, config.clone());
        client.install_builtin_stages(&config.client);
        Ok(client)
    }

    fn build(transport: Arc<dyn Transport>, config: TripwireConfig) -> Self {
        let retry = config
            .retry
            .to_options::<TransportError>()
            .with_retry_if(TransportError::counts_against_dependency);
        Self {
            transport,
            registry: Arc::new(ClientRegistry::new()),
            interceptors: Arc::new(ClientPipeline::new()),
            retry,
            config,
        }
    }

    /// Register the built-in stages in their canonical order
    pub fn install_builtin_stages(&self, settings: &ClientSettings) {
        let pipeline = &self.interceptors;

        if let Some(token) = &settings.auth_token {
            pipeline.add_request(interceptors::auth_header(token.clone()));
        }
        if settings.request_id {
            pipeline.add_request(interceptors::request_id());
        }
        if settings.timestamps {
            pipeline.add_request(interceptors::timestamp());
        }
        pipeline.add_request(interceptors::default_content_type(
            settings.content_type.clone(),
        ));
        if let Some(timeout_ms) = settings.timeout_ms {
            pipeline.add_request(interceptors::default_timeout(Duration::from_millis(
                timeout_ms,
            )));
        }
        pipeline.add_error(interceptors::parse_retry_after());

        if settings.log_traffic {
            pipeline.add_request(interceptors::log_request());
            pipeline.add_response(interceptors::log_response());
            pipeline.add_error(interceptors::log_error());
        }
    }

    pub fn interceptors(&self) -> &ClientPipeline {
        &self.interceptors
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn retry_options(&self) -> &RetryOptions<TransportError> {
        &self.retry
    }

    /// Breaker configuration a dependency gets on first use
    pub fn breaker_config(&self, dependency: &str) -> CircuitBreakerConfig<Response, CallError> {
        self.config
            .breaker_config::<Response, CallError>(dependency)
            .with_failure_predicate(counts_against_dependency)
    }

    /// Breaker guarding `dependency`, created on first use
    pub fn breaker(&self, dependency: &str) -> ClientBreaker {
        match self.registry.lookup(dependency) {
            Some(breaker) => breaker,
            None => self
                .registry
                .get(dependency, Some(self.breaker_config(dependency))),
        }
    }

    pub fn health(&self) -> HealthSummary {
        self.registry.health_summary()
    }

    /// Send `request` to `dependency` with full protection
    pub async fn call(
        &self,
        dependency: &str,
        request: RequestConfig,
    ) -> std::result::Result<Response, ClientError> {
        let breaker = self.breaker(dependency);
        let transport = &self.transport;
        let options = &self.retry;

        self.interceptors
            .run(request, |request| async move {
                breaker
                    .execute(|| retry(options, || transport.send(request.clone())))
                    .await
                    .map_err(ClientError::from)
            })
            .instrument(tracing::debug_span!("call", dependency = %dependency))
            .await
    }

    /// GET `url` through `dependency`'s breaker
    pub async fn get(
        &self,
        dependency: &str,
        url: &str,
    ) -> std::result::Result<Response, ClientError> {
        self.call(dependency, RequestConfig::get(url)).await
    }
}
