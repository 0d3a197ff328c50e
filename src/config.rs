/*!
 * Configuration types for Tripwire
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tripwire_core_resilience::{CircuitBreakerConfig, RetryOptions};

use crate::error::{Result, TripwireError};

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TripwireConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Retry budget applied inside every breaker
    #[serde(default)]
    pub retry: RetrySettings,

    /// Defaults for every breaker
    #[serde(default)]
    pub breaker: BreakerSettings,

    /// Per-dependency overrides, keyed by breaker name
    #[serde(default)]
    pub breakers: BTreeMap<String, BreakerOverride>,

    #[serde(default)]
    pub client: ClientSettings,
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for level = debug)
    #[serde(default)]
    pub verbose: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            file: None,
            verbose: false,
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Retry budget and backoff, in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts, the first call included
    #[serde(default = "default_retries")]
    pub retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,

    #[serde(default)]
    pub exponential: bool,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            delay_ms: default_retry_delay_ms(),
            exponential: false,
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetrySettings {
    pub fn to_options<E>(&self) -> RetryOptions<E> {
        RetryOptions {
            retries: self.retries,
            delay: Duration::from_millis(self.delay_ms),
            exponential: self.exponential,
            max_delay: Duration::from_millis(self.max_delay_ms),
            ..Default::default()
        }
    }
}

/// Breaker thresholds, durations in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: usize,

    #[serde(default = "default_success_threshold")]
    pub success_threshold: usize,

    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,

    #[serde(default = "default_failure_window_ms")]
    pub failure_window_ms: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
            failure_window_ms: default_failure_window_ms(),
        }
    }
}

impl BreakerSettings {
    /// Apply an override on top of these settings
    pub fn merged(&self, overrides: &BreakerOverride) -> BreakerSettings {
        BreakerSettings {
            failure_threshold: overrides.failure_threshold.unwrap_or(self.failure_threshold),
            success_threshold: overrides.success_threshold.unwrap_or(self.success_threshold),
            reset_timeout_ms: overrides.reset_timeout_ms.unwrap_or(self.reset_timeout_ms),
            failure_window_ms: overrides.failure_window_ms.unwrap_or(self.failure_window_ms),
        }
    }

    pub fn to_config<T: 'static, E: 'static>(&self, name: &str) -> CircuitBreakerConfig<T, E> {
        CircuitBreakerConfig {
            name: name.to_string(),
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            reset_timeout: Duration::from_millis(self.reset_timeout_ms),
            failure_window: Duration::from_millis(self.failure_window_ms),
            ..Default::default()
        }
    }
}

/// Per-dependency breaker override; unset fields inherit `[breaker]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BreakerOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_threshold: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_timeout_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_window_ms: Option<u64>,
}

/// Built-in interceptor switches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Bearer token sent as `Authorization`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    /// Content type set on requests with a body
    #[serde(default = "default_content_type")]
    pub content_type: String,

    /// Tag requests with `X-Request-Id`
    #[serde(default = "default_true")]
    pub request_id: bool,

    /// Tag requests with `X-Request-Timestamp`
    #[serde(default = "default_true")]
    pub timestamps: bool,

    /// Log every request, response and error
    #[serde(default = "default_true")]
    pub log_traffic: bool,

    /// Per-request timeout applied when a request has none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            auth_token: None,
            content_type: default_content_type(),
            request_id: true,
            timestamps: true,
            log_traffic: true,
            timeout_ms: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_failure_threshold() -> usize {
    5
}

fn default_success_threshold() -> usize {
    2
}

fn default_reset_timeout_ms() -> u64 {
    30_000
}

fn default_failure_window_ms() -> u64 {
    60_000
}

fn default_content_type() -> String {
    "application/json".to_string()
}

impl TripwireConfig {
    /// Load and validate configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(TripwireError::ConfigNotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: TripwireConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the effective configuration
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| TripwireError::Other(e.to_string()))
    }

    /// Settings for one dependency with its override applied
    pub fn breaker_settings(&self, name: &str) -> BreakerSettings {
        match self.breakers.get(name) {
            Some(overrides) => self.breaker.merged(overrides),
            None => self.breaker.clone(),
        }
    }

    /// Breaker configuration for one dependency
    pub fn breaker_config<T: 'static, E: 'static>(&self, name: &str) -> CircuitBreakerConfig<T, E> {
        self.breaker_settings(name).to_config(name)
    }

    pub fn validate(&self) -> Result<()> {
        self.retry.to_options::<()>().validate()?;
        self.breaker_config::<(), ()>("default").validate()?;
        for name in self.breakers.keys() {
            self.breaker_config::<(), ()>(name).validate()?;
        }
        if self.client.timeout_ms == Some(0) {
            return Err(TripwireError::Config(
                "client.timeout_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
