/*!
 * Error types for Tripwire
 */

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::client::ClientError;

pub type Result<T> = std::result::Result<T, TripwireError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_DEGRADED: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

#[derive(Debug)]
pub enum TripwireError {
    /// Configuration file missing
    ConfigNotFound(PathBuf),

    /// Configuration rejected by validation
    Config(String),

    /// Configuration file could not be parsed
    Parse(String),

    /// Logging could not be initialized
    Logging(String),

    /// I/O error
    Io(io::Error),

    /// A protected call failed
    Client(ClientError),

    /// Generic error with message
    Other(String),
}

impl TripwireError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            TripwireError::ConfigNotFound(_)
            | TripwireError::Config(_)
            | TripwireError::Parse(_)
            | TripwireError::Logging(_) => EXIT_FATAL,
            TripwireError::Io(_) | TripwireError::Client(_) | TripwireError::Other(_) => {
                EXIT_DEGRADED
            }
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            TripwireError::ConfigNotFound(_)
            | TripwireError::Config(_)
            | TripwireError::Parse(_) => ErrorCategory::Configuration,
            TripwireError::Logging(_) => ErrorCategory::Logging,
            TripwireError::Io(_) => ErrorCategory::IoError,
            TripwireError::Client(err) if err.is_circuit_open() => ErrorCategory::CircuitOpen,
            TripwireError::Client(_) => ErrorCategory::Network,
            TripwireError::Other(_) => ErrorCategory::Unknown,
        }
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Logging,
    IoError,
    /// Call short-circuited by an open breaker
    CircuitOpen,
    /// Downstream dependency failed
    Network,
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Logging => write!(f, "logging"),
            ErrorCategory::IoError => write!(f, "io"),
            ErrorCategory::CircuitOpen => write!(f, "circuit-open"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Unknown => write!(f, "unknown"),
        }
    }
}

impl fmt::Display for TripwireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TripwireError::ConfigNotFound(path) => {
                write!(f, "Configuration file not found: {}", path.display())
            }
            TripwireError::Config(msg) => write!(f, "Configuration error: {}", msg),
            TripwireError::Parse(msg) => write!(f, "Failed to parse configuration: {}", msg),
            TripwireError::Logging(msg) => write!(f, "Logging error: {}", msg),
            TripwireError::Io(err) => write!(f, "I/O error: {}", err),
            TripwireError::Client(err) => write!(f, "{}", err),
            TripwireError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for TripwireError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TripwireError::Io(err) => Some(err),
            TripwireError::Client(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for TripwireError {
    fn from(err: io::Error) -> Self {
        TripwireError::Io(err)
    }
}

impl From<toml::de::Error> for TripwireError {
    fn from(err: toml::de::Error) -> Self {
        TripwireError::Parse(err.to_string())
    }
}

impl From<ClientError> for TripwireError {
    fn from(err: ClientError) -> Self {
        TripwireError::Client(err)
    }
}

impl From<tripwire_core_resilience::ResilienceError> for TripwireError {
    fn from(err: tripwire_core_resilience::ResilienceError) -> Self {
        TripwireError::Config(err.to_string())
    }
}
