//! Domain error types for the log relay.
//!
//! Uses `thiserror` for ergonomic error definitions with proper context.

use thiserror::Error;

/// Errors related to configuration parsing and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required address field is empty.
    #[error("{field} cannot be empty")]
    MissingAddress { field: &'static str },

    /// Invalid address format.
    #[error("invalid address format: {0} (expected 'host:port')")]
    InvalidAddress(String),

    /// Sink retry policy must allow at least one attempt.
    #[error("sink.max_attempts must be at least 1, got {0}")]
    InvalidMaxAttempts(u32),

    /// Initial retry delay must not exceed the delay cap.
    #[error("sink.initial_delay_ms ({initial_delay_ms}) must be <= sink.max_delay_ms ({max_delay_ms})")]
    InvalidRetryDelays {
        initial_delay_ms: u64,
        max_delay_ms: u64,
    },

    /// Maximum line length must be non-zero.
    #[error("listen.max_line_bytes must be at least 1, got {0}")]
    InvalidMaxLineBytes(usize),

    /// Failed to read configuration file.
    #[error("failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
}

/// Errors that occur during relay operation.
#[derive(Error, Debug)]
pub enum RelayError {
    /// TCP/IO connection error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// An upstream line exceeded the configured maximum length.
    #[error("line exceeds maximum length of {limit} bytes")]
    LineTooLong { limit: usize },

    /// The transform collaborator reported a failure or could not be reached.
    #[error("transform failed: {message}")]
    Transform { message: String },

    /// The transform collaborator sent a response we could not decode.
    #[error("transform protocol error: {message}")]
    TransformProtocol { message: String },

    /// The downstream sink could not be reached after exhausting retries.
    #[error("sink {address} unavailable after {attempts} attempts: {message}")]
    SinkUnavailable {
        address: String,
        attempts: u32,
        message: String,
    },

    /// Shutdown signal received.
    #[error("relay shutting down")]
    Shutdown,
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
