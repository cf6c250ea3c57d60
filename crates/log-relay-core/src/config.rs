//! Configuration types for the log relay.
//!
//! Configuration is loaded from YAML files and validated before use.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};

/// Root configuration for the relay.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    /// TCP listener configuration.
    #[serde(default)]
    pub listen: ListenConfig,

    /// Downstream sink connection configuration.
    #[serde(default)]
    pub sink: SinkConfig,

    /// Rule-processing transform service configuration.
    #[serde(default)]
    pub transform: TransformConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// TCP listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    /// Address to bind to, e.g., "0.0.0.0:6000".
    #[serde(default = "default_listen_address")]
    pub address: String,

    /// Maximum number of concurrent upstream connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum accepted line length in bytes. Longer lines are rejected
    /// with an error and skipped, the connection stays open.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

/// Downstream sink connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SinkConfig {
    /// Address of the log sink to forward records to, e.g., "logstash-server:7002".
    #[serde(default = "default_sink_address")]
    pub address: String,

    /// Maximum number of connection attempts before giving up.
    #[serde(default = "default_sink_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second connection attempt, in milliseconds.
    /// Grows by x1.5 after each failed attempt.
    #[serde(default = "default_sink_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Cap on the between-attempt delay, in milliseconds.
    #[serde(default = "default_sink_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl SinkConfig {
    /// Initial delay between connection attempts.
    #[must_use]
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Maximum delay between connection attempts.
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Rule-processing transform service configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransformConfig {
    /// Address of the transform service, e.g., "localhost:8082".
    #[serde(default = "default_transform_address")]
    pub address: String,

    /// Token used to authenticate with the transform service.
    /// Supports environment variable expansion: "${RELAY_TRANSFORM_TOKEN}"
    #[serde(default = "default_transform_token")]
    pub token: String,

    /// Service name reported when registering with the transform service.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl TransformConfig {
    /// Get the token with environment variables expanded.
    #[must_use]
    pub fn token(&self) -> String {
        expand_env_vars(&self.token)
    }

    /// Connection timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Per-request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit logs as JSON instead of human-readable text.
    #[serde(default)]
    pub json: bool,
}

/// Expand environment variables in a string.
///
/// Replaces `${VAR_NAME}` with the value of the environment variable `VAR_NAME`.
/// If the variable is not set, replaces with an empty string.
fn expand_env_vars(s: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex");
    re.replace_all(s, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .to_string()
}

fn default_listen_address() -> String {
    "0.0.0.0:6000".to_string()
}

fn default_max_connections() -> usize {
    1024
}

fn default_max_line_bytes() -> usize {
    1024 * 1024
}

fn default_sink_address() -> String {
    "logstash-server:7002".to_string()
}

fn default_sink_max_attempts() -> u32 {
    5
}

fn default_sink_initial_delay_ms() -> u64 {
    2000
}

fn default_sink_max_delay_ms() -> u64 {
    30_000
}

fn default_transform_address() -> String {
    "localhost:8082".to_string()
}

fn default_transform_token() -> String {
    "1234".to_string()
}

fn default_service_name() -> String {
    "logstash".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: ListenConfig::default(),
            sink: SinkConfig::default(),
            transform: TransformConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: default_listen_address(),
            max_connections: default_max_connections(),
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            address: default_sink_address(),
            max_attempts: default_sink_max_attempts(),
            initial_delay_ms: default_sink_initial_delay_ms(),
            max_delay_ms: default_sink_max_delay_ms(),
        }
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            address: default_transform_address(),
            token: default_transform_token(),
            service_name: default_service_name(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Configuration loading and validation

impl RelayConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if
    /// validation fails.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or validation fails.
    pub fn from_str(content: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation check fails.
    pub fn validate(&self) -> ConfigResult<()> {
        validate_address(&self.listen.address, "listen.address")?;
        validate_address(&self.sink.address, "sink.address")?;
        validate_address(&self.transform.address, "transform.address")?;

        if self.listen.max_line_bytes == 0 {
            return Err(ConfigError::InvalidMaxLineBytes(self.listen.max_line_bytes));
        }

        if self.sink.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(self.sink.max_attempts));
        }

        if self.sink.initial_delay_ms > self.sink.max_delay_ms {
            return Err(ConfigError::InvalidRetryDelays {
                initial_delay_ms: self.sink.initial_delay_ms,
                max_delay_ms: self.sink.max_delay_ms,
            });
        }

        Ok(())
    }
}

fn validate_address(address: &str, field: &'static str) -> ConfigResult<()> {
    if address.is_empty() {
        return Err(ConfigError::MissingAddress { field });
    }

    // "host:port" with a non-empty host and a numeric port
    let valid = match address.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    };

    if !valid {
        return Err(ConfigError::InvalidAddress(address.to_string()));
    }

    Ok(())
}
