//! Log Relay Core Library
//!
//! This library provides the core functionality for a TCP log relay.
//! It accepts newline-delimited log records, normalizes each one into a
//! JSON envelope, submits the envelope to an external rule-processing
//! service, and forwards the (possibly rewritten) result to a downstream
//! log sink.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Domain-specific error types
//! - [`envelope`] - Canonical JSON envelope normalization
//! - [`transform`] - Rule-processing transform service client
//! - [`sink`] - Downstream sink connection with retry/backoff
//! - [`network`] - TCP listener and per-connection handler
//!
//! # Example
//!
//! ```rust,ignore
//! use log_relay_core::config::RelayConfig;
//!
//! // Load configuration
//! let config = RelayConfig::from_file("config.yaml")?;
//!
//! // Start the relay
//! // ...
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod envelope;
pub mod error;
pub mod network;
pub mod sink;
pub mod transform;

/// Test utilities for integration testing.
///
/// This module is only available when compiling tests or when the `testing` feature is enabled.
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use config::{ListenConfig, LoggingConfig, RelayConfig, SinkConfig, TransformConfig};
pub use error::{ConfigError, RelayError, Result};
pub use network::RelayListener;
pub use sink::SinkConnector;
pub use transform::{RemoteTransformClient, TransformOutcome, TransformService};
