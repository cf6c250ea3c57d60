//! Test utilities for the log relay.
//!
//! This module provides infrastructure for integration testing:
//!
//! - [`MockSink`] - a TCP server recording every forwarded line
//! - [`MockTransform`] - an in-process transform spy
//! - [`MockTransformServer`] - a wire-level mock of the transform service
//! - [`RelayTestHarness`] - a complete relay wired to mocks
//!
//! # Example
//!
//! ```rust,ignore
//! use log_relay_core::testing::RelayTestHarness;
//!
//! #[tokio::test]
//! async fn test_forwarding() {
//!     let harness = RelayTestHarness::start(16100).await;
//!
//!     let mut producer = harness.connect_producer().await;
//!     // write lines, then assert on harness.sink_server.received_lines()
//! }
//! ```

pub mod harness;
pub mod mock_sink;
pub mod mock_transform;

pub use harness::RelayTestHarness;
pub use mock_sink::MockSink;
pub use mock_transform::{MockTransform, MockTransformServer, TransformBehavior, TransformCall};
