//! Test harness for integration testing of the log relay.
//!
//! Provides a complete test environment with:
//! - Mock sink recording forwarded lines
//! - In-process transform spy with configurable behavior
//! - A running relay listener wired to both

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::config::{ListenConfig, RelayConfig, SinkConfig};
use crate::error::Result;
use crate::network::RelayListener;
use crate::sink::SinkConnector;
use crate::transform::TransformService;

use super::mock_sink::MockSink;
use super::mock_transform::{MockTransform, TransformBehavior};

/// Test harness for integration testing.
pub struct RelayTestHarness {
    /// The mock sink receiving forwarded lines.
    pub sink_server: MockSink,
    /// The transform spy every line passes through.
    pub transform: Arc<MockTransform>,
    /// Address the relay listener is bound to.
    pub listen_address: String,
    /// Handle to signal relay shutdown.
    pub shutdown: broadcast::Sender<()>,
    /// The running listener task.
    pub listener_task: JoinHandle<Result<()>>,
}

impl RelayTestHarness {
    /// Start a relay on the given port with passthrough transform behavior.
    ///
    /// Ports must be unique per test, the listener binds a fixed address.
    pub async fn start(listen_port: u16) -> Self {
        Self::with_behavior(listen_port, TransformBehavior::Passthrough).await
    }

    /// Start a relay on the given port with custom transform behavior.
    pub async fn with_behavior(listen_port: u16, behavior: TransformBehavior) -> Self {
        let mut sink_server = MockSink::new("127.0.0.1:0");
        let sink_addr = sink_server
            .start()
            .await
            .expect("failed to start mock sink");

        let listen_address = format!("127.0.0.1:{listen_port}");
        let config = RelayConfig {
            listen: ListenConfig {
                address: listen_address.clone(),
                max_connections: 100,
                max_line_bytes: 64 * 1024,
            },
            sink: SinkConfig {
                address: sink_addr,
                max_attempts: 3,
                initial_delay_ms: 10,
                max_delay_ms: 100,
            },
            transform: Default::default(),
            logging: Default::default(),
        };

        let transform = Arc::new(MockTransform::new(behavior));
        let sink = Arc::new(SinkConnector::new(config.sink.clone()));
        sink.connect().await.expect("failed to connect to mock sink");

        let listener = RelayListener::new(config, Arc::clone(&transform) as Arc<dyn TransformService>, sink);
        let shutdown = listener.shutdown_handle();

        let listener_task = tokio::spawn(async move { listener.run().await });

        // Give the listener time to bind
        sleep(Duration::from_millis(50)).await;

        Self {
            sink_server,
            transform,
            listen_address,
            shutdown,
            listener_task,
        }
    }

    /// Open an upstream producer connection to the relay.
    pub async fn connect_producer(&self) -> TcpStream {
        TcpStream::connect(&self.listen_address)
            .await
            .expect("failed to connect to relay")
    }

    /// Signal shutdown and wait for the listener to stop.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        let _ = tokio::time::timeout(Duration::from_secs(2), self.listener_task).await;
        self.sink_server.stop();
    }
}
