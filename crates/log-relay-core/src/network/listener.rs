//! TCP listener for accepting upstream log producers.
//!
//! The listener accepts connections and spawns a task for each one,
//! delegating to the connection handler for line processing. All
//! handlers share the single sink connector and transform client.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::sink::SinkConnector;
use crate::transform::TransformService;

use super::connection::ConnectionHandler;

/// How long `run` waits after shutdown for in-flight handlers to finish
/// their current line before giving up on them.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// TCP listener that accepts upstream connections.
pub struct RelayListener {
    config: Arc<RelayConfig>,
    transform: Arc<dyn TransformService>,
    sink: Arc<SinkConnector>,
    shutdown_tx: broadcast::Sender<()>,
    active_connections: Arc<AtomicUsize>,
}

impl RelayListener {
    /// Create a new relay listener.
    #[must_use]
    pub fn new(
        config: RelayConfig,
        transform: Arc<dyn TransformService>,
        sink: Arc<SinkConnector>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config: Arc::new(config),
            transform,
            sink,
            shutdown_tx,
            active_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Get a shutdown handle to signal the listener to stop.
    #[must_use]
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Get the current number of active connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Run the listener, accepting connections until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the listen address fails. Accept
    /// errors are logged and the loop continues.
    #[instrument(skip(self), fields(address = %self.config.listen.address))]
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen.address).await?;
        info!(address = %self.config.listen.address, "relay listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((socket, addr)) => {
                            let current = self.active_connections.load(Ordering::Relaxed);

                            if current >= self.config.listen.max_connections {
                                warn!(
                                    peer = %addr,
                                    active = current,
                                    max = self.config.listen.max_connections,
                                    "connection rejected: limit reached"
                                );
                                // Socket is dropped, closing the connection
                                continue;
                            }

                            self.active_connections.fetch_add(1, Ordering::Relaxed);
                            debug!(peer = %addr, active = current + 1, "accepted connection");

                            let config = Arc::clone(&self.config);
                            let transform = Arc::clone(&self.transform);
                            let sink = Arc::clone(&self.sink);
                            let shutdown_rx = self.shutdown_tx.subscribe();
                            let active_connections = Arc::clone(&self.active_connections);

                            tokio::spawn(async move {
                                let handler =
                                    ConnectionHandler::new(config, transform, sink, shutdown_rx);
                                if let Err(e) = handler.handle(socket).await {
                                    match &e {
                                        RelayError::Shutdown => {
                                            debug!(peer = %addr, "connection closed: shutdown");
                                        }
                                        RelayError::Connection(io_err)
                                            if io_err.kind() == std::io::ErrorKind::UnexpectedEof =>
                                        {
                                            debug!(peer = %addr, "upstream disconnected");
                                        }
                                        _ => {
                                            error!(peer = %addr, error = %e, "connection error");
                                        }
                                    }
                                }
                                active_connections.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "accept error");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        // In-flight work is allowed to complete: wait for every handler
        // to finish its current line and observe the shutdown signal.
        let active = self.active_connections.load(Ordering::Relaxed);
        if active > 0 {
            info!(active, "waiting for in-flight connections to finish their current line");
        }

        let drain_deadline = Instant::now() + DRAIN_TIMEOUT;
        while self.active_connections.load(Ordering::Relaxed) > 0 {
            if Instant::now() >= drain_deadline {
                warn!(
                    active = self.active_connections.load(Ordering::Relaxed),
                    "drain timeout reached, abandoning in-flight connections"
                );
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SinkConfig;
    use crate::testing::{MockSink, MockTransform, TransformBehavior};
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;
    use tokio::time::timeout;

    async fn test_listener(port: u16) -> (RelayListener, MockSink) {
        let mut sink_server = MockSink::new("127.0.0.1:0");
        let sink_addr = sink_server.start().await.unwrap();

        let mut config = RelayConfig::default();
        config.listen.address = format!("127.0.0.1:{port}");
        config.sink = SinkConfig {
            address: sink_addr,
            max_attempts: 2,
            initial_delay_ms: 10,
            max_delay_ms: 50,
        };

        let transform = Arc::new(MockTransform::new(TransformBehavior::Passthrough));
        let sink = Arc::new(SinkConnector::new(config.sink.clone()));
        sink.connect().await.unwrap();

        (RelayListener::new(config, transform, sink), sink_server)
    }

    #[tokio::test]
    async fn test_listener_accepts_connection() {
        let (listener, sink_server) = test_listener(16021).await;
        let shutdown_handle = listener.shutdown_handle();

        let listener_task = tokio::spawn(async move { listener.run().await });

        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut client = TcpStream::connect("127.0.0.1:16021").await.unwrap();
        client.write_all(b"hello relay\n").await.unwrap();
        client.flush().await.unwrap();

        assert!(sink_server.wait_for_lines(1, Duration::from_secs(2)).await);
        let lines = sink_server.received_lines().await;
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("hello relay"));

        let _ = shutdown_handle.send(());
        let _ = timeout(Duration::from_secs(1), listener_task).await;
    }

    #[tokio::test]
    async fn test_listener_shutdown() {
        let (listener, _sink_server) = test_listener(16022).await;
        let shutdown_handle = listener.shutdown_handle();

        let listener_task = tokio::spawn(async move { listener.run().await });

        tokio::time::sleep(Duration::from_millis(50)).await;

        let _ = shutdown_handle.send(());

        let result = timeout(Duration::from_secs(1), listener_task).await;
        assert!(result.is_ok());
    }
}
