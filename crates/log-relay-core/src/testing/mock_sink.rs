//! Mock log sink for integration testing.
//!
//! A lightweight TCP server that:
//! - Accepts connections on an ephemeral or fixed address
//! - Records every newline-terminated line it receives
//! - Counts accepted connections

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{sleep, Instant};

/// Mock sink server for testing.
///
/// Lines are recorded as raw bytes so tests can assert byte-exact
/// forwarding of payloads that are not valid UTF-8.
pub struct MockSink {
    address: String,
    lines: Arc<Mutex<Vec<Vec<u8>>>>,
    connections: Arc<AtomicUsize>,
    shutdown_tx: Option<broadcast::Sender<()>>,
}

impl MockSink {
    /// Create a new mock sink that will bind to the given address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            lines: Arc::new(Mutex::new(Vec::new())),
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown_tx: None,
        }
    }

    /// Start the mock sink.
    ///
    /// Returns the actual address the sink is listening on.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn start(&mut self) -> std::io::Result<String> {
        let listener = TcpListener::bind(&self.address).await?;
        let actual_address = listener.local_addr()?.to_string();

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx.clone());

        let lines = Arc::clone(&self.lines);
        let connections = Arc::clone(&self.connections);
        let mut shutdown_rx = shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _addr)) => {
                                connections.fetch_add(1, Ordering::Relaxed);
                                let lines = Arc::clone(&lines);
                                let mut shutdown_rx = shutdown_tx.subscribe();

                                tokio::spawn(async move {
                                    let mut reader = BufReader::new(stream);
                                    loop {
                                        let mut buf = Vec::new();
                                        tokio::select! {
                                            _ = shutdown_rx.recv() => break,
                                            result = reader.read_until(b'\n', &mut buf) => {
                                                match result {
                                                    Ok(0) | Err(_) => break,
                                                    Ok(_) => {
                                                        if buf.last() == Some(&b'\n') {
                                                            buf.pop();
                                                        }
                                                        lines.lock().await.push(buf);
                                                    }
                                                }
                                            }
                                        }
                                    }
                                });
                            }
                            Err(_) => break,
                        }
                    }
                }
            }
        });

        Ok(actual_address)
    }

    /// Get all lines received so far, lossily decoded for assertions on
    /// textual payloads.
    pub async fn received_lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .await
            .iter()
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect()
    }

    /// Get all lines received so far as raw bytes.
    pub async fn received_raw(&self) -> Vec<Vec<u8>> {
        self.lines.lock().await.clone()
    }

    /// Number of connections accepted so far.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Wait until at least `count` lines have arrived, up to `deadline`.
    ///
    /// Returns `true` if the count was reached in time.
    pub async fn wait_for_lines(&self, count: usize, deadline: Duration) -> bool {
        let start = Instant::now();
        loop {
            if self.lines.lock().await.len() >= count {
                return true;
            }
            if start.elapsed() >= deadline {
                return false;
            }
            sleep(Duration::from_millis(10)).await;
        }
    }

    /// Clear the recorded lines.
    pub async fn clear(&self) {
        self.lines.lock().await.clear();
    }

    /// Stop the mock sink.
    pub fn stop(&self) {
        if let Some(tx) = &self.shutdown_tx {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockSink {
    fn drop(&mut self) {
        self.stop();
    }
}
