//! Downstream sink connection management.
//!
//! The relay holds a single long-lived TCP connection to the log sink,
//! shared by every connection handler. Establishment uses bounded
//! exponential backoff; a failed write discards the connection and
//! re-runs the same backoff sequence before retrying the write once.
//! All writes are serialized behind a mutex held for the whole write,
//! which also gives strict per-connection FIFO ordering downstream.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::config::SinkConfig;
use crate::error::{RelayError, Result};

/// Multiplicative backoff factor applied after each failed attempt.
const BACKOFF_FACTOR: f64 = 1.5;

/// Compute the delay to use after the current one, capped.
pub(crate) fn next_delay(current: Duration, max: Duration) -> Duration {
    let grown = current.mul_f64(BACKOFF_FACTOR);
    grown.min(max)
}

/// Connector owning the single outbound connection to the log sink.
pub struct SinkConnector {
    config: SinkConfig,
    stream: Mutex<Option<TcpStream>>,
}

impl SinkConnector {
    /// Create a new sink connector (not yet connected).
    #[must_use]
    pub fn new(config: SinkConfig) -> Self {
        Self {
            config,
            stream: Mutex::new(None),
        }
    }

    /// Get the sink address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.config.address
    }

    /// Check if the connection is established.
    pub async fn is_connected(&self) -> bool {
        self.stream.lock().await.is_some()
    }

    /// Establish the sink connection with bounded exponential backoff.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::SinkUnavailable`] once every attempt has
    /// failed. At relay startup callers treat this as fatal.
    #[instrument(skip(self), fields(address = %self.config.address))]
    pub async fn connect(&self) -> Result<()> {
        let stream = self.dial_with_backoff().await?;
        *self.stream.lock().await = Some(stream);
        info!(address = %self.config.address, "connected to sink");
        Ok(())
    }

    /// Run the retrying dial sequence without touching the held stream.
    async fn dial_with_backoff(&self) -> Result<TcpStream> {
        let max_attempts = self.config.max_attempts;
        let mut delay = self.config.initial_delay();
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match TcpStream::connect(&self.config.address).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    warn!(
                        address = %self.config.address,
                        attempt,
                        max_attempts,
                        error = %e,
                        "failed to connect to sink"
                    );
                    last_error = e.to_string();
                }
            }

            if attempt < max_attempts {
                sleep(delay).await;
                delay = next_delay(delay, self.config.max_delay());
            }
        }

        Err(RelayError::SinkUnavailable {
            address: self.config.address.clone(),
            attempts: max_attempts,
            message: last_error,
        })
    }

    /// Forward one record to the sink, appending the newline terminator.
    ///
    /// The payload is written byte-for-byte; the sink protocol is
    /// line-oriented but the relay never re-encodes what the transform
    /// service produced.
    ///
    /// Holds the writer lock for the full write so concurrent handlers
    /// never interleave partial lines. If the write fails the connection
    /// is discarded, re-established with backoff, and the write retried
    /// once; a second failure surfaces to the caller.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails on a freshly established
    /// connection, or if reconnection itself is exhausted.
    pub async fn write_line(&self, line: &[u8]) -> Result<()> {
        let mut guard = self.stream.lock().await;

        if guard.is_none() {
            *guard = Some(self.dial_with_backoff().await?);
            info!(address = %self.config.address, "reconnected to sink");
        }
        let stream = guard.as_mut().expect("stream was just established");

        match Self::write_terminated(stream, line).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(address = %self.config.address, error = %e, "sink write failed, reconnecting");
                *guard = None;

                let mut fresh = self.dial_with_backoff().await?;
                Self::write_terminated(&mut fresh, line).await?;
                *guard = Some(fresh);

                info!(address = %self.config.address, "reconnected to sink");
                Ok(())
            }
        }
    }

    async fn write_terminated(stream: &mut TcpStream, line: &[u8]) -> std::io::Result<()> {
        stream.write_all(line).await?;
        stream.write_all(b"\n").await?;
        stream.flush().await
    }

    /// Release the connection. Idempotent, safe when never connected.
    pub async fn close(&self) {
        if let Some(mut stream) = self.stream.lock().await.take() {
            let _ = stream.shutdown().await;
            debug!(address = %self.config.address, "sink connection closed");
        }
    }
}
