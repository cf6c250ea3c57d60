//! Per-connection line processing.
//!
//! Each accepted upstream connection gets one handler task that reads
//! lines and runs them through normalize -> transform -> sink. Per-line
//! failures are logged and never terminate the connection; only EOF,
//! a read error, or shutdown end the loop.

use std::sync::Arc;

use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, error, instrument};

use crate::config::RelayConfig;
use crate::envelope::normalize;
use crate::error::{RelayError, Result};
use crate::sink::SinkConnector;
use crate::transform::{TransformOutcome, TransformService};

/// Handles one upstream connection until EOF, read error, or shutdown.
pub struct ConnectionHandler {
    config: Arc<RelayConfig>,
    transform: Arc<dyn TransformService>,
    sink: Arc<SinkConnector>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl ConnectionHandler {
    /// Create a new connection handler.
    #[must_use]
    pub fn new(
        config: Arc<RelayConfig>,
        transform: Arc<dyn TransformService>,
        sink: Arc<SinkConnector>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            transform,
            sink,
            shutdown_rx,
        }
    }

    /// Read lines from the connection and relay them until the peer
    /// disconnects or shutdown is signalled.
    ///
    /// Shutdown is cooperative: a line already read is processed to
    /// completion, the loop stops before reading the next one.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Shutdown`] when stopped by the shutdown
    /// signal, or a connection error if the read side fails.
    #[instrument(skip(self, stream), fields(
        peer = %stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "unknown".to_string())
    ))]
    pub async fn handle(self, stream: TcpStream) -> Result<()> {
        let Self {
            config,
            transform,
            sink,
            mut shutdown_rx,
        } = self;

        let max_line_bytes = config.listen.max_line_bytes;
        let codec = LinesCodec::new_with_max_length(max_line_bytes);
        let mut lines = FramedRead::new(stream, codec);

        loop {
            tokio::select! {
                // Checked first so no new line is started once shutdown
                // is signalled; the line being processed still completes.
                biased;

                _ = shutdown_rx.recv() => {
                    return Err(RelayError::Shutdown);
                }
                result = lines.next() => {
                    match result {
                        Some(Ok(line)) => {
                            if line.is_empty() {
                                continue;
                            }

                            // Per-line failures never close the connection.
                            if let Err(e) = process_line(transform.as_ref(), &sink, &line).await {
                                error!(error = %e, "error processing log line");
                            }
                        }
                        Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                            // The codec discards up to the next newline,
                            // so the loop can keep reading.
                            let e = RelayError::LineTooLong { limit: max_line_bytes };
                            error!(error = %e, "error processing log line");
                        }
                        Some(Err(LinesCodecError::Io(e))) => {
                            return Err(RelayError::Connection(e));
                        }
                        None => {
                            debug!("upstream disconnected");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

/// Run one line through the relay pipeline.
async fn process_line(
    transform: &dyn TransformService,
    sink: &SinkConnector,
    line: &str,
) -> Result<()> {
    let envelope = normalize(line);

    match transform.transform(envelope).await? {
        TransformOutcome::Forward(payload) => {
            sink.write_line(&payload).await?;
            debug!("forwarded record to sink");
        }
        TransformOutcome::Drop => {
            debug!("record dropped by transform rules");
        }
    }

    Ok(())
}
