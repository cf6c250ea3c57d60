//! TCP client for the rule-processing transform service.
//!
//! Speaks a line-delimited JSON protocol over a single long-lived
//! connection: one request line out, one response line back, serialized
//! behind a mutex. Binary payloads travel base64-encoded inside the JSON
//! messages.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::config::TransformConfig;
use crate::error::{RelayError, Result};

use super::{
    is_true_like, TransformOutcome, TransformService, COMPONENT_NAME, DROP_METADATA_KEY,
    OPERATION_NAME, OPERATION_TYPE,
};

/// Registration message sent once per connection, before any requests.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest<'a> {
    token: &'a str,
    service_name: &'a str,
}

/// One transform request.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProcessRequest<'a> {
    operation_type: &'a str,
    operation_name: &'a str,
    component_name: &'a str,
    /// Envelope bytes, base64-encoded.
    data: String,
}

/// One transform response.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessResponse {
    /// Result payload, base64-encoded. May differ from the request data.
    #[serde(default)]
    data: String,

    /// Metadata flags set by the rule pipeline.
    #[serde(default)]
    metadata: HashMap<String, String>,

    /// True if rule processing failed.
    #[serde(default)]
    error: bool,

    /// Human-readable failure detail, if any.
    #[serde(default)]
    error_message: Option<String>,
}

/// Client for the remote transform service.
///
/// Holds one connection, re-established lazily after a transport failure.
/// The connection is the only shared state and is guarded by a mutex held
/// for the full request/response exchange.
pub struct RemoteTransformClient {
    config: TransformConfig,
    stream: Mutex<Option<BufStream<TcpStream>>>,
}

impl RemoteTransformClient {
    /// Connect to the transform service and register.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial connection or registration fails.
    /// Callers treat this as fatal to relay startup.
    pub async fn connect(config: TransformConfig) -> Result<Self> {
        let client = Self {
            config,
            stream: Mutex::new(None),
        };

        let stream = client.dial().await?;
        *client.stream.lock().await = Some(stream);

        debug!(address = %client.config.address, "connected to transform service");
        Ok(client)
    }

    /// Establish a fresh connection and send the registration line.
    async fn dial(&self) -> Result<BufStream<TcpStream>> {
        let tcp = match timeout(
            self.config.connect_timeout(),
            TcpStream::connect(&self.config.address),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(address = %self.config.address, error = %e, "failed to connect to transform service");
                return Err(RelayError::Transform {
                    message: format!("failed to connect to {}: {e}", self.config.address),
                });
            }
            Err(_) => {
                warn!(address = %self.config.address, "transform service connection timeout");
                return Err(RelayError::Transform {
                    message: format!("connection to {} timed out", self.config.address),
                });
            }
        };

        let mut stream = BufStream::new(tcp);

        let token = self.config.token();
        let register = RegisterRequest {
            token: &token,
            service_name: &self.config.service_name,
        };
        let line = serde_json::to_vec(&register).map_err(|e| RelayError::TransformProtocol {
            message: format!("failed to encode registration: {e}"),
        })?;

        stream.write_all(&line).await?;
        stream.write_all(b"\n").await?;
        stream.flush().await?;

        Ok(stream)
    }

    /// Send one request line and read one response line.
    ///
    /// On any transport failure the connection is discarded so the next
    /// call redials.
    async fn exchange(&self, request_line: &[u8]) -> Result<String> {
        let mut guard = self.stream.lock().await;

        if guard.is_none() {
            *guard = Some(self.dial().await?);
        }
        let stream = guard.as_mut().expect("stream was just established");

        let io = async {
            stream.write_all(request_line).await?;
            stream.write_all(b"\n").await?;
            stream.flush().await?;

            let mut line = String::new();
            let n = stream.read_line(&mut line).await?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "transform service closed the connection",
                ));
            }
            Ok::<String, std::io::Error>(line)
        };

        match timeout(self.config.request_timeout(), io).await {
            Ok(Ok(line)) => Ok(line),
            Ok(Err(e)) => {
                *guard = None;
                Err(RelayError::Transform {
                    message: format!("transform request failed: {e}"),
                })
            }
            Err(_) => {
                // The stream is mid-exchange, it cannot be reused.
                *guard = None;
                Err(RelayError::Transform {
                    message: "transform request timed out".to_string(),
                })
            }
        }
    }

    /// Release the connection. Safe to call when never connected.
    pub async fn close(&self) {
        *self.stream.lock().await = None;
    }
}

#[async_trait]
impl TransformService for RemoteTransformClient {
    #[instrument(skip(self, envelope), fields(envelope_bytes = envelope.len()))]
    async fn transform(&self, envelope: Bytes) -> Result<TransformOutcome> {
        let request = ProcessRequest {
            operation_type: OPERATION_TYPE,
            operation_name: OPERATION_NAME,
            component_name: COMPONENT_NAME,
            data: BASE64.encode(&envelope),
        };

        let request_line =
            serde_json::to_vec(&request).map_err(|e| RelayError::TransformProtocol {
                message: format!("failed to encode request: {e}"),
            })?;

        let response_line = self.exchange(&request_line).await?;

        let response: ProcessResponse =
            serde_json::from_str(&response_line).map_err(|e| RelayError::TransformProtocol {
                message: format!("failed to decode response: {e}"),
            })?;

        if response.error {
            return Err(RelayError::Transform {
                message: response
                    .error_message
                    .unwrap_or_else(|| "transform service reported an error".to_string()),
            });
        }

        if let Some(value) = response.metadata.get(DROP_METADATA_KEY) {
            if is_true_like(value) {
                debug!("record marked for drop by transform rules");
                return Ok(TransformOutcome::Drop);
            }
        }

        let payload = BASE64
            .decode(&response.data)
            .map_err(|e| RelayError::TransformProtocol {
                message: format!("response payload is not valid base64: {e}"),
            })?;

        Ok(TransformOutcome::Forward(Bytes::from(payload)))
    }
}
