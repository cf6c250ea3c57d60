//! Mock transform service for testing.
//!
//! Two pieces:
//! - [`MockTransform`] - an in-process [`TransformService`] spy with
//!   configurable behavior, for wiring directly into handlers
//! - [`MockTransformServer`] - a TCP server speaking the line-delimited
//!   JSON wire contract, for exercising the real client

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};

use crate::error::{RelayError, Result};
use crate::transform::{TransformOutcome, TransformService, DROP_METADATA_KEY};

/// What the mock does with each submitted envelope.
#[derive(Debug, Clone)]
pub enum TransformBehavior {
    /// Forward every envelope unchanged.
    Passthrough,
    /// Mark every envelope for a silent drop.
    DropAll,
    /// Fail every request.
    FailAll,
    /// Forward a fixed replacement payload instead of the envelope.
    /// Bytes, not a string: payloads need not be valid UTF-8.
    Rewrite(Vec<u8>),
    /// Sleep before forwarding unchanged, to keep a line in flight.
    Delay(std::time::Duration),
}

/// In-process transform spy.
pub struct MockTransform {
    behavior: TransformBehavior,
    calls: Arc<Mutex<Vec<Bytes>>>,
}

impl MockTransform {
    /// Create a spy with the given behavior.
    #[must_use]
    pub fn new(behavior: TransformBehavior) -> Self {
        Self {
            behavior,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// All envelopes submitted so far.
    pub async fn calls(&self) -> Vec<Bytes> {
        self.calls.lock().await.clone()
    }

    /// Number of envelopes submitted so far.
    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait]
impl TransformService for MockTransform {
    async fn transform(&self, envelope: Bytes) -> Result<TransformOutcome> {
        self.calls.lock().await.push(envelope.clone());

        match &self.behavior {
            TransformBehavior::Passthrough => Ok(TransformOutcome::Forward(envelope)),
            TransformBehavior::DropAll => Ok(TransformOutcome::Drop),
            TransformBehavior::FailAll => Err(RelayError::Transform {
                message: "mock transform failure".to_string(),
            }),
            TransformBehavior::Rewrite(replacement) => {
                Ok(TransformOutcome::Forward(Bytes::from(replacement.clone())))
            }
            TransformBehavior::Delay(duration) => {
                tokio::time::sleep(*duration).await;
                Ok(TransformOutcome::Forward(envelope))
            }
        }
    }
}

/// A recorded wire-level transform call.
#[derive(Debug, Clone)]
pub struct TransformCall {
    /// Decoded envelope bytes from the request's data field.
    pub data: Bytes,
    /// The operation name the client sent.
    pub operation_name: String,
}

/// Mock TCP transform service speaking the wire contract.
pub struct MockTransformServer {
    address: String,
    behavior: Arc<Mutex<TransformBehavior>>,
    calls: Arc<Mutex<Vec<TransformCall>>>,
    registrations: Arc<Mutex<Vec<String>>>,
    shutdown_tx: Option<broadcast::Sender<()>>,
}

impl MockTransformServer {
    /// Create a new mock server that will bind to the given address.
    pub fn new(address: impl Into<String>, behavior: TransformBehavior) -> Self {
        Self {
            address: address.into(),
            behavior: Arc::new(Mutex::new(behavior)),
            calls: Arc::new(Mutex::new(Vec::new())),
            registrations: Arc::new(Mutex::new(Vec::new())),
            shutdown_tx: None,
        }
    }

    /// Start the mock server.
    ///
    /// Returns the actual address the server is listening on.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn start(&mut self) -> std::io::Result<String> {
        let listener = TcpListener::bind(&self.address).await?;
        let actual_address = listener.local_addr()?.to_string();

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx.clone());

        let behavior = Arc::clone(&self.behavior);
        let calls = Arc::clone(&self.calls);
        let registrations = Arc::clone(&self.registrations);
        let mut shutdown_rx = shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    result = listener.accept() => {
                        let Ok((stream, _addr)) = result else { break };
                        let behavior = Arc::clone(&behavior);
                        let calls = Arc::clone(&calls);
                        let registrations = Arc::clone(&registrations);

                        tokio::spawn(async move {
                            let (read_half, mut write_half) = stream.into_split();
                            let mut reader = BufReader::new(read_half).lines();

                            // First line is the registration message.
                            match reader.next_line().await {
                                Ok(Some(line)) => {
                                    registrations.lock().await.push(line);
                                }
                                _ => return,
                            }

                            while let Ok(Some(line)) = reader.next_line().await {
                                let response =
                                    Self::respond(&behavior, &calls, &line).await;
                                let mut bytes = response.to_string().into_bytes();
                                bytes.push(b'\n');
                                if write_half.write_all(&bytes).await.is_err() {
                                    return;
                                }
                            }
                        });
                    }
                }
            }
        });

        Ok(actual_address)
    }

    async fn respond(
        behavior: &Mutex<TransformBehavior>,
        calls: &Mutex<Vec<TransformCall>>,
        request_line: &str,
    ) -> serde_json::Value {
        let request: serde_json::Value = match serde_json::from_str(request_line) {
            Ok(value) => value,
            Err(e) => {
                return serde_json::json!({
                    "data": "",
                    "metadata": {},
                    "error": true,
                    "errorMessage": format!("bad request: {e}"),
                });
            }
        };

        let encoded = request["data"].as_str().unwrap_or_default();
        let data = BASE64.decode(encoded).unwrap_or_default();

        calls.lock().await.push(TransformCall {
            data: Bytes::from(data.clone()),
            operation_name: request["operationName"].as_str().unwrap_or_default().to_string(),
        });

        match &*behavior.lock().await {
            TransformBehavior::Passthrough => serde_json::json!({
                "data": BASE64.encode(&data),
                "metadata": {},
                "error": false,
            }),
            TransformBehavior::Delay(duration) => {
                tokio::time::sleep(*duration).await;
                serde_json::json!({
                    "data": BASE64.encode(&data),
                    "metadata": {},
                    "error": false,
                })
            }
            TransformBehavior::DropAll => serde_json::json!({
                "data": "",
                "metadata": { (DROP_METADATA_KEY): "true" },
                "error": false,
            }),
            TransformBehavior::FailAll => serde_json::json!({
                "data": "",
                "metadata": {},
                "error": true,
                "errorMessage": "rule evaluation failed",
            }),
            TransformBehavior::Rewrite(replacement) => serde_json::json!({
                "data": BASE64.encode(replacement),
                "metadata": {},
                "error": false,
            }),
        }
    }

    /// Replace the server's behavior for subsequent requests.
    pub async fn set_behavior(&self, behavior: TransformBehavior) {
        *self.behavior.lock().await = behavior;
    }

    /// All wire-level calls recorded so far.
    pub async fn calls(&self) -> Vec<TransformCall> {
        self.calls.lock().await.clone()
    }

    /// Raw registration lines received, one per client connection.
    pub async fn registrations(&self) -> Vec<String> {
        self.registrations.lock().await.clone()
    }

    /// Stop the mock server.
    pub fn stop(&self) {
        if let Some(tx) = &self.shutdown_tx {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockTransformServer {
    fn drop(&mut self) {
        self.stop();
    }
}
