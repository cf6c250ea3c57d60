//! Tests for the wire-level transform service client.

use bytes::Bytes;

use log_relay_core::config::TransformConfig;
use log_relay_core::error::RelayError;
use log_relay_core::testing::{MockTransformServer, TransformBehavior};
use log_relay_core::transform::{
    RemoteTransformClient, TransformOutcome, TransformService, OPERATION_NAME,
};

async fn client_against(behavior: TransformBehavior) -> (RemoteTransformClient, MockTransformServer) {
    let mut server = MockTransformServer::new("127.0.0.1:0", behavior);
    let address = server.start().await.unwrap();

    let config = TransformConfig {
        address,
        token: "test-token".to_string(),
        service_name: "relay-under-test".to_string(),
        connect_timeout_ms: 2000,
        request_timeout_ms: 2000,
    };

    let client = RemoteTransformClient::connect(config)
        .await
        .expect("client should connect to mock server");

    (client, server)
}

#[tokio::test]
async fn test_passthrough_forwards_payload() {
    let (client, server) = client_against(TransformBehavior::Passthrough).await;

    let envelope = Bytes::from_static(br#"{"message":"hello"}"#);
    let outcome = client.transform(envelope.clone()).await.unwrap();

    assert_eq!(outcome, TransformOutcome::Forward(envelope.clone()));

    let calls = server.calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].data, envelope);
    assert_eq!(calls[0].operation_name, OPERATION_NAME);
}

#[tokio::test]
async fn test_registration_carries_identity() {
    let (_client, server) = client_against(TransformBehavior::Passthrough).await;

    // Registration is read by the server task after connect returns
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
    while server.registrations().await.is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "registration never arrived");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    let registrations = server.registrations().await;
    assert_eq!(registrations.len(), 1);

    let registration: serde_json::Value = serde_json::from_str(&registrations[0]).unwrap();
    assert_eq!(registration["token"], "test-token");
    assert_eq!(registration["serviceName"], "relay-under-test");
}

#[tokio::test]
async fn test_drop_metadata_yields_drop_outcome() {
    let (client, _server) = client_against(TransformBehavior::DropAll).await;

    let outcome = client
        .transform(Bytes::from_static(br#"{"message":"x"}"#))
        .await
        .unwrap();

    assert_eq!(outcome, TransformOutcome::Drop);
}

#[tokio::test]
async fn test_service_error_surfaces_as_transform_error() {
    let (client, _server) = client_against(TransformBehavior::FailAll).await;

    let result = client
        .transform(Bytes::from_static(br#"{"message":"x"}"#))
        .await;

    match result {
        Err(RelayError::Transform { message }) => {
            assert!(message.contains("rule evaluation failed"));
        }
        other => panic!("expected Transform error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_rewrite_replaces_payload() {
    let replacement = r#"{"message":"rewritten"}"#;
    let (client, _server) =
        client_against(TransformBehavior::Rewrite(replacement.as_bytes().to_vec())).await;

    let outcome = client
        .transform(Bytes::from_static(br#"{"message":"original"}"#))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        TransformOutcome::Forward(Bytes::from(replacement.as_bytes().to_vec()))
    );
}

#[tokio::test]
async fn test_one_request_per_invocation() {
    let (client, server) = client_against(TransformBehavior::FailAll).await;

    // A failed transform must not be retried by the client
    let _ = client
        .transform(Bytes::from_static(br#"{"message":"x"}"#))
        .await;

    assert_eq!(server.calls().await.len(), 1);
}

#[tokio::test]
async fn test_connect_to_unreachable_server_fails() {
    // Bind then drop to get a refused port
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let config = TransformConfig {
        address,
        connect_timeout_ms: 500,
        ..TransformConfig::default()
    };

    let result = RemoteTransformClient::connect(config).await;
    assert!(matches!(result, Err(RelayError::Transform { .. })));
}
