//! Tests for the sink connector's retry and reconnection behavior.

use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time::{sleep, Instant};

use log_relay_core::config::SinkConfig;
use log_relay_core::error::RelayError;
use log_relay_core::sink::SinkConnector;
use log_relay_core::testing::MockSink;

fn fast_retry_config(address: String, max_attempts: u32) -> SinkConfig {
    SinkConfig {
        address,
        max_attempts,
        initial_delay_ms: 20,
        max_delay_ms: 200,
    }
}

/// Grab an address nothing is listening on.
async fn refused_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);
    address
}

#[tokio::test]
async fn test_connect_fails_after_exactly_max_attempts() {
    let connector = SinkConnector::new(fast_retry_config(refused_address().await, 3));

    let result = connector.connect().await;
    match result {
        Err(RelayError::SinkUnavailable { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected SinkUnavailable, got {other:?}"),
    }
    assert!(!connector.is_connected().await);
}

#[tokio::test]
async fn test_connect_retries_until_sink_appears() {
    // Fixed port: reserved here, released, then bound by the late sink
    let port = 17041;
    let address = format!("127.0.0.1:{port}");

    let late_sink = tokio::spawn(async move {
        sleep(Duration::from_millis(60)).await;
        let mut sink = MockSink::new(format!("127.0.0.1:{port}"));
        sink.start().await.unwrap();
        // Keep the sink alive long enough for the connect to land
        sleep(Duration::from_secs(2)).await;
        drop(sink);
    });

    let connector = SinkConnector::new(fast_retry_config(address, 5));
    let start = Instant::now();

    connector.connect().await.expect("connect should succeed once the sink is up");
    assert!(connector.is_connected().await);

    // At least one backoff delay must have elapsed
    assert!(start.elapsed() >= Duration::from_millis(20));

    connector.close().await;
    late_sink.abort();
}

#[tokio::test]
async fn test_write_dials_lazily_when_not_connected() {
    let mut sink = MockSink::new("127.0.0.1:0");
    let address = sink.start().await.unwrap();

    let connector = SinkConnector::new(fast_retry_config(address, 3));
    assert!(!connector.is_connected().await);

    connector.write_line(b"lazy hello").await.unwrap();
    assert!(connector.is_connected().await);

    assert!(sink.wait_for_lines(1, Duration::from_secs(2)).await);
    assert_eq!(sink.received_lines().await, vec!["lazy hello".to_string()]);
}

#[tokio::test]
async fn test_writes_are_newline_terminated() {
    let mut sink = MockSink::new("127.0.0.1:0");
    let address = sink.start().await.unwrap();

    let connector = SinkConnector::new(fast_retry_config(address, 3));
    connector.connect().await.unwrap();

    connector.write_line(b"one").await.unwrap();
    connector.write_line(b"two").await.unwrap();

    // The mock reads line-by-line; two distinct lines prove the
    // terminator was written between them.
    assert!(sink.wait_for_lines(2, Duration::from_secs(2)).await);
    assert_eq!(
        sink.received_lines().await,
        vec!["one".to_string(), "two".to_string()]
    );
}

#[tokio::test]
async fn test_write_reconnects_after_sink_restart() {
    // Fixed port so the replacement sink can take over the address
    let port = 17042;
    let address = format!("127.0.0.1:{port}");

    let mut first = MockSink::new(address.clone());
    first.start().await.unwrap();

    let connector = SinkConnector::new(fast_retry_config(address.clone(), 3));
    connector.connect().await.unwrap();

    connector.write_line(b"before restart").await.unwrap();
    assert!(first.wait_for_lines(1, Duration::from_secs(2)).await);

    // Take the sink down, then bring a new one up on the same port
    first.stop();
    drop(first);
    sleep(Duration::from_millis(50)).await;

    let mut second = MockSink::new(address);
    second.start().await.unwrap();

    // The held connection points at the dead sink. Writes go into it
    // until the reset surfaces; the erroring write is then retried on a
    // freshly dialed connection and must land on the new sink.
    let mut delivered = false;
    for i in 0..20 {
        connector
            .write_line(format!("after restart {i}").as_bytes())
            .await
            .unwrap();
        if second.wait_for_lines(1, Duration::from_millis(100)).await {
            delivered = true;
            break;
        }
    }

    assert!(delivered, "no line reached the restarted sink");
    assert!(connector.is_connected().await);

    let lines = second.received_lines().await;
    assert!(
        lines.iter().all(|line| line.starts_with("after restart")),
        "unexpected lines at restarted sink: {lines:?}"
    );
}

#[tokio::test]
async fn test_non_utf8_payload_written_byte_exact() {
    let mut sink = MockSink::new("127.0.0.1:0");
    let address = sink.start().await.unwrap();

    let connector = SinkConnector::new(fast_retry_config(address, 3));
    connector.connect().await.unwrap();

    let payload = [0xff, 0xfe, b'r', b'a', b'w'];
    connector.write_line(&payload).await.unwrap();

    assert!(sink.wait_for_lines(1, Duration::from_secs(2)).await);
    assert_eq!(sink.received_raw().await, vec![payload.to_vec()]);
}

#[tokio::test]
async fn test_close_after_connect_is_idempotent() {
    let mut sink = MockSink::new("127.0.0.1:0");
    let address = sink.start().await.unwrap();

    let connector = SinkConnector::new(fast_retry_config(address, 3));
    connector.connect().await.unwrap();
    assert!(connector.is_connected().await);

    connector.close().await;
    assert!(!connector.is_connected().await);
    connector.close().await;
}
