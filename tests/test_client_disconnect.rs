//! Streaming relay tests: stream outcome tracking, client disconnects and
//! incremental delivery from a paced upstream.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use futures::StreamExt;
use gemini_gateway::api::disconnect::DisconnectStream;
use gemini_gateway::api::{build_http_client, gateway_router, GatewayState};
use gemini_gateway::core::{get_metrics, init_metrics, AppConfig, StreamOutcome};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tower::ServiceExt;
use wiremock::{matchers::method, Mock, MockServer, ResponseTemplate};

fn streaming_app(upstream: &str, request_timeout_secs: u64) -> Router {
    init_metrics();
    let config = AppConfig {
        upstream_base_url: upstream.to_string(),
        allowed_keys: vec!["abc".to_string()],
        api_keys: vec!["u1".to_string()],
        request_timeout_secs,
        ..AppConfig::default()
    };
    let client = build_http_client(&config).unwrap();
    gateway_router(Arc::new(GatewayState::from_config(&config, client)))
}

fn stream_request() -> Request<Body> {
    Request::post("/gemini-pro:streamGenerateContent")
        .header("x-api-key", "abc")
        .body(Body::from("{}"))
        .unwrap()
}

/// Read one HTTP/1.1 request head plus its content-length body.
async fn read_request(socket: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                return;
            }
        }
    }
}

/// Upstream that answers one request with a chunked event stream, sleeping
/// `gap` before every chunk after the first.
///
/// Returns the base URL and the number of chunks the upstream has started to
/// write.
async fn paced_upstream(chunks: &'static [&'static str], gap: Duration) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let written = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&written);
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;

        let head = "HTTP/1.1 200 OK\r\n\
                    content-type: text/event-stream\r\n\
                    transfer-encoding: chunked\r\n\
                    connection: close\r\n\r\n";
        if socket.write_all(head.as_bytes()).await.is_err() {
            return;
        }
        for (i, chunk) in chunks.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(gap).await;
            }
            counter.store(i + 1, Ordering::SeqCst);
            let frame = format!("{:x}\r\n{}\r\n", chunk.len(), chunk);
            if socket.write_all(frame.as_bytes()).await.is_err() {
                return;
            }
            let _ = socket.flush().await;
        }
        let _ = socket.write_all(b"0\r\n\r\n").await;
        let _ = socket.shutdown().await;
    });

    (format!("http://{}", addr), written)
}

#[tokio::test]
async fn test_disconnect_stream_records_drop_as_disconnect() {
    let stream = futures::stream::iter(vec![Ok::<_, std::io::Error>(bytes::Bytes::from("test"))]);

    let tracker = {
        let disconnect_stream = DisconnectStream::new(stream);
        let tracker = disconnect_stream.tracker();
        assert_eq!(tracker.outcome(), StreamOutcome::Open);
        tracker
    };

    assert_eq!(tracker.outcome(), StreamOutcome::ClientDisconnected);
}

#[tokio::test]
async fn test_completed_stream_is_not_a_disconnect() {
    let stream = futures::stream::iter(vec![
        Ok::<_, std::io::Error>(bytes::Bytes::from("a")),
        Ok(bytes::Bytes::from("b")),
    ]);

    let disconnect_stream = DisconnectStream::new(stream);
    let tracker = disconnect_stream.tracker();
    let collected: Vec<_> = disconnect_stream.collect().await;

    assert_eq!(collected.len(), 2);
    assert_eq!(tracker.outcome(), StreamOutcome::Completed);
}

#[tokio::test]
async fn test_gateway_stream_dropped_early_counts_disconnect() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string("data: {\"n\":1}\n\ndata: {\"n\":2}\n\n"),
        )
        .mount(&server)
        .await;

    init_metrics();
    let config = AppConfig {
        upstream_base_url: server.uri(),
        allowed_keys: vec!["abc".to_string()],
        api_keys: vec!["u1".to_string()],
        ..AppConfig::default()
    };
    let app = gateway_router(Arc::new(GatewayState::from_config(
        &config,
        reqwest::Client::new(),
    )));

    let before = get_metrics().client_disconnects_total.get();

    let response = app.oneshot(stream_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut body = response.into_body().into_data_stream();
    let first = body.next().await.expect("stream ended early").unwrap();
    assert!(first.starts_with(b"data: "));
    drop(body);

    assert!(get_metrics().client_disconnects_total.get() >= before + 1);
}

#[tokio::test]
async fn test_stream_chunks_arrive_incrementally_and_in_order() {
    let (upstream, written) =
        paced_upstream(&["data: a\n\n", "data: b\n\n"], Duration::from_millis(1500)).await;
    let app = streaming_app(&upstream, 10);

    let response = app.oneshot(stream_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");

    let mut body = response.into_body().into_data_stream();
    let first = tokio::time::timeout(Duration::from_secs(1), body.next())
        .await
        .expect("first chunk was held back")
        .expect("stream ended early")
        .unwrap();
    assert_eq!(&first[..], b"data: a\n\n");
    assert_eq!(written.load(Ordering::SeqCst), 1);

    let mut received = first.to_vec();
    while let Some(chunk) = body.next().await {
        received.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(received, b"data: a\n\ndata: b\n\n");
    assert_eq!(written.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_stream_outlives_request_timeout_while_chunks_keep_coming() {
    let (upstream, _) = paced_upstream(
        &["data: a\n\n", "data: b\n\n", "data: c\n\n"],
        Duration::from_millis(1200),
    )
    .await;
    let app = streaming_app(&upstream, 2);

    let response = app.oneshot(stream_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("stream was cut short");
    assert_eq!(&body[..], b"data: a\n\ndata: b\n\ndata: c\n\n");
}

#[tokio::test]
async fn test_idle_upstream_stream_is_recorded_as_failure() {
    let (upstream, _) =
        paced_upstream(&["data: a\n\n", "data: b\n\n"], Duration::from_millis(2500)).await;
    let app = streaming_app(&upstream, 1);

    let before = get_metrics().stream_failures_total.get();

    let response = app.oneshot(stream_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut body = response.into_body().into_data_stream();
    let first = body.next().await.expect("stream ended early").unwrap();
    assert_eq!(&first[..], b"data: a\n\n");

    let next = body.next().await.expect("idle stream ended without an error");
    assert!(next.is_err());

    assert!(get_metrics().stream_failures_total.get() >= before + 1);
}
