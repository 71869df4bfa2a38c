//! Protocol upgrade handling.

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use url::Url;

use upstream_proxy::error::BoxError;
use upstream_proxy::http::Handler;
use upstream_proxy::proxy::{transport_fn, Proxy, ProxyRequest, UpgradeIo};

mod common;
use common::RecordingSink;

fn upgrade_request(protocol: &str) -> Request<Body> {
    Request::builder()
        .uri("/socket")
        .header("connection", "Upgrade")
        .header("upgrade", protocol)
        .body(Body::empty())
        .unwrap()
}

fn rewrite(request: &mut ProxyRequest<'_>) -> Result<(), BoxError> {
    request.set_url(&Url::parse("http://ws.internal")?)
}

/// Proxy whose upstream answers `101` with `granted` and hands over the
/// near end of a duplex pipe. Returns the far end.
fn upgrading_proxy(granted: &'static str, attach_io: bool) -> (Proxy, Option<DuplexStream>) {
    let (near, far) = tokio::io::duplex(64 * 1024);
    let io = UpgradeIo::new(near);
    let transport = transport_fn(move |_req: Request<Body>| {
        let io = io.clone();
        async move {
            let mut response = Response::builder()
                .status(StatusCode::SWITCHING_PROTOCOLS)
                .header("connection", "Upgrade")
                .header("upgrade", granted)
                .body(Body::empty())
                .unwrap();
            if attach_io {
                response.extensions_mut().insert(io);
            }
            Ok::<_, BoxError>(response)
        }
    });
    let proxy = Proxy::builder().rewrite(rewrite).transport(transport).build();
    (proxy, attach_io.then_some(far))
}

#[tokio::test]
async fn bytes_flow_both_ways_after_switch() {
    let (proxy, upstream) = upgrading_proxy("websocket", true);
    let mut upstream = upstream.unwrap();
    let (mut sink, mut client) = RecordingSink::hijackable();

    let serve = tokio::spawn(async move {
        proxy.serve(&mut sink, upgrade_request("websocket")).await;
        sink
    });

    let mut head = vec![0u8; 512];
    let n = client.read(&mut head).await.unwrap();
    let head = String::from_utf8_lossy(&head[..n]).into_owned();
    assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert!(head.contains("upgrade: websocket\r\n"));
    assert!(head.ends_with("\r\n\r\n"));

    client.write_all(b"hello upstream").await.unwrap();
    let mut buf = vec![0u8; 14];
    upstream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello upstream");

    upstream.write_all(b"hello client").await.unwrap();
    let mut buf = vec![0u8; 12];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello client");

    client.shutdown().await.unwrap();
    upstream.shutdown().await.unwrap();

    let sink = tokio::time::timeout(Duration::from_secs(2), serve)
        .await
        .expect("upgrade finished")
        .unwrap();
    assert!(sink.hijacked);
    assert!(sink.status.is_none());
}

#[tokio::test]
async fn protocol_match_ignores_case() {
    let (proxy, upstream) = upgrading_proxy("WebSocket", true);
    let upstream = upstream.unwrap();
    let (mut sink, client) = RecordingSink::hijackable();
    drop(client);
    drop(upstream);

    proxy.serve(&mut sink, upgrade_request("websocket")).await;
    assert!(sink.hijacked);
}

#[tokio::test]
async fn mismatched_protocol_is_rejected() {
    let (proxy, _upstream) = upgrading_proxy("h2c", true);
    let (mut sink, _client) = RecordingSink::hijackable();

    proxy.serve(&mut sink, upgrade_request("websocket")).await;

    assert_eq!(sink.status, Some(StatusCode::BAD_REQUEST));
    assert!(!sink.hijacked);
}

#[tokio::test]
async fn unsolicited_switch_is_rejected() {
    let (proxy, _upstream) = upgrading_proxy("websocket", true);
    let request = Request::builder()
        .uri("/socket")
        .header("upgrade", "websocket")
        .body(Body::empty())
        .unwrap();
    let (mut sink, _client) = RecordingSink::hijackable();

    proxy.serve(&mut sink, request).await;

    assert_eq!(sink.status, Some(StatusCode::BAD_REQUEST));
    assert!(!sink.hijacked);
}

#[tokio::test]
async fn upgrade_intent_is_forwarded() {
    let (transport, seen) = common::recording_transport(StatusCode::OK, "");
    let proxy = Proxy::builder().rewrite(rewrite).transport(transport).build();
    let mut sink = RecordingSink::new();

    proxy.serve(&mut sink, upgrade_request("websocket")).await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].headers()["connection"], "Upgrade");
    assert_eq!(seen[0].headers()["upgrade"], "websocket");
}

#[tokio::test]
async fn upstream_without_stream_is_internal_error() {
    let (proxy, _) = upgrading_proxy("websocket", false);
    let (mut sink, _client) = RecordingSink::hijackable();

    proxy.serve(&mut sink, upgrade_request("websocket")).await;

    assert_eq!(sink.status, Some(StatusCode::INTERNAL_SERVER_ERROR));
    assert!(!sink.hijacked);
}

#[tokio::test]
async fn sink_without_hijack_is_internal_error() {
    let (proxy, _upstream) = upgrading_proxy("websocket", true);
    let mut sink = RecordingSink::new();

    proxy.serve(&mut sink, upgrade_request("websocket")).await;

    assert_eq!(sink.status, Some(StatusCode::INTERNAL_SERVER_ERROR));
}
