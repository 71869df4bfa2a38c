//! Proxy orchestration against in-memory sinks and transports.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, Request, Response, StatusCode};
use bytes::Bytes;
use http_body_util::StreamBody;
use hyper::body::Frame;
use std::sync::{Arc, Mutex};
use url::Url;

use upstream_proxy::error::{cause, BoxError, ProxyError};
use upstream_proxy::http::headers::ClientAddr;
use upstream_proxy::http::{Handler, ResponseSink};
use upstream_proxy::load_balancer::RoundRobin;
use upstream_proxy::proxy::{rewrite, transport_fn, ErrorHandler, Proxy};

mod common;
use common::{Event, RecordingSink};

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn to_upstream(target: &'static str) -> impl Fn(&mut upstream_proxy::ProxyRequest<'_>) -> Result<(), BoxError> + Send + Sync + 'static {
    move |request: &mut upstream_proxy::ProxyRequest<'_>| {
        request.set_url(&Url::parse(target)?)?;
        request.set_forwarded();
        Ok(())
    }
}

#[tokio::test]
async fn rotates_between_two_upstreams() {
    let targets = Arc::new(
        RoundRobin::new(vec![
            Url::parse("http://a.internal").unwrap(),
            Url::parse("http://b.internal").unwrap(),
        ])
        .unwrap(),
    );
    let (transport, seen) = common::recording_transport(StatusCode::OK, "ok");
    let proxy = Proxy::builder()
        .rewrite(rewrite::round_robin(targets))
        .transport(transport)
        .build();

    for _ in 0..4 {
        let mut sink = RecordingSink::new();
        proxy.serve(&mut sink, get("/x?y=1")).await;
        assert_eq!(sink.status, Some(StatusCode::OK));
        assert_eq!(sink.body_text(), "ok");
    }

    let uris: Vec<String> = seen.lock().unwrap().iter().map(|r| r.uri().to_string()).collect();
    assert_eq!(
        uris,
        vec![
            "http://a.internal/x?y=1",
            "http://b.internal/x?y=1",
            "http://a.internal/x?y=1",
            "http://b.internal/x?y=1",
        ]
    );
}

#[tokio::test]
async fn outbound_request_is_sanitized() {
    let (transport, seen) = common::recording_transport(StatusCode::OK, "ok");
    let proxy = Proxy::builder()
        .rewrite(to_upstream("http://up.internal:9000/base/"))
        .transport(transport)
        .build();

    let mut request = Request::builder()
        .uri("/path?q=1")
        .header("host", "proxy.example.com")
        .header("connection", "keep-alive, x-hop")
        .header("x-hop", "secret")
        .header("keep-alive", "timeout=5")
        .header("te", "gzip, trailers")
        .header("x-forwarded-for", "6.6.6.6")
        .header("x-custom", "kept")
        .body(Body::empty())
        .unwrap();
    request
        .extensions_mut()
        .insert(ClientAddr::new("192.0.2.10:40000", false));

    let mut sink = RecordingSink::new();
    proxy.serve(&mut sink, request).await;
    assert_eq!(sink.status, Some(StatusCode::OK));

    let seen = seen.lock().unwrap();
    let out = &seen[0];
    assert_eq!(out.uri(), "http://up.internal:9000/base/path?q=1");
    let headers = out.headers();
    assert!(headers.get("host").is_none());
    assert!(headers.get("x-hop").is_none());
    assert!(headers.get("keep-alive").is_none());
    assert!(headers.get("connection").is_none());
    assert_eq!(headers["te"], "trailers");
    assert_eq!(headers["x-custom"], "kept");
    assert_eq!(headers["x-forwarded-for"], "6.6.6.6, 192.0.2.10");
    assert_eq!(headers["x-forwarded-host"], "proxy.example.com");
    assert_eq!(headers["x-forwarded-proto"], "http");
    assert_eq!(headers["user-agent"], "");
}

#[tokio::test]
async fn response_hop_by_hop_headers_are_dropped() {
    let transport = transport_fn(|_req: Request<Body>| async {
        let response = Response::builder()
            .status(StatusCode::CREATED)
            .header("connection", "x-internal")
            .header("x-internal", "1")
            .header("keep-alive", "timeout=5")
            .header("x-visible", "yes")
            .header("content-length", "4")
            .body(Body::from("made"))
            .unwrap();
        Ok::<_, BoxError>(response)
    });
    let proxy = Proxy::builder()
        .rewrite(to_upstream("http://up.internal"))
        .transport(transport)
        .build();

    let mut sink = RecordingSink::new();
    proxy.serve(&mut sink, get("/")).await;

    assert_eq!(sink.status, Some(StatusCode::CREATED));
    assert_eq!(sink.headers["x-visible"], "yes");
    assert!(sink.headers.get("x-internal").is_none());
    assert!(sink.headers.get("keep-alive").is_none());
    assert!(sink.headers.get("connection").is_none());
    assert_eq!(sink.body_text(), "made");
}

#[tokio::test]
async fn transport_failure_is_bad_gateway() {
    let proxy = Proxy::builder()
        .rewrite(to_upstream("http://up.internal"))
        .transport(common::failing_transport())
        .build();

    let mut sink = RecordingSink::new();
    proxy.serve(&mut sink, get("/")).await;

    assert_eq!(sink.status, Some(StatusCode::BAD_GATEWAY));
    assert_eq!(sink.body_text(), "Bad Gateway");
}

#[tokio::test]
async fn rewrite_failure_is_internal_error() {
    let (transport, seen) = common::recording_transport(StatusCode::OK, "ok");
    let proxy = Proxy::builder()
        .rewrite(|_| Err("no upstream".into()))
        .transport(transport)
        .build();

    let mut sink = RecordingSink::new();
    proxy.serve(&mut sink, get("/")).await;

    assert_eq!(sink.status, Some(StatusCode::INTERNAL_SERVER_ERROR));
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn pre_hook_failure_skips_round_trip() {
    let (transport, seen) = common::recording_transport(StatusCode::OK, "ok");
    let proxy = Proxy::builder()
        .rewrite(to_upstream("http://up.internal"))
        .transport(transport)
        .pre_hook(|_inbound, _outbound| Err("denied".into()))
        .build();

    let mut sink = RecordingSink::new();
    proxy.serve(&mut sink, get("/")).await;

    assert_eq!(sink.status, Some(StatusCode::INTERNAL_SERVER_ERROR));
    assert_eq!(sink.body_text(), "Internal Server Error");
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn hooks_see_outbound_request_and_response() {
    let (transport, _seen) = common::recording_transport(StatusCode::OK, "ok");
    let proxy = Proxy::builder()
        .rewrite(to_upstream("http://up.internal"))
        .transport(transport)
        .pre_hook(|_inbound, outbound| {
            outbound
                .headers_mut()
                .insert("x-signed", HeaderValue::from_static("1"));
            Ok(())
        })
        .post_hook(|outbound, response| {
            if outbound.headers.get("x-signed").is_none() {
                return Err("unsigned".into());
            }
            response
                .headers_mut()
                .insert("x-checked", HeaderValue::from_static("1"));
            Ok(())
        })
        .build();

    let mut sink = RecordingSink::new();
    proxy.serve(&mut sink, get("/")).await;

    assert_eq!(sink.status, Some(StatusCode::OK));
    assert_eq!(sink.headers["x-checked"], "1");
}

#[tokio::test]
async fn post_hook_failure_is_internal_error() {
    let (transport, _seen) = common::recording_transport(StatusCode::OK, "ok");
    let proxy = Proxy::builder()
        .rewrite(to_upstream("http://up.internal"))
        .transport(transport)
        .post_hook(|_, _| Err("bad response".into()))
        .build();

    let mut sink = RecordingSink::new();
    proxy.serve(&mut sink, get("/")).await;
    assert_eq!(sink.status, Some(StatusCode::INTERNAL_SERVER_ERROR));
}

#[tokio::test]
async fn unknown_length_flushes_after_each_write() {
    let transport = transport_fn(|_req: Request<Body>| async {
        let frames = futures_util::stream::iter(vec![Ok::<_, BoxError>(Frame::data(Bytes::from_static(
            b"data: tick\n\n",
        )))]);
        Ok::<_, BoxError>(Response::new(Body::new(StreamBody::new(frames))))
    });
    let proxy = Proxy::builder()
        .rewrite(to_upstream("http://up.internal"))
        .transport(transport)
        .build();

    let mut sink = RecordingSink::new();
    proxy.serve(&mut sink, get("/events")).await;

    let write = sink
        .events
        .iter()
        .position(|e| *e == Event::Write(12))
        .expect("body written");
    assert_eq!(sink.events.get(write + 1), Some(&Event::Flush));
    assert_eq!(sink.body_text(), "data: tick\n\n");
}

#[tokio::test]
async fn known_length_is_not_flushed_per_write() {
    let (transport, _seen) = common::recording_transport(StatusCode::OK, "fixed body");
    let proxy = Proxy::builder()
        .rewrite(to_upstream("http://up.internal"))
        .transport(transport)
        .build();

    let mut sink = RecordingSink::new();
    proxy.serve(&mut sink, get("/")).await;

    assert_eq!(sink.flushes(), 0);
    assert_eq!(sink.events, vec![Event::Head(200), Event::Write(10)]);
}

#[tokio::test]
async fn trailers_are_announced_and_copied() {
    let transport = transport_fn(|_req: Request<Body>| async {
        let mut trailers = HeaderMap::new();
        trailers.insert("x-checksum", HeaderValue::from_static("abc123"));
        let frames = futures_util::stream::iter(vec![
            Ok::<_, BoxError>(Frame::data(Bytes::from_static(b"payload"))),
            Ok(Frame::trailers(trailers)),
        ]);
        let response = Response::builder()
            .header("trailer", "X-Checksum")
            .body(Body::new(StreamBody::new(frames)))
            .unwrap();
        Ok::<_, BoxError>(response)
    });
    let proxy = Proxy::builder()
        .rewrite(to_upstream("http://up.internal"))
        .transport(transport)
        .build();

    let mut sink = RecordingSink::new();
    proxy.serve(&mut sink, get("/")).await;

    assert_eq!(sink.headers["trailer"], "x-checksum");
    assert_eq!(sink.trailers["x-checksum"], "abc123");
    assert_eq!(sink.body_text(), "payload");
    assert_eq!(sink.events.last(), Some(&Event::Flush));
}

#[tokio::test]
async fn zero_content_length_sends_empty_body() {
    let bodies = Arc::new(Mutex::new(Vec::new()));
    let log = bodies.clone();
    let transport = transport_fn(move |req: Request<Body>| {
        let log = log.clone();
        async move {
            use http_body_util::BodyExt;
            let body = req.into_body().collect().await?.to_bytes();
            log.lock().unwrap().push(body);
            Ok::<_, BoxError>(Response::new(Body::empty()))
        }
    });
    let proxy = Proxy::builder()
        .rewrite(to_upstream("http://up.internal"))
        .transport(transport)
        .build();

    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header("content-length", "0")
        .body(Body::from("should not be sent"))
        .unwrap();
    let mut sink = RecordingSink::new();
    proxy.serve(&mut sink, request).await;

    assert_eq!(bodies.lock().unwrap().as_slice(), &[Bytes::new()]);
}

struct CapturingErrors(Arc<Mutex<Vec<(String, i32)>>>);

#[async_trait]
impl ErrorHandler for CapturingErrors {
    async fn handle(&self, sink: &mut dyn ResponseSink, _inbound: &Parts, error: ProxyError) {
        self.0
            .lock()
            .unwrap()
            .push((error.cause().to_string(), error.status_code()));
        let _ = sink.write_head(StatusCode::SERVICE_UNAVAILABLE).await;
    }
}

#[tokio::test]
async fn custom_error_handler_receives_cause() {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let proxy = Proxy::builder()
        .rewrite(to_upstream("http://up.internal"))
        .transport(common::failing_transport())
        .error_handler(CapturingErrors(errors.clone()))
        .build();

    let mut sink = RecordingSink::new();
    proxy.serve(&mut sink, get("/")).await;

    assert_eq!(sink.status, Some(StatusCode::SERVICE_UNAVAILABLE));
    assert_eq!(
        errors.lock().unwrap().as_slice(),
        &[(cause::TRANSPORT_FAILED.to_string(), 502)]
    );
}
