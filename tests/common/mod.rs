//! Shared utilities for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Request, Response, StatusCode};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use upstream_proxy::error::BoxError;
use upstream_proxy::http::{Flush, Handler, Hijack, HijackedConn, HttpServer, RawConn, ResponseSink};
use upstream_proxy::proxy::{transport_fn, Transport};

/// Something the recording sink saw, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Head(u16),
    Write(usize),
    Flush,
}

/// In-memory sink recording every call.
#[derive(Default)]
pub struct RecordingSink {
    pub headers: HeaderMap,
    pub trailers: HeaderMap,
    pub status: Option<StatusCode>,
    pub body: Vec<u8>,
    pub events: Vec<Event>,
    /// Server end of the client connection handed out on hijack.
    pub hijack_io: Option<DuplexStream>,
    pub hijacked: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that can be hijacked. Returns the client end of the connection.
    pub fn hijackable() -> (Self, DuplexStream) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let sink = Self {
            hijack_io: Some(server),
            ..Self::default()
        };
        (sink, client)
    }

    pub fn flushes(&self) -> usize {
        self.events.iter().filter(|e| **e == Event::Flush).count()
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[async_trait]
impl ResponseSink for RecordingSink {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn trailers_mut(&mut self) -> &mut HeaderMap {
        &mut self.trailers
    }

    async fn write_head(&mut self, status: StatusCode) -> io::Result<()> {
        if self.status.is_none() {
            self.status = Some(status);
            self.events.push(Event::Head(status.as_u16()));
        }
        Ok(())
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.status.is_none() {
            self.write_head(StatusCode::OK).await?;
        }
        self.body.extend_from_slice(buf);
        self.events.push(Event::Write(buf.len()));
        Ok(buf.len())
    }

    fn as_flush(&mut self) -> Option<&mut dyn Flush> {
        Some(self)
    }

    fn as_hijack(&mut self) -> Option<&mut dyn Hijack> {
        if self.hijack_io.is_some() {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl Flush for RecordingSink {
    async fn flush(&mut self) -> io::Result<()> {
        self.events.push(Event::Flush);
        Ok(())
    }
}

#[async_trait]
impl Hijack for RecordingSink {
    async fn hijack(&mut self) -> io::Result<Box<dyn HijackedConn>> {
        let io = self
            .hijack_io
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "already hijacked"))?;
        self.hijacked = true;
        Ok(Box::new(RawConn::new(io)))
    }
}

/// Requests seen by a recording transport.
pub type Seen = Arc<Mutex<Vec<Request<()>>>>;

/// Transport answering every request with `status` and `body`, recording
/// each request head.
pub fn recording_transport(status: StatusCode, body: &'static str) -> (Arc<dyn Transport>, Seen) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let transport = transport_fn(move |req: Request<Body>| {
        let log = log.clone();
        async move {
            let (parts, _) = req.into_parts();
            log.lock().unwrap().push(Request::from_parts(parts, ()));
            let mut response = Response::new(Body::from(body));
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert("content-length", body.len().into());
            Ok::<_, BoxError>(response)
        }
    });
    (Arc::new(transport), seen)
}

/// Transport that always fails.
pub fn failing_transport() -> Arc<dyn Transport> {
    Arc::new(transport_fn(|_req: Request<Body>| async {
        Err::<Response<Body>, BoxError>(Box::new(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "connection refused",
        )))
    }))
}

/// Start a backend answering every request with a fixed `200 OK` body.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    start_programmable_backend(move || async move { (200, response.to_string()) }).await
}

/// Start a backend whose status and body come from `f`, once per request.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let f = Arc::new(f);
    start_raw_backend(move |mut socket, _head| {
        let f = f.clone();
        async move {
            let (status, body) = f().await;
            let status_text = match status {
                200 => "200 OK",
                404 => "404 Not Found",
                500 => "500 Internal Server Error",
                502 => "502 Bad Gateway",
                503 => "503 Service Unavailable",
                _ => "200 OK",
            };
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_text,
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    })
    .await
}

/// Start a backend that reads each request head and hands the socket to `f`.
pub async fn start_raw_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(TcpStream, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move {
                let head = read_head(&mut socket).await;
                f(socket, head).await;
            });
        }
    });
    addr
}

/// Read bytes up to and including the blank line ending a request head.
pub async fn read_head(socket: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match socket.read(&mut byte).await {
            Ok(0) | Err(_) => break,
            Ok(_) => head.push(byte[0]),
        }
    }
    String::from_utf8_lossy(&head).into_owned()
}

/// Serve `handler` on an ephemeral port. Dropping the sender stops it.
pub async fn start_proxy(handler: Arc<dyn Handler>) -> (SocketAddr, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let shutdown = async move {
            let _ = rx.await;
        };
        let _ = HttpServer::new(handler, 16 * 1024).run(listener, shutdown).await;
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    (addr, tx)
}

/// HTTP client that never reuses connections.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}
