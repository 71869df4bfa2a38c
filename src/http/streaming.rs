//! [`ResponseSink`] backed by a hyper response.
//!
//! # Data Flow
//! ```text
//! proxy task                          axum handler
//!   write_head ── oneshot(Response) ──▶ PendingResponse::response()
//!   write/flush ── mpsc(Frame) ───────▶ StreamBody ──▶ client
//!   finish ────── trailers frame, close
//!   hijack ────── 101 head, then OnUpgrade ──▶ raw client stream
//! ```
//!
//! # Design Decisions
//! - Body writes are coalesced until the chunk size is reached or a flush
//!   is requested
//! - The body channel is bounded, so a slow client applies backpressure
//!   to the proxy task
//! - A closed channel means the client went away; writes then fail with
//!   `ConnectionAborted`

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Response, StatusCode};
use bytes::{Bytes, BytesMut};
use http_body_util::StreamBody;
use hyper::body::Frame;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use std::io;
use tokio::sync::{mpsc, oneshot};

use crate::error::BoxError;
use crate::http::sink::{Duplex, Flush, Hijack, HijackedConn, ResponseSink};

const BODY_CHANNEL_CAPACITY: usize = 8;

type FrameResult = Result<Frame<Bytes>, BoxError>;

/// The response head once a [`StreamingSink`] commits it.
pub struct PendingResponse {
    rx: oneshot::Receiver<Response<Body>>,
}

impl PendingResponse {
    /// Wait for the head. A sink dropped before committing yields a `500`.
    pub async fn response(self) -> Response<Body> {
        match self.rx.await {
            Ok(response) => response,
            Err(_) => {
                tracing::error!("Response sink dropped before writing a head");
                let mut response = Response::new(Body::empty());
                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                response
            }
        }
    }
}

/// Sink streaming into a hyper response body.
pub struct StreamingSink {
    headers: HeaderMap,
    trailers: HeaderMap,
    head_tx: Option<oneshot::Sender<Response<Body>>>,
    body_tx: Option<mpsc::Sender<FrameResult>>,
    pending: BytesMut,
    chunk_size: usize,
    on_upgrade: Option<OnUpgrade>,
}

impl StreamingSink {
    /// Create a sink and the handle resolving to its response head.
    ///
    /// `on_upgrade` is the inbound connection's upgrade future; without it
    /// the sink cannot be hijacked.
    pub fn new(on_upgrade: Option<OnUpgrade>, chunk_size: usize) -> (Self, PendingResponse) {
        let (head_tx, rx) = oneshot::channel();
        let sink = Self {
            headers: HeaderMap::new(),
            trailers: HeaderMap::new(),
            head_tx: Some(head_tx),
            body_tx: None,
            pending: BytesMut::new(),
            chunk_size: chunk_size.max(1),
            on_upgrade,
        };
        (sink, PendingResponse { rx })
    }

    fn committed(&self) -> bool {
        self.head_tx.is_none()
    }

    fn commit(&mut self, status: StatusCode) -> io::Result<()> {
        let Some(head_tx) = self.head_tx.take() else {
            tracing::debug!(status = %status, "Ignoring superfluous write_head");
            return Ok(());
        };

        let (body_tx, body_rx) = mpsc::channel::<FrameResult>(BODY_CHANNEL_CAPACITY);
        let stream = futures_util::stream::unfold(body_rx, |mut rx| async move {
            rx.recv().await.map(|frame| (frame, rx))
        });
        let mut response = Response::new(Body::new(StreamBody::new(stream)));
        *response.status_mut() = status;
        *response.headers_mut() = std::mem::take(&mut self.headers);

        head_tx.send(response).map_err(|_| client_gone())?;
        self.body_tx = Some(body_tx);
        Ok(())
    }

    async fn send_frame(&mut self, frame: Frame<Bytes>) -> io::Result<()> {
        let Some(body_tx) = self.body_tx.as_ref() else {
            return Err(client_gone());
        };
        body_tx.send(Ok(frame)).await.map_err(|_| client_gone())
    }

    async fn send_pending(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let chunk = self.pending.split().freeze();
        self.send_frame(Frame::data(chunk)).await
    }

    /// Complete the response: send remaining bytes and trailers, then close
    /// the body. Commits an empty `200 OK` if nothing was written.
    pub async fn finish(mut self) {
        if !self.committed() {
            if let Err(e) = self.commit(StatusCode::OK) {
                tracing::debug!(error = %e, "Client gone before empty response");
                return;
            }
        }
        if let Err(e) = self.send_pending().await {
            tracing::debug!(error = %e, "Client gone before final chunk");
            return;
        }
        if !self.trailers.is_empty() {
            let trailers = std::mem::take(&mut self.trailers);
            if let Err(e) = self.send_frame(Frame::trailers(trailers)).await {
                tracing::debug!(error = %e, "Client gone before trailers");
            }
        }
    }
}

fn client_gone() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "client disconnected")
}

#[async_trait]
impl ResponseSink for StreamingSink {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn trailers_mut(&mut self) -> &mut HeaderMap {
        &mut self.trailers
    }

    async fn write_head(&mut self, status: StatusCode) -> io::Result<()> {
        self.commit(status)
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.committed() {
            self.commit(StatusCode::OK)?;
        }
        if self.body_tx.is_none() {
            return Err(client_gone());
        }
        self.pending.extend_from_slice(buf);
        if self.pending.len() >= self.chunk_size {
            self.send_pending().await?;
        }
        Ok(buf.len())
    }

    fn as_flush(&mut self) -> Option<&mut dyn Flush> {
        Some(self)
    }

    fn as_hijack(&mut self) -> Option<&mut dyn Hijack> {
        if self.on_upgrade.is_some() && !self.committed() {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl Flush for StreamingSink {
    async fn flush(&mut self) -> io::Result<()> {
        if !self.committed() {
            self.commit(StatusCode::OK)?;
        }
        self.send_pending().await
    }
}

#[async_trait]
impl Hijack for StreamingSink {
    async fn hijack(&mut self) -> io::Result<Box<dyn HijackedConn>> {
        let on_upgrade = self.on_upgrade.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Unsupported, "connection cannot be upgraded")
        })?;
        let head_tx = self.head_tx.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Other, "response already committed")
        })?;
        Ok(Box::new(HyperConn {
            head_tx: Some(head_tx),
            on_upgrade,
        }))
    }
}

/// Client connection handed over by hyper after a `101` response.
struct HyperConn {
    head_tx: Option<oneshot::Sender<Response<Body>>>,
    on_upgrade: OnUpgrade,
}

#[async_trait]
impl HijackedConn for HyperConn {
    async fn write_head(&mut self, status: StatusCode, headers: &HeaderMap) -> io::Result<()> {
        let head_tx = self
            .head_tx
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "head already written"))?;
        let mut response = Response::new(Body::empty());
        *response.status_mut() = status;
        *response.headers_mut() = headers.clone();
        head_tx.send(response).map_err(|_| client_gone())
    }

    async fn into_io(self: Box<Self>) -> io::Result<Box<dyn Duplex>> {
        let upgraded = self
            .on_upgrade
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e))?;
        Ok(Box::new(TokioIo::new(upgraded)))
    }
}
