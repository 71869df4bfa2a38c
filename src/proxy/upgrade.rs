//! Protocol upgrades (`101 Switching Protocols`).
//!
//! # Data Flow
//! ```text
//! upstream 101 ──▶ validate protocol ──▶ take upstream stream
//!     ──▶ hijack client ──▶ write 101 head ──▶ pump both directions
//!                                               │
//!              client ⇄ [task A / task B] ⇄ upstream
//!                                               │
//!                                    completion queue (2)
//! ```
//!
//! # Design Decisions
//! - Nothing is written to the client until both sides are known to be
//!   usable, so early failures can still answer with a status
//! - Each direction runs on its own task; a failure stops the other
//! - The handler waits for both directions before returning

use axum::body::Body;
use axum::http::header::UPGRADE;
use axum::http::request::Parts;
use axum::http::{HeaderMap, Response, StatusCode};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::error::{cause, ProxyError};
use crate::http::headers;
use crate::http::sink::{Duplex, ResponseSink};
use crate::observability::metrics;
use crate::proxy::buffer_pool::BufferPool;
use crate::proxy::transport::UpgradeIo;

/// Finish a `101` response by splicing the client and upstream streams.
pub(crate) async fn handle_upgrade(
    sink: &mut dyn ResponseSink,
    inbound: &Parts,
    mut response: Response<Body>,
    pool: &BufferPool,
) -> Result<(), ProxyError> {
    let requested = headers::upgrade_type(&inbound.headers).unwrap_or_default();
    let granted = response
        .headers()
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    if requested.is_empty() || !requested.eq_ignore_ascii_case(&granted) {
        metrics::record_upgrade("mismatch");
        return Err(
            ProxyError::new(cause::UPGRADE_MISMATCH, Some(StatusCode::BAD_REQUEST)).with_detail(
                format!("backend switched to {:?} when {:?} was requested", granted, requested),
            ),
        );
    }

    let upstream = take_upstream_io(&mut response).await?;

    let head = merged_head(sink.headers_mut(), response.headers());

    let Some(hijacker) = sink.as_hijack() else {
        return Err(ProxyError::new(
            cause::HIJACK_UNSUPPORTED,
            Some(StatusCode::INTERNAL_SERVER_ERROR),
        ));
    };
    let mut conn = hijacker.hijack().await.map_err(|e| {
        ProxyError::new(cause::HIJACK_FAILED, Some(StatusCode::INTERNAL_SERVER_ERROR)).with_source(e)
    })?;

    conn.write_head(response.status(), &head)
        .await
        .map_err(|e| ProxyError::committed(cause::UPGRADE_WRITE_FAILED).with_source(e))?;
    let client = conn
        .into_io()
        .await
        .map_err(|e| ProxyError::committed(cause::HIJACK_FAILED).with_source(e))?;

    tracing::debug!(protocol = %granted, "Connection upgraded");
    match pump_bidirectional(client, upstream, pool).await {
        Ok(()) => {
            metrics::record_upgrade("closed");
            Ok(())
        }
        Err(e) => {
            metrics::record_upgrade("error");
            Err(ProxyError::committed(cause::UPGRADE_COPY_FAILED).with_source(e))
        }
    }
}

async fn take_upstream_io(response: &mut Response<Body>) -> Result<Box<dyn Duplex>, ProxyError> {
    let not_duplex =
        || ProxyError::new(cause::UPGRADE_NOT_DUPLEX, Some(StatusCode::INTERNAL_SERVER_ERROR));

    if let Some(io) = response.extensions_mut().remove::<UpgradeIo>().and_then(|io| io.take()) {
        return Ok(io);
    }
    let on_upgrade = response
        .extensions_mut()
        .remove::<OnUpgrade>()
        .ok_or_else(not_duplex)?;
    let upgraded = on_upgrade.await.map_err(|e| not_duplex().with_source(e))?;
    Ok(Box::new(TokioIo::new(upgraded)))
}

/// Copy bytes both ways until each direction ends.
///
/// Returns the first error either direction hit.
pub async fn pump_bidirectional(
    client: Box<dyn Duplex>,
    upstream: Box<dyn Duplex>,
    pool: &BufferPool,
) -> io::Result<()> {
    let (client_read, client_write) = tokio::io::split(client);
    let (upstream_read, upstream_write) = tokio::io::split(upstream);

    let (stop_tx, stop_rx) = watch::channel(false);
    let stop = Stop {
        tx: Arc::new(stop_tx),
        rx: stop_rx,
    };
    let (done_tx, mut done_rx) = mpsc::channel::<io::Result<u64>>(2);

    spawn_pump(client_read, upstream_write, pool.clone(), stop.clone(), done_tx.clone());
    spawn_pump(upstream_read, client_write, pool.clone(), stop, done_tx);

    let mut first_error = None;
    for _ in 0..2 {
        match done_rx.recv().await {
            Some(Err(e)) => {
                first_error.get_or_insert(e);
            }
            Some(Ok(_)) => {}
            None => break,
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Stop signal shared by the two pump directions.
#[derive(Clone)]
struct Stop {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Stop {
    fn trigger(&self) {
        self.tx.send_replace(true);
    }

    async fn triggered(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

fn spawn_pump<R, W>(
    mut reader: R,
    mut writer: W,
    pool: BufferPool,
    mut stop: Stop,
    done: mpsc::Sender<io::Result<u64>>,
) where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let result = tokio::select! {
            res = copy_one_way(&mut reader, &mut writer, &pool) => res,
            _ = stop.triggered() => Ok(0),
        };
        if result.is_err() {
            stop.trigger();
        }
        let _ = done.send(result).await;
    });
}

async fn copy_one_way<R, W>(reader: &mut R, writer: &mut W, pool: &BufferPool) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = pool.checkout();
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            writer.shutdown().await?;
            return Ok(total);
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        total += n as u64;
    }
}

/// The sink's pending headers followed by the upstream `101` headers.
fn merged_head(sink_headers: &HeaderMap, upstream: &HeaderMap) -> HeaderMap {
    let mut head = sink_headers.clone();
    headers::copy_headers(&mut head, upstream);
    head
}
