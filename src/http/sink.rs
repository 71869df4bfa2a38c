//! Downstream response sink and its optional capabilities.
//!
//! The proxy writes responses through [`ResponseSink`] rather than by
//! returning a `Response` value, so that status, body chunks, flushes and
//! trailers reach the client as they arrive from upstream.
//!
//! # Design Decisions
//! - Capabilities (flush, hijack) are probed at runtime through `as_*`
//!   methods, because wrappers such as access logging sit between the
//!   proxy and the real connection
//! - A wrapper exposes what it wraps through [`ResponseSink::inner_sink`];
//!   [`find_flusher`] walks that chain

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use std::io;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufWriter};

/// Where a proxied response is written.
#[async_trait]
pub trait ResponseSink: Send {
    /// Headers sent with the status line. Changes after the head is written
    /// have no effect.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Trailers sent after the body.
    fn trailers_mut(&mut self) -> &mut HeaderMap;

    /// Commit the status line and headers. Only the first call counts.
    async fn write_head(&mut self, status: StatusCode) -> io::Result<()>;

    /// Write body bytes, committing a `200 OK` head first if needed.
    async fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    fn as_flush(&mut self) -> Option<&mut dyn Flush> {
        None
    }

    /// The sink this one wraps, if any.
    fn inner_sink(&mut self) -> Option<&mut dyn ResponseSink> {
        None
    }

    fn as_hijack(&mut self) -> Option<&mut dyn Hijack> {
        None
    }
}

/// Pushes buffered body bytes to the client.
#[async_trait]
pub trait Flush: Send {
    async fn flush(&mut self) -> io::Result<()>;
}

/// Takes over the raw client connection.
#[async_trait]
pub trait Hijack: Send {
    async fn hijack(&mut self) -> io::Result<Box<dyn HijackedConn>>;
}

/// A client connection taken over from the HTTP layer.
#[async_trait]
pub trait HijackedConn: Send {
    /// Write a response head verbatim and flush it.
    async fn write_head(&mut self, status: StatusCode, headers: &HeaderMap) -> io::Result<()>;

    /// The bidirectional byte stream behind the connection.
    async fn into_io(self: Box<Self>) -> io::Result<Box<dyn Duplex>>;
}

/// A bidirectional byte stream.
pub trait Duplex: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Duplex for T {}

/// Write all of `buf` to `sink`.
pub async fn write_all(sink: &mut dyn ResponseSink, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        let n = sink.write(buf).await?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "sink accepted no bytes"));
        }
        buf = &buf[n..];
    }
    Ok(())
}

/// Locate a flush capability on `sink` or anything it wraps.
pub fn find_flusher(sink: &mut dyn ResponseSink) -> Option<&mut dyn Flush> {
    if sink.as_flush().is_some() {
        return sink.as_flush();
    }
    sink.inner_sink().and_then(find_flusher)
}

/// Flush `sink` if any layer supports it. Returns whether a flush happened.
pub async fn flush(sink: &mut dyn ResponseSink) -> io::Result<bool> {
    match find_flusher(sink) {
        Some(flusher) => {
            flusher.flush().await?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Hijacked connection over a plain byte stream.
///
/// Writes the head in HTTP/1.1 wire format.
pub struct RawConn<S> {
    io: BufWriter<S>,
}

impl<S> RawConn<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(io: S) -> Self {
        Self {
            io: BufWriter::new(io),
        }
    }
}

/// Serialize a response head in HTTP/1.1 wire format.
pub fn encode_head(status: StatusCode, headers: &HeaderMap) -> Vec<u8> {
    let mut head = format!(
        "HTTP/1.1 {} {}\r\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    )
    .into_bytes();
    for (name, value) in headers {
        head.extend_from_slice(name.as_str().as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    head.extend_from_slice(b"\r\n");
    head
}

#[async_trait]
impl<S> HijackedConn for RawConn<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn write_head(&mut self, status: StatusCode, headers: &HeaderMap) -> io::Result<()> {
        self.io.write_all(&encode_head(status, headers)).await?;
        self.io.flush().await
    }

    async fn into_io(self: Box<Self>) -> io::Result<Box<dyn Duplex>> {
        Ok(Box::new(self.io))
    }
}
