//! Response body streaming.
//!
//! Copies an upstream body into the downstream sink through a pooled
//! buffer. Each chunk is flushed right away when the response looks like a
//! stream (unknown length, `text/event-stream` or chunked). Otherwise
//! writes are coalesced up to the buffer size.

use axum::body::Body;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use axum::http::HeaderMap;
use bytes::Buf;
use http_body_util::BodyExt;

use crate::error::{cause, ProxyError};
use crate::http::header_list;
use crate::http::sink::{self, ResponseSink};
use crate::proxy::buffer_pool::BufferPool;

/// When body bytes are pushed to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Flush after every write.
    Immediate,
    /// Let the sink decide.
    Buffered,
}

/// Pick the flush policy for a response.
///
/// `body_len` is the exact body length if known from the body itself.
/// Must run before hop-by-hop headers are stripped.
pub fn flush_policy(headers: &HeaderMap, body_len: Option<u64>) -> FlushPolicy {
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .or(body_len);
    if declared.is_none() {
        return FlushPolicy::Immediate;
    }

    let event_stream = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|media| media.trim().eq_ignore_ascii_case("text/event-stream"));
    if event_stream || header_list::has_token(headers, &TRANSFER_ENCODING, "chunked") {
        return FlushPolicy::Immediate;
    }
    FlushPolicy::Buffered
}

/// What a body copy produced.
#[derive(Debug, Default)]
pub struct CopyOutcome {
    /// Body bytes written to the sink.
    pub bytes: u64,
    /// Trailers received from upstream, if any.
    pub trailers: Option<HeaderMap>,
}

/// Copy `body` into `sink`.
///
/// Errors carry no status: the head is already written.
pub async fn copy_body(
    sink: &mut dyn ResponseSink,
    mut body: Body,
    policy: FlushPolicy,
    pool: &BufferPool,
) -> Result<CopyOutcome, ProxyError> {
    let mut buf = pool.checkout();
    let mut filled = 0;
    let mut outcome = CopyOutcome::default();

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|e| ProxyError::committed(cause::COPY_FAILED).with_source(e))?;
        let mut data = match frame.into_data() {
            Ok(data) => data,
            Err(frame) => {
                if let Ok(trailers) = frame.into_trailers() {
                    outcome
                        .trailers
                        .get_or_insert_with(HeaderMap::new)
                        .extend(trailers);
                }
                continue;
            }
        };

        while data.has_remaining() {
            let n = data.remaining().min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&data[..n]);
            data.advance(n);
            filled += n;

            let chunk_done = !data.has_remaining() && policy == FlushPolicy::Immediate;
            if filled == buf.len() || chunk_done {
                write_chunk(sink, &buf[..filled], policy).await?;
                outcome.bytes += filled as u64;
                filled = 0;
            }
        }
    }

    if filled > 0 {
        write_chunk(sink, &buf[..filled], policy).await?;
        outcome.bytes += filled as u64;
    }
    Ok(outcome)
}

async fn write_chunk(
    sink: &mut dyn ResponseSink,
    chunk: &[u8],
    policy: FlushPolicy,
) -> Result<(), ProxyError> {
    sink::write_all(sink, chunk)
        .await
        .map_err(|e| ProxyError::committed(cause::COPY_FAILED).with_source(e))?;
    if policy == FlushPolicy::Immediate {
        sink::flush(sink)
            .await
            .map_err(|e| ProxyError::committed(cause::COPY_FAILED).with_source(e))?;
    }
    Ok(())
}
