//! Response observation.
//!
//! [`ResponseObserver`] wraps a sink and records the status and body size
//! written through it. In intercept mode body bytes go to a secondary
//! writer instead of the client.

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::sink::{Hijack, ResponseSink};

type Secondary<'a> = Box<dyn AsyncWrite + Send + Unpin + 'a>;

/// Records what is written to the wrapped sink.
pub struct ResponseObserver<'a> {
    inner: &'a mut dyn ResponseSink,
    status: Option<StatusCode>,
    bytes: Option<u64>,
    head_written: bool,
    secondary: Option<Secondary<'a>>,
}

impl<'a> ResponseObserver<'a> {
    pub fn new(inner: &'a mut dyn ResponseSink) -> Self {
        Self {
            inner,
            status: None,
            bytes: None,
            head_written: false,
            secondary: None,
        }
    }

    /// Observer that diverts body bytes to `secondary`.
    ///
    /// Counters stay unset until a status is set explicitly through
    /// [`ResponseSink::write_head`].
    pub fn intercepting(
        inner: &'a mut dyn ResponseSink,
        secondary: impl AsyncWrite + Send + Unpin + 'a,
    ) -> Self {
        Self {
            secondary: Some(Box::new(secondary)),
            ..Self::new(inner)
        }
    }

    /// Status written so far.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Body bytes written so far, `None` before the first counted write.
    pub fn bytes_written(&self) -> Option<u64> {
        self.bytes
    }

    /// Numeric status, `-1` before anything was written.
    pub fn status_code(&self) -> i32 {
        self.status.map(|s| i32::from(s.as_u16())).unwrap_or(-1)
    }

    /// Numeric byte count, `-1` before the first counted write.
    pub fn bytes_code(&self) -> i64 {
        self.bytes
            .map(|b| i64::try_from(b).unwrap_or(i64::MAX))
            .unwrap_or(-1)
    }

    fn count(&mut self, n: usize) {
        let total = self.bytes.unwrap_or(0).saturating_add(n as u64);
        self.bytes = Some(total);
    }
}

#[async_trait]
impl ResponseSink for ResponseObserver<'_> {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    fn trailers_mut(&mut self) -> &mut HeaderMap {
        self.inner.trailers_mut()
    }

    async fn write_head(&mut self, status: StatusCode) -> io::Result<()> {
        if self.head_written {
            return Ok(());
        }
        self.head_written = true;
        self.status = Some(status);
        if self.secondary.is_some() {
            return Ok(());
        }
        self.inner.write_head(status).await
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(secondary) = self.secondary.as_mut() {
            secondary.write_all(buf).await?;
            if self.status.is_some() {
                self.count(buf.len());
            }
            return Ok(buf.len());
        }
        if !self.head_written {
            self.write_head(StatusCode::OK).await?;
        }
        let n = self.inner.write(buf).await?;
        self.count(n);
        Ok(n)
    }

    fn inner_sink(&mut self) -> Option<&mut dyn ResponseSink> {
        Some(&mut *self.inner)
    }

    fn as_hijack(&mut self) -> Option<&mut dyn Hijack> {
        self.inner.as_hijack()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Capture {
        headers: HeaderMap,
        status: Option<StatusCode>,
        body: Vec<u8>,
    }

    #[async_trait]
    impl ResponseSink for Capture {
        fn headers_mut(&mut self) -> &mut HeaderMap {
            &mut self.headers
        }
        fn trailers_mut(&mut self) -> &mut HeaderMap {
            &mut self.headers
        }
        async fn write_head(&mut self, status: StatusCode) -> io::Result<()> {
            self.status.get_or_insert(status);
            Ok(())
        }
        async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.body.extend_from_slice(buf);
            Ok(buf.len())
        }
    }

    #[tokio::test]
    async fn counters_start_unset() {
        let mut capture = Capture::default();
        let observer = ResponseObserver::new(&mut capture);
        assert_eq!(observer.status_code(), -1);
        assert_eq!(observer.bytes_code(), -1);
    }

    #[tokio::test]
    async fn first_write_implies_ok() {
        let mut capture = Capture::default();
        let mut observer = ResponseObserver::new(&mut capture);
        observer.write(b"hello").await.unwrap();
        observer.write(b" world").await.unwrap();
        assert_eq!(observer.status(), Some(StatusCode::OK));
        assert_eq!(observer.bytes_written(), Some(11));
        drop(observer);
        assert_eq!(capture.status, Some(StatusCode::OK));
        assert_eq!(capture.body, b"hello world");
    }

    #[tokio::test]
    async fn explicit_status_wins() {
        let mut capture = Capture::default();
        let mut observer = ResponseObserver::new(&mut capture);
        observer.write_head(StatusCode::NOT_FOUND).await.unwrap();
        observer.write_head(StatusCode::OK).await.unwrap();
        assert_eq!(observer.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(observer.bytes_written(), None);
    }

    #[tokio::test]
    async fn intercept_diverts_body() {
        let mut capture = Capture::default();
        let mut diverted = Vec::new();
        {
            let mut observer = ResponseObserver::intercepting(&mut capture, &mut diverted);
            observer.write(b"early").await.unwrap();
            assert_eq!(observer.status(), None);
            assert_eq!(observer.bytes_written(), None);

            observer.write_head(StatusCode::ACCEPTED).await.unwrap();
            observer.write(b"late").await.unwrap();
            assert_eq!(observer.status(), Some(StatusCode::ACCEPTED));
            assert_eq!(observer.bytes_written(), Some(4));
        }
        assert_eq!(diverted, b"earlylate");
        assert!(capture.body.is_empty());
        assert!(capture.status.is_none());
    }
}
