//! Proxy error model.
//!
//! Every failure the proxy core can report travels as a [`ProxyError`]: a
//! short cause tag, the status code to answer with (if any), an optional
//! detail string for logs, and the underlying error.
//!
//! # Design Decisions
//! - One error shape for every subsystem
//! - `status == None` means the response is already committed (or the
//!   failure is intentionally silent); nothing more may be written
//! - Equality looks at cause and status only

use axum::http::StatusCode;
use std::fmt;

/// Boxed error used at trait boundaries (transports, hooks, rewrites).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Cause tags reported by the proxy core.
pub mod cause {
    pub const MISSING_REWRITE: &str = "missing rewrite";
    pub const REWRITE_FAILED: &str = "rewrite failed";
    pub const PRE_HOOK_FAILED: &str = "pre-hook failed";
    pub const TRANSPORT_FAILED: &str = "transport failed";
    pub const POST_HOOK_FAILED: &str = "post-hook failed";
    pub const UPGRADE_MISMATCH: &str = "upgrade mismatch";
    pub const UPGRADE_NOT_DUPLEX: &str = "upgrade body not duplex";
    pub const HIJACK_UNSUPPORTED: &str = "hijack unsupported";
    pub const HIJACK_FAILED: &str = "hijack failed";
    pub const UPGRADE_WRITE_FAILED: &str = "upgrade write failed";
    pub const UPGRADE_COPY_FAILED: &str = "upgrade copy failed";
    pub const COPY_FAILED: &str = "copy failed";
    pub const FLUSH_FAILED: &str = "flush failed";
}

/// Error reported by the proxy orchestrator and its collaborators.
#[derive(Debug)]
pub struct ProxyError {
    cause: &'static str,
    status: Option<StatusCode>,
    detail: Option<String>,
    source: Option<BoxError>,
}

impl ProxyError {
    /// Create an error with a cause tag and the status to answer with.
    ///
    /// # Panics
    ///
    /// Panics if `cause` is empty.
    pub fn new(cause: &'static str, status: Option<StatusCode>) -> Self {
        assert!(!cause.is_empty(), "proxy error cause must not be empty");
        Self {
            cause,
            status,
            detail: None,
            source: None,
        }
    }

    /// Error for a response that has already been (partially) written.
    pub fn committed(cause: &'static str) -> Self {
        Self::new(cause, None)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn cause(&self) -> &'static str {
        self.cause
    }

    /// Status to write, or `None` when nothing more may be written.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Numeric status, `-1` meaning "do not write a response".
    pub fn status_code(&self) -> i32 {
        self.status.map(|s| i32::from(s.as_u16())).unwrap_or(-1)
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// True when the failure came from the client or caller going away.
    pub fn is_cancellation(&self) -> bool {
        let mut current: Option<&(dyn std::error::Error + 'static)> = self
            .source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static));
        while let Some(err) = current {
            if let Some(hyper_err) = err.downcast_ref::<hyper::Error>() {
                if hyper_err.is_canceled() {
                    return true;
                }
            }
            if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
                if io_err.kind() == std::io::ErrorKind::ConnectionAborted {
                    return true;
                }
            }
            current = err.source();
        }
        false
    }
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cause)?;
        if let Some(detail) = &self.detail {
            write!(f, ": {}", detail)?;
        }
        if let Some(source) = &self.source {
            write!(f, ": {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for ProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl PartialEq for ProxyError {
    fn eq(&self, other: &Self) -> bool {
        self.cause == other.cause && self.status == other.status
    }
}

impl Eq for ProxyError {}
