//! Outbound request rewriting.
//!
//! # Responsibilities
//! - Give rewrite callbacks a view of the inbound request and mutable
//!   access to the outbound one ([`ProxyRequest`])
//! - Merge a target URL into the outbound URL ([`merge_url`])
//! - Provide the round-robin rewrite used by the binary
//!
//! # Design Decisions
//! - Scheme, host and port always come from the target
//! - Paths and queries are joined target-first with exactly one separator
//! - A rewrite that sets a target also drops the outbound `Host` header, so
//!   the transport derives it from the new authority

use axum::body::Body;
use axum::http::header::HOST;
use axum::http::request::Parts;
use axum::http::{Request, Uri};
use std::fmt::Write as _;
use std::sync::Arc;
use url::{Position, Url};

use crate::error::BoxError;
use crate::http::headers;
use crate::load_balancer::RoundRobin;

/// Callback that points the outbound request somewhere.
pub type RewriteFn = Arc<dyn Fn(&mut ProxyRequest<'_>) -> Result<(), BoxError> + Send + Sync>;

/// The pair of requests a rewrite works on.
pub struct ProxyRequest<'a> {
    /// The request as received. Read-only.
    pub inbound: &'a Parts,
    /// The request that will be sent upstream.
    pub outbound: &'a mut Request<Body>,
}

impl ProxyRequest<'_> {
    /// Route the outbound request to `target`, keeping the inbound path
    /// and query beneath the target's own.
    pub fn set_url(&mut self, target: &Url) -> Result<(), BoxError> {
        let mut url = request_url(self.outbound.uri())?;
        merge_url(&mut url, target)?;
        *self.outbound.uri_mut() = url[..Position::AfterQuery].parse::<Uri>()?;
        self.outbound.headers_mut().remove(HOST);
        Ok(())
    }

    /// Add `Forwarded` and `X-Forwarded-*` headers describing the inbound hop.
    pub fn set_forwarded(&mut self) {
        headers::set_forwarded(self.inbound, self.outbound.headers_mut());
    }
}

/// Rewrite that sends each request to the next round-robin target.
pub fn round_robin(
    targets: Arc<RoundRobin>,
) -> impl Fn(&mut ProxyRequest<'_>) -> Result<(), BoxError> + Send + Sync + 'static {
    move |request: &mut ProxyRequest<'_>| {
        let target = targets.next_target();
        request.set_url(target)?;
        request.set_forwarded();
        Ok(())
    }
}

fn request_url(uri: &Uri) -> Result<Url, url::ParseError> {
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    Url::parse(&format!("http://request.invalid{}", path_and_query))
}

/// Merge `src` into `dst`.
///
/// Scheme, host and port are taken from `src`. User info comes from `src`
/// when it has any. Path and query are joined `src` first. The fragment is
/// replaced only when `src` has a non-empty one.
pub fn merge_url(dst: &mut Url, src: &Url) -> Result<(), url::ParseError> {
    let mut merged = format!("{}://", src.scheme());

    let (user, password) = if !src.username().is_empty() || src.password().is_some() {
        (src.username(), src.password())
    } else {
        (dst.username(), dst.password())
    };
    if !user.is_empty() || password.is_some() {
        merged.push_str(user);
        if let Some(password) = password {
            merged.push(':');
            merged.push_str(password);
        }
        merged.push('@');
    }

    merged.push_str(src.host_str().unwrap_or_default());
    if let Some(port) = src.port() {
        let _ = write!(merged, ":{}", port);
    }

    merged.push_str(&join_with_separator(src.path(), dst.path(), '/'));

    let query = join_with_separator(src.query().unwrap_or(""), dst.query().unwrap_or(""), '&');
    if !query.is_empty() {
        merged.push('?');
        merged.push_str(&query);
    }

    let fragment = match src.fragment() {
        Some(f) if !f.is_empty() => Some(f),
        _ => dst.fragment(),
    };
    if let Some(fragment) = fragment {
        merged.push('#');
        merged.push_str(fragment);
    }

    *dst = Url::parse(&merged)?;
    Ok(())
}

/// Join `a` and `b` so exactly one `sep` sits between them.
///
/// An empty side yields the other side unchanged.
pub fn join_with_separator(a: &str, b: &str, sep: char) -> String {
    if a.is_empty() || b.is_empty() {
        return format!("{}{}", a, b);
    }
    match (a.ends_with(sep), b.starts_with(sep)) {
        (true, true) => format!("{}{}", a, &b[sep.len_utf8()..]),
        (false, false) => format!("{}{}{}", a, sep, b),
        _ => format!("{}{}", a, b),
    }
}
