//! Header manipulation for the forwarding path.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers (fixed set plus anything named in `Connection`)
//! - Synthesize `Forwarded` and `X-Forwarded-*` for the outbound request
//! - Copy headers and trailers between maps
//!
//! # Design Decisions
//! - Forwarding chains are appended to, never replaced
//! - A hop can opt out of a forwarding header with [`ForwardedOptOut`]
//! - Forwarding headers are stripped from the outbound copy before rewrite
//!   and rebuilt from the inbound values, so prior hops survive with this
//!   hop appended

use axum::http::header::{
    HeaderName, HeaderValue, CONNECTION, FORWARDED, HOST, PROXY_AUTHENTICATE,
    PROXY_AUTHORIZATION, TE, TRAILER, TRANSFER_ENCODING, UPGRADE,
};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use std::net::{IpAddr, SocketAddr};

use crate::http::header_list;

pub static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub static X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub static X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub static X_FORWARDED_PORT: HeaderName = HeaderName::from_static("x-forwarded-port");

/// Headers meaningful only for a single connection leg.
pub static HOP_BY_HOP_HEADERS: [HeaderName; 9] = [
    CONNECTION,
    HeaderName::from_static("keep-alive"),
    PROXY_AUTHENTICATE,
    PROXY_AUTHORIZATION,
    TE,
    TRAILER,
    TRANSFER_ENCODING,
    UPGRADE,
    HeaderName::from_static("proxy-connection"),
];

/// Identity of the downstream peer, attached to inbound requests by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAddr {
    /// Remote address as reported by the listener, usually `ip:port`.
    pub remote: String,
    /// Whether the downstream connection was TLS.
    pub tls: bool,
}

impl ClientAddr {
    pub fn new(remote: impl Into<String>, tls: bool) -> Self {
        Self {
            remote: remote.into(),
            tls,
        }
    }
}

/// Request extension listing forwarding headers that must not be
/// synthesized for this hop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwardedOptOut(pub Vec<HeaderName>);

impl ForwardedOptOut {
    pub fn contains(&self, name: &HeaderName) -> bool {
        self.0.iter().any(|n| n == name)
    }
}

/// Remove hop-by-hop headers. Idempotent.
pub fn remove_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = header_list::header_tokens(headers, &CONNECTION)
        .into_iter()
        .filter_map(|name| HeaderName::from_bytes(name.as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in &HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

/// Drop every forwarding header.
pub fn remove_forwarded(headers: &mut HeaderMap) {
    headers.remove(FORWARDED);
    headers.remove(&X_FORWARDED_FOR);
    headers.remove(&X_FORWARDED_HOST);
    headers.remove(&X_FORWARDED_PROTO);
    headers.remove(&X_FORWARDED_PORT);
}

/// Append every value of `src` to `dst`.
pub fn copy_headers(dst: &mut HeaderMap, src: &HeaderMap) {
    for (name, value) in src {
        dst.append(name.clone(), value.clone());
    }
}

/// Trailer names the response announced through its `Trailer` header.
pub fn announced_trailers(headers: &HeaderMap) -> Vec<HeaderName> {
    header_list::header_tokens(headers, &TRAILER)
        .into_iter()
        .filter_map(|name| HeaderName::from_bytes(name.as_bytes()).ok())
        .collect()
}

/// The protocol the request asks to switch to, if it asks at all.
pub fn upgrade_type(headers: &HeaderMap) -> Option<String> {
    if !header_list::has_token(headers, &CONNECTION, "upgrade") {
        return None;
    }
    headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Synthesize forwarding headers on `outbound` from the inbound request.
pub fn set_forwarded(inbound: &Parts, outbound: &mut HeaderMap) {
    let opt_out = inbound.extensions.get::<ForwardedOptOut>();
    let skip = |name: &HeaderName| opt_out.is_some_and(|o| o.contains(name));

    let client = inbound.extensions.get::<ClientAddr>();
    let client_ip = client.and_then(|c| split_host_port(&c.remote)).map(|(host, _)| host);
    let proto = request_proto(inbound);
    let host = request_host(inbound);

    if !skip(&FORWARDED) {
        let mut pairs = Vec::new();
        if let Some(ip) = client_ip {
            pairs.push(format!("for={}", forwarded_node(ip)));
        }
        if let Some(host) = host.as_deref() {
            pairs.push(format!("host={}", forwarded_value(host)));
        }
        pairs.push(format!("proto={}", proto));
        let entry = pairs.join(";");
        append_chain(outbound, &FORWARDED, &inbound.headers, &entry);
    }

    if let Some(ip) = client_ip {
        if !skip(&X_FORWARDED_FOR) {
            append_chain(outbound, &X_FORWARDED_FOR, &inbound.headers, ip);
        }
    }

    if let Some(host) = host.as_deref() {
        if !skip(&X_FORWARDED_HOST) {
            set_value(outbound, &X_FORWARDED_HOST, host);
        }
        if !skip(&X_FORWARDED_PORT) {
            let port = split_host_port(host)
                .map(|(_, port)| port.to_string())
                .unwrap_or_else(|| default_port(proto).to_string());
            set_value(outbound, &X_FORWARDED_PORT, &port);
        }
    }

    if !skip(&X_FORWARDED_PROTO) {
        set_value(outbound, &X_FORWARDED_PROTO, proto);
    }
}

fn request_proto(inbound: &Parts) -> &'static str {
    let tls = inbound
        .extensions
        .get::<ClientAddr>()
        .map(|c| c.tls)
        .unwrap_or(false);
    if tls || inbound.uri.scheme_str() == Some("https") {
        "https"
    } else {
        "http"
    }
}

fn request_host(inbound: &Parts) -> Option<String> {
    inbound
        .headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| inbound.uri.authority().map(|a| a.to_string()))
        .filter(|h| !h.is_empty())
}

fn default_port(proto: &str) -> u16 {
    if proto == "https" {
        443
    } else {
        80
    }
}

fn append_chain(outbound: &mut HeaderMap, name: &HeaderName, inbound: &HeaderMap, entry: &str) {
    let prior: Vec<&str> = inbound
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    let value = if prior.is_empty() {
        entry.to_string()
    } else {
        format!("{}, {}", prior.join(", "), entry)
    };
    set_value(outbound, name, &value);
}

fn set_value(headers: &mut HeaderMap, name: &HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(v) => {
            headers.insert(name.clone(), v);
        }
        Err(_) => tracing::debug!(header = %name, "Dropping unrepresentable forwarding header"),
    }
}

/// Split `host:port`, accepting bracketed IPv6 literals.
pub fn split_host_port(raw: &str) -> Option<(&str, &str)> {
    if let Ok(addr) = raw.parse::<SocketAddr>() {
        let port_start = raw.rfind(':')? + 1;
        let host_end = match addr {
            SocketAddr::V4(_) => port_start - 1,
            SocketAddr::V6(_) => port_start - 2,
        };
        let host_start = usize::from(addr.is_ipv6());
        return Some((&raw[host_start..host_end], &raw[port_start..]));
    }
    let (host, port) = raw.rsplit_once(':')?;
    if host.is_empty() || host.contains(':') || port.is_empty() {
        return None;
    }
    if !port.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((host, port))
}

fn forwarded_node(ip: &str) -> String {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V6(_)) => format!("\"[{}]\"", ip),
        Ok(IpAddr::V4(_)) => ip.to_string(),
        Err(_) => forwarded_value(ip),
    }
}

fn forwarded_value(value: &str) -> String {
    if !value.is_empty() && value.bytes().all(is_tchar) {
        value.to_string()
    } else {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

fn is_tchar(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}
