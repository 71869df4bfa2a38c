//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status, upstream
//! - `proxy_request_duration_seconds` (histogram): latency distribution
//! - `proxy_response_bytes_total` (counter): body bytes written to clients
//! - `proxy_errors_total` (counter): proxy errors by cause tag
//! - `proxy_upgrades_total` (counter): upgraded connections by outcome

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    let builder = PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a completed request.
pub fn record_request(method: &str, status: u16, upstream: &str, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
        ("upstream", upstream.to_string()),
    ];
    counter!("proxy_requests_total", &labels[..]).increment(1);
    histogram!("proxy_request_duration_seconds", &labels[..]).record(start.elapsed().as_secs_f64());
}

/// Record body bytes written to a client.
pub fn record_response_bytes(bytes: u64) {
    counter!("proxy_response_bytes_total").increment(bytes);
}

/// Record a proxy error by cause tag.
pub fn record_error(cause: &'static str) {
    counter!("proxy_errors_total", "cause" => cause).increment(1);
}

/// Record the outcome of an upgraded connection.
pub fn record_upgrade(outcome: &'static str) {
    counter!("proxy_upgrades_total", "outcome" => outcome).increment(1);
}
