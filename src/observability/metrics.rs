//! Metrics collection and exposition.
//!
//! # Metrics
//! - `relay_requests_total` (counter): relayed requests by method, status
//! - `relay_request_duration_seconds` (histogram): time to response headers
//! - `relay_upstream_errors_total` (counter): failed upstream exchanges by kind
//! - `relay_websocket_sessions` (gauge): open WebSocket relays
//! - `relay_websocket_messages_total` (counter): relayed frames by direction
//! - `relay_media_bytes_total` (counter): metered media bytes
//! - `relay_stream_records` (gauge): live stream-stat records

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, elapsed: Duration) {
    metrics::counter!(
        "relay_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("relay_request_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_upstream_error(kind: &'static str) {
    metrics::counter!("relay_upstream_errors_total", "kind" => kind).increment(1);
}

pub fn websocket_opened() {
    metrics::gauge!("relay_websocket_sessions").increment(1.0);
}

pub fn websocket_closed() {
    metrics::gauge!("relay_websocket_sessions").decrement(1.0);
}

pub fn record_websocket_message(direction: &'static str) {
    metrics::counter!("relay_websocket_messages_total", "direction" => direction).increment(1);
}

pub fn record_media_bytes(bytes: u64) {
    metrics::counter!("relay_media_bytes_total").increment(bytes);
}

pub fn set_stream_records(count: usize) {
    metrics::gauge!("relay_stream_records").set(count as f64);
}
