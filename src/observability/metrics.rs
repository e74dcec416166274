//! Metrics collection and exposition.
//!
//! # Metrics
//! - `admission_requests_total` (counter): admitted requests by endpoint
//! - `admission_rejections_total` (counter): rejections by kind
//! - `store_failures_total` (counter): fail-open events by operation
//!
//! # Design Decisions
//! - Low-overhead counter updates; no per-request histograms in the
//!   admission path
//! - Prometheus exposition via a separate listener, off the request path

use std::net::SocketAddr;

use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus exposition endpoint. Must run inside the Tokio
/// runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint started"),
        Err(err) => tracing::error!(error = %err, "Failed to start metrics endpoint"),
    }
}

/// Count a request that passed the full pipeline.
pub fn record_admitted(endpoint: &str) {
    counter!("admission_requests_total", "endpoint" => endpoint.to_string()).increment(1);
}

/// Count a rejection by its error kind.
pub fn record_rejected(kind: &'static str) {
    counter!("admission_rejections_total", "kind" => kind).increment(1);
}

/// Count a store failure that was converted into a fail-open result.
pub fn record_store_failure(operation: &'static str) {
    counter!("store_failures_total", "operation" => operation).increment(1);
}
