//! Metrics collection and Prometheus exposition.
//!
//! All names follow `auth_{subsystem}_{name}_{unit}`: counters end in
//! `_total`, histograms in `_seconds`, gauges carry no suffix.
//!
//! Recording is a no-op until an exporter is installed, so library code and
//! tests record unconditionally.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::observability::ObservabilityError;

// Listener
const CONNECTIONS_ADMITTED: &str = "auth_connections_admitted_total";
const CONNECTIONS_REJECTED: &str = "auth_connections_rejected_total";
const ACTIVE_CONNECTIONS: &str = "auth_active_connections";

// Requests
const REQUESTS_TOTAL: &str = "auth_requests_total";
const REQUEST_LATENCY: &str = "auth_request_latency_seconds";

// Pool
const POOL_OPENED: &str = "auth_pool_connections_opened_total";
const POOL_DISCARDED: &str = "auth_pool_connections_discarded_total";
const POOL_IDLE: &str = "auth_pool_idle_connections";

/// Latency buckets for request histograms, in seconds.
const LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

/// Install the Prometheus exporter, serving `/metrics` on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), ObservabilityError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets(LATENCY_BUCKETS)
        .map_err(|e| ObservabilityError::Metrics(format!("invalid histogram buckets: {}", e)))?
        .install()
        .map_err(|e| ObservabilityError::Metrics(format!("failed to install exporter: {}", e)))?;

    tracing::info!(metrics_addr = %addr, "Prometheus metrics exporter started");
    Ok(())
}

#[inline]
pub fn record_connection_admitted() {
    counter!(CONNECTIONS_ADMITTED).increment(1);
}

#[inline]
pub fn record_connection_rejected() {
    counter!(CONNECTIONS_REJECTED).increment(1);
}

#[inline]
pub fn set_active_connections(count: u64) {
    gauge!(ACTIVE_CONNECTIONS).set(count as f64);
}

/// Records one completed exchange.
///
/// `auth_requests_total{operation, status}` and the matching latency.
#[inline]
pub fn record_request(operation: &'static str, status: &'static str, start: Instant) {
    counter!(REQUESTS_TOTAL, "operation" => operation, "status" => status).increment(1);
    histogram!(REQUEST_LATENCY, "operation" => operation).record(start.elapsed().as_secs_f64());
}

#[inline]
pub fn record_pool_open() {
    counter!(POOL_OPENED).increment(1);
}

/// `reason` is one of `dead`, `idle_timeout`, `closed`, `broken`,
/// `open_transaction`, `shutdown`.
#[inline]
pub fn record_pool_discard(reason: &'static str) {
    counter!(POOL_DISCARDED, "reason" => reason).increment(1);
}

#[inline]
pub fn set_pool_idle(count: usize) {
    gauge!(POOL_IDLE).set(count as f64);
}
