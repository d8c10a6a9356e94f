//! Prometheus metrics for gateway observability.
//!
//! Metrics are exposed via a dedicated HTTP listener (default port 9090,
//! disabled with `METRICS_PORT=0`).
//!
//! # Available Metrics
//!
//! ## Counters
//! - `gateway_requests_total` - Requests handled (labels: method, status, outcome)
//! - `gateway_rate_limit_decisions_total` - Limiter decisions (labels: backend, decision)
//! - `gateway_rate_limit_store_errors_total` - Failed store round trips (labels: backend)
//! - `gateway_upstream_calls_total` - Forwarded calls (labels: result)
//! - `gateway_audit_failures_total` - Audit records that could not be written (labels: kind)
//! - `gateway_cancelled_requests_total` - Requests abandoned by the client
//!
//! ## Histograms
//! - `gateway_request_duration_seconds` - End-to-end request duration (labels: method, outcome)
//! - `gateway_upstream_duration_seconds` - Upstream call duration (labels: result)
//!
//! ## Gauges
//! - `gateway_local_store_keys` - Live keys in the in-process counter store
//!
//! Endpoint paths are never used as labels: they are client-controlled.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const REQUESTS_TOTAL: &str = "gateway_requests_total";
    pub const RATE_LIMIT_DECISIONS_TOTAL: &str = "gateway_rate_limit_decisions_total";
    pub const RATE_LIMIT_STORE_ERRORS_TOTAL: &str = "gateway_rate_limit_store_errors_total";
    pub const UPSTREAM_CALLS_TOTAL: &str = "gateway_upstream_calls_total";
    pub const AUDIT_FAILURES_TOTAL: &str = "gateway_audit_failures_total";
    pub const CANCELLED_REQUESTS_TOTAL: &str = "gateway_cancelled_requests_total";
    pub const REQUEST_DURATION_SECONDS: &str = "gateway_request_duration_seconds";
    pub const UPSTREAM_DURATION_SECONDS: &str = "gateway_upstream_duration_seconds";
    pub const LOCAL_STORE_KEYS: &str = "gateway_local_store_keys";
}

/// Initialize the Prometheus metrics exporter on `metrics_addr`.
///
/// # Errors
///
/// Returns a message if the exporter cannot be installed (port in use, or a
/// recorder is already installed).
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(names::REQUESTS_TOTAL, "Total number of requests handled by the gateway");
    describe_counter!(
        names::RATE_LIMIT_DECISIONS_TOTAL,
        "Rate limit decisions by backend and result"
    );
    describe_counter!(
        names::RATE_LIMIT_STORE_ERRORS_TOTAL,
        "Rate limit store round trips that failed or timed out"
    );
    describe_counter!(names::UPSTREAM_CALLS_TOTAL, "Calls forwarded to the upstream service");
    describe_counter!(
        names::AUDIT_FAILURES_TOTAL,
        "Audit records dropped or not written"
    );
    describe_counter!(
        names::CANCELLED_REQUESTS_TOTAL,
        "Requests abandoned by the client before a response was sent"
    );

    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "End-to-end request duration in seconds"
    );
    describe_histogram!(
        names::UPSTREAM_DURATION_SECONDS,
        "Upstream call duration in seconds"
    );

    describe_gauge!(
        names::LOCAL_STORE_KEYS,
        "Keys currently held by the in-process rate limit store"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

// =============================================================================
// Counter Recording Functions
// =============================================================================

/// Record a finished request with its terminal outcome ("success", "rejected").
pub fn record_request(method: &str, status: u16, outcome: &str, duration_secs: f64) {
    counter!(names::REQUESTS_TOTAL, "method" => method.to_string(), "status" => status.to_string(), "outcome" => outcome.to_string())
        .increment(1);
    histogram!(names::REQUEST_DURATION_SECONDS, "method" => method.to_string(), "outcome" => outcome.to_string())
        .record(duration_secs);
}

/// Record one limiter decision.
pub fn record_rate_limit_decision(backend: &str, admitted: bool) {
    let decision = if admitted { "admit" } else { "deny" };
    counter!(names::RATE_LIMIT_DECISIONS_TOTAL, "backend" => backend.to_string(), "decision" => decision)
        .increment(1);
}

/// Record a failed or timed-out store round trip.
pub fn record_store_error(backend: &str) {
    counter!(names::RATE_LIMIT_STORE_ERRORS_TOTAL, "backend" => backend.to_string()).increment(1);
}

/// Record an upstream call and its duration. `result` is "success",
/// "unreachable" or "timeout".
pub fn record_upstream_call(result: &str, duration_secs: f64) {
    counter!(names::UPSTREAM_CALLS_TOTAL, "result" => result.to_string()).increment(1);
    histogram!(names::UPSTREAM_DURATION_SECONDS, "result" => result.to_string())
        .record(duration_secs);
}

/// Record an audit record that could not be delivered to its sink.
pub fn record_audit_failure(kind: &str) {
    counter!(names::AUDIT_FAILURES_TOTAL, "kind" => kind.to_string()).increment(1);
}

pub fn record_cancelled_request() {
    counter!(names::CANCELLED_REQUESTS_TOTAL).increment(1);
}

// =============================================================================
// Gauge Recording Functions
// =============================================================================

/// Update the local store key gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_local_store_keys(keys: usize) {
    gauge!(names::LOCAL_STORE_KEYS).set(keys as f64);
}
