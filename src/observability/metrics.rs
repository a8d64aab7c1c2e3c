//! Metrics collection and exposition.
//!
//! # Metrics
//! - `resilience_requests_total` (counter): settled items by backend, outcome
//! - `resilience_request_duration_seconds` (histogram): enqueue to settlement
//! - `resilience_queue_wait_seconds` (histogram): time spent waiting per dispatch
//! - `resilience_attempt_failures_total` (counter): failed attempts by backend, kind
//! - `resilience_breaker_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `resilience_queue_depth` (gauge): tracked items per backend
//! - `resilience_fallbacks_total` (counter): degraded responses served
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, which keeps tests quiet
//! - Prometheus exposition is optional and bound to its own address

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::backend::BackendId;
use crate::resilience::circuit_breaker::CircuitState;
use crate::resilience::classifier::ErrorKind;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    let builder = PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => tracing::info!(address = %addr, "Prometheus metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install Prometheus recorder"),
    }
}

pub fn record_request(backend: BackendId, outcome: &'static str, elapsed: Duration) {
    counter!(
        "resilience_requests_total",
        "backend" => backend.as_str(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(
        "resilience_request_duration_seconds",
        "backend" => backend.as_str()
    )
    .record(elapsed.as_secs_f64());
}

pub fn record_queue_wait(backend: BackendId, wait: Duration) {
    histogram!("resilience_queue_wait_seconds", "backend" => backend.as_str())
        .record(wait.as_secs_f64());
}

pub fn record_attempt_failure(backend: BackendId, kind: ErrorKind) {
    counter!(
        "resilience_attempt_failures_total",
        "backend" => backend.as_str(),
        "kind" => kind.as_str()
    )
    .increment(1);
}

pub fn record_breaker_state(backend: BackendId, state: CircuitState) {
    gauge!("resilience_breaker_state", "backend" => backend.as_str()).set(state.as_gauge());
}

pub fn set_queue_depth(backend: BackendId, depth: usize) {
    gauge!("resilience_queue_depth", "backend" => backend.as_str()).set(depth as f64);
}

pub fn record_fallback(backend: BackendId) {
    counter!("resilience_fallbacks_total", "backend" => backend.as_str()).increment(1);
}
