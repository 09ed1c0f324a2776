//! Metrics collection and exposition.
//!
//! # Metrics
//! - `edge_guard_admission_total` (counter): admission decisions by outcome
//! - `edge_guard_tracked_clients` (gauge): client entries held by the limiter
//! - `edge_guard_csrf_total` (counter): CSRF checks by outcome
//! - `edge_guard_cache_degraded_total` (counter): cache calls that fell back
//! - `edge_guard_secret_rotations_total` (counter): rotation attempts by outcome
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Label values are small fixed sets, never client keys or tokens

use std::net::SocketAddr;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_admission(outcome: &'static str) {
    metrics::counter!("edge_guard_admission_total", "outcome" => outcome).increment(1);
}

pub fn record_tracked_clients(count: usize) {
    metrics::gauge!("edge_guard_tracked_clients").set(count as f64);
}

pub fn record_csrf(outcome: &'static str) {
    metrics::counter!("edge_guard_csrf_total", "outcome" => outcome).increment(1);
}

pub fn record_cache_degraded(op: &'static str) {
    metrics::counter!("edge_guard_cache_degraded_total", "op" => op).increment(1);
}

pub fn record_rotation(outcome: &'static str) {
    metrics::counter!("edge_guard_secret_rotations_total", "outcome" => outcome).increment(1);
}
