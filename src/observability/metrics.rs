//! Metrics collection and exposition.
//!
//! # Metrics
//! - `shield_requests_total` (counter): requests seen by the limiter, by outcome
//! - `shield_rate_limited_total` (counter): rejections, by reason
//! - `shield_store_failures_total` (counter): window store errors
//! - `shield_reports_total` (counter): violation reports received, by type
//! - `shield_tracked_clients` (gauge): window records held after the last sweep
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so tests need no setup
//! - The Prometheus exporter is opt-in (`observability.metrics_enabled`)

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its HTTP scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    ::metrics::describe_counter!("shield_requests_total", "Requests seen by the rate limiter");
    ::metrics::describe_counter!("shield_rate_limited_total", "Requests rejected by the rate limiter");
    ::metrics::describe_counter!("shield_store_failures_total", "Window store failures");
    ::metrics::describe_counter!("shield_reports_total", "Violation reports received");
    ::metrics::describe_gauge!("shield_tracked_clients", "Client keys with a live window record");

    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_admitted() {
    ::metrics::counter!("shield_requests_total", "outcome" => "admitted").increment(1);
}

pub fn record_rate_limited(reason: &'static str) {
    ::metrics::counter!("shield_requests_total", "outcome" => "rejected").increment(1);
    ::metrics::counter!("shield_rate_limited_total", "reason" => reason).increment(1);
}

pub fn record_store_failure() {
    ::metrics::counter!("shield_store_failures_total").increment(1);
}

pub fn record_report(report_type: &str) {
    ::metrics::counter!("shield_reports_total", "type" => report_type.to_string()).increment(1);
}

pub fn record_tracked_clients(count: usize) {
    ::metrics::gauge!("shield_tracked_clients").set(count as f64);
}
