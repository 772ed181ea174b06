//! Metrics collection and export.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const SUBSCRIBERS_TOTAL: &str = "turfcast_subscribers_total";
    pub const SUBSCRIBERS_ACTIVE: &str = "turfcast_subscribers_active";
    pub const POLLS_TOTAL: &str = "turfcast_polls_total";
    pub const EVENTS_TOTAL: &str = "turfcast_events_total";
    pub const UPSTREAM_ERRORS_TOTAL: &str = "turfcast_upstream_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::SUBSCRIBERS_TOTAL,
        "Total number of subscribers since server start"
    );
    metrics::describe_gauge!(
        names::SUBSCRIBERS_ACTIVE,
        "Current number of attached subscribers"
    );
    metrics::describe_counter!(names::POLLS_TOTAL, "Total poll executions by poller and outcome");
    metrics::describe_counter!(names::EVENTS_TOTAL, "Total events broadcast by kind");
    metrics::describe_counter!(
        names::UPSTREAM_ERRORS_TOTAL,
        "Total upstream failures by kind"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a poll execution.
pub fn record_poll(poller: &'static str, outcome: &'static str) {
    counter!(names::POLLS_TOTAL, "poller" => poller, "outcome" => outcome).increment(1);
}

/// Record a broadcast event.
pub fn record_event(event: &'static str) {
    counter!(names::EVENTS_TOTAL, "event" => event).increment(1);
}

/// Record an upstream failure.
pub fn record_upstream_error(kind: &'static str) {
    counter!(names::UPSTREAM_ERRORS_TOTAL, "kind" => kind).increment(1);
}

/// Metrics guard that tracks one subscriber's lifetime.
pub struct SubscriberMetricsGuard;

impl SubscriberMetricsGuard {
    /// Create a new metrics guard, recording an attach.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::SUBSCRIBERS_TOTAL).increment(1);
        gauge!(names::SUBSCRIBERS_ACTIVE).increment(1.0);
        Self
    }
}

impl Default for SubscriberMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SubscriberMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::SUBSCRIBERS_ACTIVE).decrement(1.0);
    }
}
