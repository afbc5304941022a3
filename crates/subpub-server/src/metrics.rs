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
    pub const SUBSCRIPTIONS_TOTAL: &str = "subpub_subscriptions_total";
    pub const STREAMS_ACTIVE: &str = "subpub_streams_active";
    pub const MESSAGES_PUBLISHED: &str = "subpub_messages_published_total";
    pub const MESSAGES_DELIVERED: &str = "subpub_messages_delivered_total";
    pub const MESSAGES_BYTES: &str = "subpub_messages_bytes";
    pub const ERRORS_TOTAL: &str = "subpub_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::SUBSCRIPTIONS_TOTAL,
        "Total number of subscriptions since server start"
    );
    metrics::describe_gauge!(
        names::STREAMS_ACTIVE,
        "Current number of open subscription streams"
    );
    metrics::describe_counter!(names::MESSAGES_PUBLISHED, "Total number of accepted publishes");
    metrics::describe_counter!(
        names::MESSAGES_DELIVERED,
        "Total number of messages written to subscription streams"
    );
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total payload bytes processed");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

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

/// Record a new subscription.
pub fn record_subscription() {
    counter!(names::SUBSCRIPTIONS_TOTAL).increment(1);
}

/// Record an accepted publish.
pub fn record_publish(bytes: usize, recipients: usize) {
    counter!(names::MESSAGES_PUBLISHED).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => "inbound").increment(bytes as u64);
    counter!(names::MESSAGES_BYTES, "direction" => "fanout")
        .increment((bytes * recipients) as u64);
}

/// Record a message written to a subscription stream.
pub fn record_delivery(bytes: usize) {
    counter!(names::MESSAGES_DELIVERED).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => "outbound").increment(bytes as u64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that tracks an open subscription stream.
pub struct StreamMetricsGuard;

impl StreamMetricsGuard {
    /// Create a new metrics guard, recording an open stream.
    #[must_use]
    pub fn new() -> Self {
        gauge!(names::STREAMS_ACTIVE).increment(1.0);
        Self
    }
}

impl Default for StreamMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for StreamMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::STREAMS_ACTIVE).decrement(1.0);
    }
}
