//! Metrics collection and export for Switchboard.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use switchboard_core::{RegistryStats, SessionSummary};
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "switchboard_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "switchboard_connections_active";
    pub const CONNECTIONS_REJECTED: &str = "switchboard_connections_rejected_total";
    pub const PEERS_REGISTERED: &str = "switchboard_peers_registered";
    pub const PEERS_IDENTIFIED: &str = "switchboard_peers_identified";
    pub const PEERS_HIDDEN: &str = "switchboard_peers_hidden";
    pub const GROUPS_ACTIVE: &str = "switchboard_groups_active";
    pub const LINES_TOTAL: &str = "switchboard_lines_total";
    pub const DELIVERIES_TOTAL: &str = "switchboard_deliveries_total";
    pub const DROPPED_TOTAL: &str = "switchboard_dropped_total";
    pub const ERRORS_TOTAL: &str = "switchboard_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    // Describe metrics
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open connections"
    );
    metrics::describe_counter!(
        names::CONNECTIONS_REJECTED,
        "Connections refused by the allow-list"
    );
    metrics::describe_gauge!(names::PEERS_REGISTERED, "Peers currently in the registry");
    metrics::describe_gauge!(names::PEERS_IDENTIFIED, "Registered peers that have identified");
    metrics::describe_gauge!(names::PEERS_HIDDEN, "Identified peers that are hidden");
    metrics::describe_gauge!(names::GROUPS_ACTIVE, "Distinct groups among identified peers");
    metrics::describe_counter!(names::LINES_TOTAL, "Inbound lines received from peers");
    metrics::describe_counter!(
        names::DELIVERIES_TOTAL,
        "Outbound lines queued for delivery"
    );
    metrics::describe_counter!(names::DROPPED_TOTAL, "Inbound lines dropped");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a connection refused by the allow-list.
pub fn record_rejected() {
    counter!(names::CONNECTIONS_REJECTED).increment(1);
}

/// Record the traffic of a finished session.
pub fn record_session(summary: &SessionSummary) {
    counter!(names::LINES_TOTAL).increment(summary.lines);
    counter!(names::DELIVERIES_TOTAL).increment(summary.queued);
    counter!(names::DROPPED_TOTAL).increment(summary.dropped);
}

/// Publish a registry snapshot.
pub fn record_registry(stats: &RegistryStats) {
    gauge!(names::PEERS_REGISTERED).set(stats.peers as f64);
    gauge!(names::PEERS_IDENTIFIED).set(stats.initialized as f64);
    gauge!(names::PEERS_HIDDEN).set(stats.hidden as f64);
    gauge!(names::GROUPS_ACTIVE).set(stats.groups as f64);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
