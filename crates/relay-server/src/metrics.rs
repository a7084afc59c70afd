//! Metrics collection and export for Relay.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use anyhow::{Context, Result};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tenvis_relay_core::{FanOut, GatewayStats};
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "relay_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "relay_connections_active";
    pub const ONLINE_USERS: &str = "relay_online_users";
    pub const SESSIONS: &str = "relay_sessions";
    pub const MESSAGES_ROUTED: &str = "relay_messages_routed_total";
    pub const DELIVERIES_TOTAL: &str = "relay_deliveries_total";
    pub const PRESENCE_BROADCASTS: &str = "relay_presence_broadcasts_total";
    pub const FRAME_BYTES: &str = "relay_frame_bytes_total";
    pub const ROUTING_LATENCY_SECONDS: &str = "relay_routing_latency_seconds";
    pub const ERRORS_TOTAL: &str = "relay_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open transport connections"
    );
    metrics::describe_gauge!(
        names::ONLINE_USERS,
        "Users with at least one registered session"
    );
    metrics::describe_gauge!(names::SESSIONS, "Registered sessions across all users");
    metrics::describe_counter!(names::MESSAGES_ROUTED, "Messages accepted for fan-out");
    metrics::describe_counter!(
        names::DELIVERIES_TOTAL,
        "Message deliveries by target (receiver or sender)"
    );
    metrics::describe_counter!(
        names::PRESENCE_BROADCASTS,
        "Presence snapshots broadcast after a registry change"
    );
    metrics::describe_counter!(names::FRAME_BYTES, "Encoded frame bytes by direction");
    metrics::describe_histogram!(
        names::ROUTING_LATENCY_SECONDS,
        "Time from frame receipt to fan-out completion in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

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

/// Record the outcome of routing one message.
pub fn record_fan_out(fan_out: &FanOut, seconds: f64) {
    counter!(names::MESSAGES_ROUTED).increment(1);
    counter!(names::DELIVERIES_TOTAL, "target" => "receiver").increment(fan_out.to_receiver as u64);
    counter!(names::DELIVERIES_TOTAL, "target" => "sender").increment(fan_out.to_sender as u64);
    histogram!(names::ROUTING_LATENCY_SECONDS).record(seconds);
}

/// Record encoded frame bytes.
pub fn record_bytes(bytes: usize, direction: &'static str) {
    counter!(names::FRAME_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Update presence gauges after the registry may have changed.
pub fn record_presence(stats: GatewayStats, broadcast: bool) {
    gauge!(names::ONLINE_USERS).set(stats.online_users as f64);
    gauge!(names::SESSIONS).set(stats.sessions as f64);
    if broadcast {
        counter!(names::PRESENCE_BROADCASTS).increment(1);
    }
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorders_without_exporter() {
        // No recorder is installed; every call must be a no-op.
        let _guard = ConnectionMetricsGuard::new();
        record_fan_out(
            &FanOut {
                to_receiver: 2,
                to_sender: 1,
            },
            0.001,
        );
        record_bytes(128, "outbound");
        record_presence(
            GatewayStats {
                connections: 3,
                online_users: 2,
                sessions: 3,
            },
            true,
        );
        record_error("decode");
    }
}
