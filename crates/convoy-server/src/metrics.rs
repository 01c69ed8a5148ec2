//! Metrics collection and export for Convoy.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use convoy_protocol::UserType;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "convoy_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "convoy_connections_active";
    pub const JOINS_TOTAL: &str = "convoy_joins_total";
    pub const ONLINE_CONNECTIONS: &str = "convoy_online_connections";
    pub const PUSHES_TOTAL: &str = "convoy_pushes_total";
    pub const PUSHES_DROPPED: &str = "convoy_pushes_dropped_total";
    pub const NOTIFICATIONS_CREATED: &str = "convoy_notifications_created_total";
    pub const CHAT_MESSAGES_TOTAL: &str = "convoy_chat_messages_total";
    pub const SWEEP_RECLAIMED: &str = "convoy_sweep_reclaimed_total";
    pub const EVICTIONS_TOTAL: &str = "convoy_evictions_total";
    pub const ERRORS_TOTAL: &str = "convoy_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of transport connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open transport connections"
    );
    metrics::describe_counter!(names::JOINS_TOTAL, "Presence registrations by user type");
    metrics::describe_gauge!(
        names::ONLINE_CONNECTIONS,
        "Registered connections by user type"
    );
    metrics::describe_counter!(names::PUSHES_TOTAL, "Payloads pushed to connections");
    metrics::describe_counter!(
        names::PUSHES_DROPPED,
        "Pushes skipped because the connection closed mid fan-out"
    );
    metrics::describe_counter!(
        names::NOTIFICATIONS_CREATED,
        "Notifications persisted by the delivery router"
    );
    metrics::describe_counter!(
        names::CHAT_MESSAGES_TOTAL,
        "Chat messages routed, by addressing"
    );
    metrics::describe_counter!(
        names::SWEEP_RECLAIMED,
        "Expired notifications reclaimed by the sweeper"
    );
    metrics::describe_counter!(
        names::EVICTIONS_TOTAL,
        "Connections evicted for missing heartbeats"
    );
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

/// Record a new transport connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a transport disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a presence registration.
pub fn record_join(user_type: UserType) {
    counter!(names::JOINS_TOTAL, "user_type" => user_type.as_str()).increment(1);
}

/// Publish registered connection counts per user type.
pub fn set_online(stats: &convoy_core::PresenceStats) {
    for user_type in UserType::ALL {
        let count = stats.by_type.get(&user_type).copied().unwrap_or(0);
        gauge!(names::ONLINE_CONNECTIONS, "user_type" => user_type.as_str()).set(count as f64);
    }
}

/// Record pushes made by one delivery, and those that found the connection gone.
pub fn record_pushes(kind: &'static str, pushed: usize, dropped: usize) {
    counter!(names::PUSHES_TOTAL, "kind" => kind).increment(pushed as u64);
    if dropped > 0 {
        counter!(names::PUSHES_DROPPED, "kind" => kind).increment(dropped as u64);
    }
}

/// Record a persisted notification.
pub fn record_notification_created() {
    counter!(names::NOTIFICATIONS_CREATED).increment(1);
}

/// Record a routed chat message.
pub fn record_chat(addressing: &'static str) {
    counter!(names::CHAT_MESSAGES_TOTAL, "addressing" => addressing).increment(1);
}

/// Record notifications reclaimed by the sweeper.
pub fn record_reclaimed(count: usize) {
    counter!(names::SWEEP_RECLAIMED).increment(count as u64);
}

/// Record heartbeat evictions.
pub fn record_evictions(count: usize) {
    counter!(names::EVICTIONS_TOTAL).increment(count as u64);
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
    fn test_metrics_guard() {
        // No recorder installed; recording must be a no-op.
        let _guard = ConnectionMetricsGuard::new();
        record_join(UserType::Driver);
        set_online(&convoy_core::PresenceStats::default());
    }
}
