//! Metrics collection and export for Impulse.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use impulse_core::{RelayStats, RouteOutcome, TickReport};
use impulse_protocol::Encoding;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "impulse_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "impulse_connections_active";
    pub const MESSAGES_TOTAL: &str = "impulse_messages_total";
    pub const MESSAGES_BYTES: &str = "impulse_messages_bytes";
    pub const REGISTRATIONS_TOTAL: &str = "impulse_registrations_total";
    pub const SIGNALS_ROUTED: &str = "impulse_signals_routed_total";
    pub const MESSAGES_DROPPED: &str = "impulse_messages_dropped_total";
    pub const DELIVERIES_TOTAL: &str = "impulse_deliveries_total";
    pub const SEND_FAILURES_TOTAL: &str = "impulse_send_failures_total";
    pub const PINGS_TOTAL: &str = "impulse_heartbeat_pings_total";
    pub const EVICTIONS_TOTAL: &str = "impulse_heartbeat_evictions_total";
    pub const ROUND_TRIP_SECONDS: &str = "impulse_round_trip_seconds";
    pub const LATENCY_SECONDS: &str = "impulse_latency_seconds";
    pub const RECEIVERS_ACTIVE: &str = "impulse_receivers_active";
    pub const TOPICS_ACTIVE: &str = "impulse_topics_active";
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
        "Current number of active connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of inbound messages");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of inbound messages");
    metrics::describe_counter!(names::REGISTRATIONS_TOTAL, "Registrations accepted, by role");
    metrics::describe_counter!(names::SIGNALS_ROUTED, "Signals routed to at least one topic");
    metrics::describe_counter!(
        names::MESSAGES_DROPPED,
        "Register and signal messages dropped, by reason"
    );
    metrics::describe_counter!(
        names::DELIVERIES_TOTAL,
        "Payloads handed to receiver connections"
    );
    metrics::describe_counter!(
        names::SEND_FAILURES_TOTAL,
        "Deliveries that failed and tore the receiver down"
    );
    metrics::describe_counter!(names::PINGS_TOTAL, "Heartbeat pings sent");
    metrics::describe_counter!(names::EVICTIONS_TOTAL, "Connections evicted by the heartbeat");
    metrics::describe_histogram!(
        names::ROUND_TRIP_SECONDS,
        "Ping to pong round trip in seconds"
    );
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Message processing latency in seconds"
    );
    metrics::describe_gauge!(names::RECEIVERS_ACTIVE, "Registered receiver connections");
    metrics::describe_gauge!(names::TOPICS_ACTIVE, "Current number of live topics");

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

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record an inbound message.
pub fn record_message(bytes: usize, encoding: Encoding) {
    let encoding = match encoding {
        Encoding::Json => "json",
        Encoding::MessagePack => "msgpack",
    };
    counter!(names::MESSAGES_TOTAL, "encoding" => encoding).increment(1);
    counter!(names::MESSAGES_BYTES, "encoding" => encoding).increment(bytes as u64);
}

/// Record message latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Record what the router did with a message.
pub fn record_outcome(outcome: &RouteOutcome) {
    match outcome {
        RouteOutcome::Registered { .. } => {
            counter!(names::REGISTRATIONS_TOTAL, "role" => "receiver").increment(1);
        }
        RouteOutcome::SenderAccepted => {
            counter!(names::REGISTRATIONS_TOTAL, "role" => "sender").increment(1);
        }
        RouteOutcome::Routed(report) => {
            counter!(names::SIGNALS_ROUTED).increment(1);
            counter!(names::DELIVERIES_TOTAL).increment(report.delivered as u64);
            counter!(names::SEND_FAILURES_TOTAL).increment(report.failed.len() as u64);
        }
        RouteOutcome::Dropped(reason) => {
            counter!(names::MESSAGES_DROPPED, "reason" => reason.as_str()).increment(1);
        }
    }
}

/// Record a heartbeat pass.
pub fn record_tick(report: &TickReport) {
    counter!(names::PINGS_TOTAL).increment(report.pinged as u64);
    counter!(names::EVICTIONS_TOTAL, "cause" => "missed_pongs").increment(report.evicted.len() as u64);
    counter!(names::EVICTIONS_TOTAL, "cause" => "ping_failed").increment(report.failed.len() as u64);
}

/// Record a measured round trip.
pub fn record_round_trip(millis: u64) {
    histogram!(names::ROUND_TRIP_SECONDS).record(millis as f64 / 1000.0);
}

/// Update gauges from relay statistics.
pub fn set_relay_stats(stats: &RelayStats) {
    gauge!(names::RECEIVERS_ACTIVE).set(stats.registry.receivers as f64);
    gauge!(names::TOPICS_ACTIVE).set(stats.broker.topic_count as f64);
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
