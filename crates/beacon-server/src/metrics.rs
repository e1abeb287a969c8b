//! Prometheus metrics for the relay.
//!
//! Counters are labelled with static strings so recording never allocates.

use metrics::{counter, gauge, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "beacon_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "beacon_connections_active";
    pub const MESSAGES_TOTAL: &str = "beacon_messages_total";
    pub const MESSAGES_BYTES: &str = "beacon_messages_bytes";
    pub const PRESENCE_EVENTS_TOTAL: &str = "beacon_presence_events_total";
    pub const ERRORS_TOTAL: &str = "beacon_errors_total";
}

/// Where a relayed payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// WebSocket client to bus.
    Inbound,
    /// Bus to WebSocket client.
    Outbound,
    /// Producer API to bus.
    Api,
}

impl Flow {
    fn label(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
            Self::Api => "api",
        }
    }
}

/// Register metric descriptions with the installed recorder.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "WebSocket upgrades accepted, per facility connection"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "WebSocket connections currently holding a subscription session"
    );
    metrics::describe_counter!(
        names::MESSAGES_TOTAL,
        "Payloads relayed between sockets, the producer API and the bus, by flow"
    );
    metrics::describe_counter!(
        names::MESSAGES_BYTES,
        Unit::Bytes,
        "Payload bytes relayed, by flow"
    );
    metrics::describe_counter!(
        names::PRESENCE_EVENTS_TOTAL,
        "Users added to or removed from a facility's online set"
    );
    metrics::describe_counter!(
        names::ERRORS_TOTAL,
        "Bus, presence and socket failures, by source"
    );

    info!("Metrics described");
}

/// Install the Prometheus recorder with its scrape endpoint on `port`.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or a recorder is
/// already installed.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    info!("Metrics endpoint on http://{}/metrics", addr);
    Ok(())
}

/// Count one relayed payload of `bytes` length.
pub fn record_message(bytes: usize, flow: Flow) {
    let label = flow.label();
    counter!(names::MESSAGES_TOTAL, "flow" => label).increment(1);
    counter!(names::MESSAGES_BYTES, "flow" => label).increment(bytes as u64);
}

/// Count a presence change, `join` or `leave`.
pub fn record_presence(action: &'static str) {
    counter!(names::PRESENCE_EVENTS_TOTAL, "action" => action).increment(1);
}

/// Count a failure from `source` (`bus`, `presence`, `subscribe`, `websocket`).
pub fn record_error(source: &'static str) {
    counter!(names::ERRORS_TOTAL, "source" => source).increment(1);
}

/// Tracks one WebSocket connection in the connection metrics while alive.
#[derive(Debug)]
pub struct ConnectionMetricsGuard(());

impl ConnectionMetricsGuard {
    /// Count a new connection.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::CONNECTIONS_TOTAL).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
        Self(())
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_labels() {
        assert_eq!(Flow::Inbound.label(), "inbound");
        assert_eq!(Flow::Outbound.label(), "outbound");
        assert_eq!(Flow::Api.label(), "api");
    }

    #[test]
    fn test_recording_without_recorder() {
        let _guard = ConnectionMetricsGuard::new();
        record_presence("join");
        record_message(5, Flow::Outbound);
        record_error("bus");
    }
}
