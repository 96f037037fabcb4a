//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Returns the handle used to render `/metrics`. Call once at startup before
/// any metric is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// WebSocket connections opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket connections closed (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Open WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connections evicted for a full or closed outbound queue (counter).
pub const WS_EVICTIONS_TOTAL: &str = "ws_evictions_total";
/// Envelopes fanned out (counter, labels: channel).
pub const RELAY_BROADCASTS_TOTAL: &str = "relay_broadcasts_total";
/// Ingress requests rejected with 400 (counter).
pub const RELAY_INGRESS_REJECTED_TOTAL: &str = "relay_ingress_rejected_total";
/// Messages received from the bus (counter).
pub const BUS_MESSAGES_RECEIVED_TOTAL: &str = "bus_messages_received_total";
/// Bus messages dropped as non-text (counter).
pub const BUS_MESSAGES_DROPPED_TOTAL: &str = "bus_messages_dropped_total";
/// Failed bus publishes (counter).
pub const BUS_PUBLISH_ERRORS_TOTAL: &str = "bus_publish_errors_total";
/// Own publishes skipped when they came back through the subscription (counter).
pub const BUS_ECHOES_SUPPRESSED_TOTAL: &str = "bus_echoes_suppressed_total";
/// Subscriptions re-established after loss (counter).
pub const BUS_RESUBSCRIBES_TOTAL: &str = "bus_resubscribes_total";
