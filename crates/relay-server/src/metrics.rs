//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup,
/// before any metric is recorded.
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
/// Connection lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Inbound frames processed (counter, labels: type).
pub const RELAY_FRAMES_TOTAL: &str = "relay_frames_total";
/// Rejected frames (counter, labels: code).
pub const RELAY_ERRORS_TOTAL: &str = "relay_errors_total";
/// Outbound frames dropped on full or closed queues (counter).
pub const RELAY_BROADCAST_DROPS_TOTAL: &str = "relay_broadcast_drops_total";
/// Sessions removed by the sweeper (counter, labels: reason).
pub const RELAY_SESSIONS_SWEPT_TOTAL: &str = "relay_sessions_swept_total";
/// Session records held (gauge).
pub const RELAY_SESSIONS_ACTIVE: &str = "relay_sessions_active";
