//! `/health` endpoint.

use std::time::Instant;

use relay_core::RelayStats;
use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `"ok"` while the relay actor answers.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Open WebSocket connections.
    pub connections: usize,
    /// Connections in the controller role.
    pub controllers: usize,
    /// Session records held.
    pub sessions: usize,
    /// Client sockets bound to a session.
    pub bindings: usize,
    /// Sessions with dispatched work awaiting a result.
    pub in_flight: usize,
    /// Frames dropped on full or closed queues since start.
    pub dropped_frames: u64,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, stats: &RelayStats) -> HealthResponse {
    HealthResponse {
        status: "ok",
        uptime_secs: start_time.elapsed().as_secs(),
        connections: stats.connections,
        controllers: stats.controllers,
        sessions: stats.sessions,
        bindings: stats.bindings,
        in_flight: stats.in_flight,
        dropped_frames: stats.dropped_frames,
    }
}
