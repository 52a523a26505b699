//! WebSocket session lifecycle: one connected peer from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use relay_core::{ConnectionHandle, ConnectionId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::heartbeat::{HeartbeatResult, Liveness, run_heartbeat};
use crate::actor::RelayHandle;
use crate::config::ServerConfig;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};

/// Per-socket limits taken from [`ServerConfig`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SocketLimits {
    /// Outbound queue capacity.
    pub send_queue_capacity: usize,
    /// Ping interval.
    pub heartbeat_interval: Duration,
    /// Idle timeout.
    pub heartbeat_timeout: Duration,
}

impl From<&ServerConfig> for SocketLimits {
    fn from(config: &ServerConfig) -> Self {
        Self {
            send_queue_capacity: config.send_queue_capacity.max(1),
            heartbeat_interval: config.heartbeat_interval(),
            heartbeat_timeout: config.heartbeat_timeout(),
        }
    }
}

/// Why the session loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndReason {
    PeerClosed,
    ReadError,
    HeartbeatTimeout,
    RelayStopped,
    Shutdown,
}

/// Run a WebSocket session for one connected peer.
///
/// 1. Registers the socket with the relay (which greets it with
///    `connection_established`)
/// 2. Forwards every text frame to the relay actor
/// 3. Drains the outbound queue into the socket and sends periodic pings
/// 4. Drops the peer after the idle timeout
/// 5. Unregisters on disconnect; the bound session keeps its status
#[instrument(skip_all, fields(conn_id = %conn_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    conn_id: ConnectionId,
    relay: RelayHandle,
    limits: SocketLimits,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(limits.send_queue_capacity);
    let handle = Arc::new(ConnectionHandle::new(conn_id.clone(), send_tx));
    let liveness = Arc::new(Liveness::new());
    let started = Instant::now();

    info!("peer connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let registered = relay.open(handle).await;

    // Outbound forwarder with periodic pings.
    let ping_every = limits.heartbeat_interval;
    let outbound = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(ping_every);
        // Skip the immediate first tick
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                frame = send_rx.recv() => {
                    let Some(text) = frame else { break };
                    if ws_tx.send(Message::Text(text.to_string().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    let heartbeat_cancel = shutdown.child_token();
    let mut heartbeat = tokio::spawn(run_heartbeat(
        Arc::clone(&liveness),
        limits.heartbeat_interval,
        limits.heartbeat_timeout,
        heartbeat_cancel.clone(),
    ));

    let reason = if registered {
        loop {
            tokio::select! {
                msg = ws_rx.next() => {
                    let delivered = match msg {
                        Some(Ok(Message::Text(t))) => {
                            liveness.mark_alive();
                            relay.frame(conn_id.clone(), t.as_str().to_owned()).await
                        }
                        Some(Ok(Message::Binary(data))) => {
                            liveness.mark_alive();
                            relay.binary(conn_id.clone(), data.to_vec()).await
                        }
                        Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                            liveness.mark_alive();
                            continue;
                        }
                        Some(Ok(Message::Close(_))) | None => break EndReason::PeerClosed,
                        Some(Err(err)) => {
                            debug!(error = %err, "websocket read failed");
                            break EndReason::ReadError;
                        }
                    };
                    if !delivered {
                        break EndReason::RelayStopped;
                    }
                }
                result = &mut heartbeat => {
                    if matches!(result, Ok(HeartbeatResult::TimedOut)) {
                        warn!(idle_secs = liveness.idle_for().as_secs(), "peer unresponsive, disconnecting");
                        break EndReason::HeartbeatTimeout;
                    }
                    break EndReason::Shutdown;
                }
                () = shutdown.cancelled() => break EndReason::Shutdown,
            }
        }
    } else {
        EndReason::RelayStopped
    };

    info!(?reason, "peer disconnected");
    relay.close(conn_id).await;
    heartbeat_cancel.cancel();
    outbound.abort();
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}
