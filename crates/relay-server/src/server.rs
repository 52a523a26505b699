//! `RelayServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use relay_core::{ConnectionId, Relay, SessionId};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::actor::{RelayHandle, spawn_relay};
use crate::config::ServerConfig;
use crate::health;
use crate::shutdown::ShutdownCoordinator;
use crate::sweeper::spawn_sweeper;
use crate::websocket::{SocketLimits, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Sender side of the relay actor.
    pub relay: RelayHandle,
    /// Per-socket limits.
    pub limits: SocketLimits,
    /// Max inbound message size in bytes.
    pub max_message_size: usize,
    /// Cancelled on shutdown.
    pub shutdown: CancellationToken,
    /// When the server started.
    pub start_time: Instant,
    /// Renders `/metrics`; absent when no recorder was installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The relay server: owns the relay actor, the sweeper and the HTTP router.
pub struct RelayServer {
    config: Arc<ServerConfig>,
    relay: RelayHandle,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl RelayServer {
    /// Create a server and start its background tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: ServerConfig, metrics: Option<PrometheusHandle>) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let (relay, actor) = spawn_relay(
            Relay::new(config.sweep_policy()),
            config.command_queue_capacity,
            shutdown.token(),
        );
        let sweeper = spawn_sweeper(relay.clone(), config.sweep_interval(), shutdown.token());
        shutdown.track(sweeper);
        shutdown.track(actor);

        Self {
            config: Arc::new(config),
            relay,
            shutdown,
            start_time: Instant::now(),
            metrics,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            relay: self.relay.clone(),
            limits: SocketLimits::from(self.config.as_ref()),
            max_message_size: self.config.max_message_size,
            shutdown: self.shutdown.token(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/sessions/{id}", get(session_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind the listener and serve until shutdown.
    ///
    /// Returns the bound address (useful with port 0) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let app = self.router();
        let token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(err) = served {
                error!(error = %err, "server error");
            }
        });

        info!(%addr, "relay listening");
        Ok((addr, handle))
    }

    /// Cancel every task and wait for the relay actor and sweeper to stop.
    pub async fn stop(&self, timeout: Option<Duration>) {
        self.shutdown.graceful_shutdown(timeout).await;
        info!("relay stopped");
    }

    /// Get the relay actor handle.
    pub fn relay(&self) -> &RelayHandle {
        &self.relay
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let conn_id = ConnectionId::new();
    ws.max_message_size(state.max_message_size)
        .max_frame_size(state.max_message_size)
        .on_upgrade(move |socket| {
            run_ws_session(socket, conn_id, state.relay, state.limits, state.shutdown)
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Response {
    match state.relay.stats().await {
        Some(stats) => Json(health::health_check(state.start_time, &stats)).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable" })),
        )
            .into_response(),
    }
}

/// GET /sessions/{id}
async fn session_handler(Path(id): Path<String>, State(state): State<AppState>) -> Response {
    match state.relay.session(SessionId::from_raw(id.clone())).await {
        Some(session) => Json(session).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "code": "SESSION_NOT_FOUND", "sessionId": id })),
        )
            .into_response(),
    }
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}
