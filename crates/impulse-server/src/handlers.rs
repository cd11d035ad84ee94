//! HTTP and WebSocket handlers for the Impulse server.
//!
//! This module wires the relay to axum, runs the heartbeat task, and
//! handles shutdown.

use crate::accounts;
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use impulse_core::{
    ConnectionEvents, ConnectionHandle, ConnectionId, Relay, TracingAuditSink,
};
use impulse_protocol::Encoding;
use impulse_transport::websocket::serve_socket;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Relay callbacks that also record metrics.
pub struct MeteredEvents {
    relay: Arc<Relay>,
}

impl MeteredEvents {
    /// Wrap a relay.
    #[must_use]
    pub fn new(relay: Arc<Relay>) -> Self {
        Self { relay }
    }
}

impl ConnectionEvents for MeteredEvents {
    fn on_open(&self, handle: Arc<dyn ConnectionHandle>, remote_address: String) {
        self.relay.open(handle, remote_address);
    }

    fn on_message(&self, id: ConnectionId, data: &[u8], encoding: Encoding) {
        let start = Instant::now();
        metrics::record_message(data.len(), encoding);

        let outcome = self.relay.handle_message(id, data, encoding);
        metrics::record_outcome(&outcome);
        metrics::record_latency(start.elapsed().as_secs_f64());
        metrics::set_relay_stats(&self.relay.stats());
    }

    fn on_pong(&self, id: ConnectionId) {
        if let Some(rtt) = self.relay.handle_pong(id) {
            metrics::record_round_trip(rtt);
        }
    }

    fn on_close(&self, id: ConnectionId) {
        self.relay.close(id);
        metrics::set_relay_stats(&self.relay.stats());
    }
}

/// Shared server state.
pub struct AppState {
    /// The relay core.
    pub relay: Arc<Relay>,
    /// Connection callbacks handed to every session.
    pub events: Arc<dyn ConnectionEvents>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state, loading the account directory.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let directory = accounts::load_directory(&config.accounts.path);
        let relay = Arc::new(Relay::new(
            config.relay_config(),
            Arc::new(directory),
            Arc::new(TracingAuditSink),
        ));
        Self::with_relay(relay, config)
    }

    /// Create app state around an existing relay.
    #[must_use]
    pub fn with_relay(relay: Arc<Relay>, config: Config) -> Self {
        let events: Arc<dyn ConnectionEvents> = Arc::new(MeteredEvents::new(relay.clone()));
        Self {
            relay,
            events,
            config,
        }
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    let websocket_path = state.config.transport.websocket_path.clone();
    Router::new()
        .route(&websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/connections", get(connections_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let shutdown = CancellationToken::new();

    let heartbeat_config = state.relay.heartbeat().config();
    info!(
        interval_ms = heartbeat_config.interval.as_millis() as u64,
        max_missed_pongs = heartbeat_config.max_missed_pongs,
        "Heartbeat configured"
    );

    let heartbeat = {
        let relay = state.relay.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            relay.heartbeat().run(shutdown, metrics::record_tick).await;
        })
    };

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Impulse server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    let served = axum::serve(
        listener,
        app(state.clone()).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
    .await;

    shutdown.cancel();
    if let Err(e) = heartbeat.await {
        warn!(error = %e, "Heartbeat task ended abnormally");
    }

    let closed = state.relay.shutdown();
    info!(closed, "Impulse server stopped");

    served.context("Server error")
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
            }
        }
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "mode": state.relay.router().mode().name(),
        "stats": state.relay.stats(),
    }))
}

/// Connection listing handler.
async fn connections_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.relay.registry().connections())
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    // Oversized messages are dropped by the session, not by axum.
    let limit = state.config.session_config().transport_limit();
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| handle_websocket(socket, remote, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, remote: SocketAddr, state: Arc<AppState>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    debug!(remote = %remote, "WebSocket upgraded");
    serve_socket(
        socket,
        remote.to_string(),
        state.events.clone(),
        state.config.session_config(),
    )
    .await;
}
