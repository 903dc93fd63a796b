//! `TandemServer`: Axum HTTP + WebSocket host.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tandem_core::Token;
use tandem_session::ErrorBody;
use tandem_settings::{ServerSettings, TandemSettings};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::TokenDecoder;
use crate::health::{self, HealthResponse};
use crate::metrics;
use crate::rpc::errors::UNAUTHORIZED;
use crate::rpc::handlers::register_all;
use crate::rpc::registry::MethodRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::connection::ClientConnection;
use crate::websocket::session::{HeartbeatConfig, run_ws_session};
use crate::workspace::{PipelineFactory, SessionManager, start_stats_roller};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Sessions grouped by workspace.
    pub manager: Arc<SessionManager>,
    /// RPC method registry.
    pub registry: Arc<MethodRegistry>,
    /// Client token verifier.
    pub decoder: Arc<TokenDecoder>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Prometheus render handle.
    pub metrics: PrometheusHandle,
    /// Open WebSocket connections.
    pub connections: Arc<AtomicUsize>,
    /// Transport settings.
    pub server: Arc<ServerSettings>,
    /// When the server started.
    pub start_time: Instant,
}

/// The Tandem session server.
pub struct TandemServer {
    settings: TandemSettings,
    state: AppState,
}

impl TandemServer {
    /// Server hosting sessions on pipelines built by `factory`.
    pub fn new(
        settings: TandemSettings,
        factory: Arc<dyn PipelineFactory>,
        metrics: PrometheusHandle,
    ) -> Self {
        let mut registry = MethodRegistry::new();
        register_all(&mut registry);
        let state = AppState {
            manager: Arc::new(SessionManager::new(factory, settings.session.clone())),
            registry: Arc::new(registry),
            decoder: Arc::new(TokenDecoder::new(&settings.auth.secret)),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics,
            connections: Arc::new(AtomicUsize::new(0)),
            server: Arc::new(settings.server.clone()),
            start_time: Instant::now(),
        };
        Self { settings, state }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws/{token}", get(ws_handler))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Also starts the statistics roller. Returns the bound address and the
    /// HTTP server task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), std::io::Error> {
        let addr = format!("{}:{}", self.settings.server.host, self.settings.server.port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;

        let token = self.state.shutdown.token();
        let router = self.router();
        let server = tokio::spawn(async move {
            let shutdown = token.cancelled_owned();
            if let Err(err) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!(error = %err, "server stopped with error");
            }
        });

        let session = &self.settings.session;
        self.state.shutdown.track(start_stats_roller(
            self.state.manager.clone(),
            Duration::from_secs(session.stats_roll_interval_secs),
            Duration::from_secs(session.stats_window_secs),
            self.state.shutdown.token(),
        ));

        info!(addr = %local_addr, "tandem server listening");
        Ok((local_addr, server))
    }

    /// Session manager.
    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.state.manager
    }

    /// Method registry.
    pub fn registry(&self) -> &Arc<MethodRegistry> {
        &self.state.registry
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Settings the server was built with.
    pub fn settings(&self) -> &TandemSettings {
        &self.settings
    }

    /// Open WebSocket connections.
    pub fn connection_count(&self) -> usize {
        self.state.connections.load(Ordering::Relaxed)
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.connections.load(Ordering::Relaxed),
        state.manager.session_count().await,
        state.manager.workspace_count().await,
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    metrics::render(&state.metrics)
}

#[derive(Debug, Default, Deserialize)]
struct ConnectQuery {
    branding: Option<String>,
}

/// GET /ws/{token}
async fn ws_handler(
    State(state): State<AppState>,
    Path(raw_token): Path<String>,
    Query(query): Query<ConnectQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let token = match state.decoder.decode(&raw_token) {
        Ok(token) => token,
        Err(err) => {
            warn!(error = %err, "rejected connection");
            let body = ErrorBody::new(UNAUTHORIZED, err.to_string());
            return (StatusCode::UNAUTHORIZED, Json(body)).into_response();
        }
    };
    let Some(slot) = ConnectionSlot::try_acquire(&state.connections, state.server.max_connections)
    else {
        warn!(max = state.server.max_connections, "connection limit reached");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    ws.max_message_size(state.server.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state, slot, token, query.branding))
}

/// One reserved unit of `max_connections`, released on drop.
///
/// Reserved before the upgrade so concurrent handshakes cannot overshoot
/// the limit; a failed upgrade drops the slot with the upgrade callback.
struct ConnectionSlot {
    connections: Arc<AtomicUsize>,
}

impl ConnectionSlot {
    fn try_acquire(connections: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |open| {
                (open < max).then_some(open + 1)
            })
            .ok()
            .map(|_| Self {
                connections: connections.clone(),
            })
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        let _ = self.connections.fetch_sub(1, Ordering::AcqRel);
    }
}

async fn handle_socket(
    mut socket: WebSocket,
    state: AppState,
    _slot: ConnectionSlot,
    token: Token,
    branding: Option<String>,
) {
    let (tx, rx) = mpsc::channel(state.server.send_queue_capacity.max(1));
    let connection = Arc::new(ClientConnection::new(
        format!("conn_{}", Uuid::now_v7()),
        tx,
    ));

    let session = match state
        .manager
        .open(token, branding, connection.clone())
        .await
    {
        Ok(session) => session,
        Err(err) => {
            error!(error = %err, "failed to open session");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let heartbeat = HeartbeatConfig {
        interval: Duration::from_secs(state.server.heartbeat_interval_secs.max(1)),
        timeout: Duration::from_secs(state.server.heartbeat_timeout_secs.max(1)),
    };
    run_ws_session(
        socket,
        connection,
        rx,
        session.clone(),
        state.registry.clone(),
        heartbeat,
        state.shutdown.token(),
    )
    .await;

    state.manager.close(&session).await;
}
