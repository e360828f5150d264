//! `BridgeServer` — axum HTTP + WebSocket server.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use tether_rpc::descriptor::ApiDescriptor;
use tether_rpc::dispatch::Dispatcher;
use tether_rpc::registry::{InstanceProvider, MethodRegistry};

use crate::config::ServerConfig;
use crate::engine::{AsyncExecutionEngine, EngineError};
use crate::health::{self, HealthResponse};
use crate::http;
use crate::liveness::LivenessMonitor;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::run_ws_session;

/// Startup or serve failure. Anything here aborts the process; per-call
/// failures never reach this type.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The async engine could not start.
    #[error("async engine failed to start: {0}")]
    Engine(#[from] EngineError),

    /// Bind or accept failure.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Call dispatcher over the scanned registry.
    pub dispatcher: Arc<Dispatcher>,
    /// The scanned registry (descriptor, counts).
    pub registry: Arc<MethodRegistry>,
    /// Async execution engine.
    pub engine: Arc<AsyncExecutionEngine>,
    /// Liveness monitor.
    pub monitor: Arc<LivenessMonitor>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics` (None = endpoint disabled).
    pub metrics: Option<PrometheusHandle>,
}

/// The bridge server: owns the engine, the monitor, and the router.
///
/// The registry must be fully scanned before construction — readers start
/// as soon as the router accepts traffic.
pub struct BridgeServer {
    state: AppState,
}

impl BridgeServer {
    /// Wire up the server. Fails fast if the engine cannot start.
    pub fn new(
        config: ServerConfig,
        registry: MethodRegistry,
        provider: Arc<dyn InstanceProvider>,
    ) -> Result<Self, ServerError> {
        let registry = Arc::new(registry);
        let engine = Arc::new(AsyncExecutionEngine::start(&config.engine)?);
        let monitor = Arc::new(LivenessMonitor::new(config.liveness.clone()));
        let dispatcher = Arc::new(Dispatcher::new(registry.clone(), provider));

        Ok(Self {
            state: AppState {
                dispatcher,
                registry,
                engine,
                monitor,
                shutdown: Arc::new(ShutdownCoordinator::new()),
                config: Arc::new(config),
                start_time: Instant::now(),
                metrics: None,
            },
        })
    }

    /// Enable the `/metrics` endpoint.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// The shared state (for tests and embedding).
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/api", get(api_handler))
            .route("/call/{path}", post(http::call_handler))
            .route("/ws", get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind, start the liveness monitor, and serve until shutdown. On the
    /// way out the monitor stops and the engine drains its workers.
    pub async fn serve(self) -> Result<(), ServerError> {
        let addr = format!("{}:{}", self.state.config.host, self.state.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(addr = %listener.local_addr()?, "bridge server listening");

        let monitor_task = self.state.monitor.spawn();

        let token = self.state.shutdown.token();
        let router = self.router();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await?;

        self.state.monitor.stop();
        self.state
            .engine
            .shutdown_and_join(Duration::from_secs(5))
            .await;
        self.state
            .shutdown
            .drain(vec![monitor_task], Some(Duration::from_secs(5)))
            .await;
        info!("bridge server stopped");
        Ok(())
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.monitor.watched_count(),
        state.engine.backlog(),
        state.registry.len(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /api — the registry descriptor for client stub generation.
async fn api_handler(State(state): State<AppState>) -> Json<ApiDescriptor> {
    Json((*state.registry.descriptor()).clone())
}

/// GET /ws — WebSocket upgrade into a bridge session.
async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    if state.monitor.watched_count() >= state.config.max_connections {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let client_id = format!("conn_{}", Uuid::now_v7());
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, client_id, state))
}
