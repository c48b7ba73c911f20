//! HTTP server hosting the WebSocket endpoint and `/health`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};

use super::connection::serve_connection;
use super::protocol::HealthStatus;
use crate::config::GlobalConfig;
use crate::hooks::{CommandHooks, ExecutionHooks};
use crate::orchestrator::session_manager::SessionManager;
use crate::timing::{RuleTimeoutAdvisor, TimeoutAdvisor};
use crate::{AppError, Result};

#[derive(Clone)]
struct AppState {
    manager: Arc<SessionManager>,
    started_at: Instant,
    connections: CancellationToken,
}

/// The command-execution server.
///
/// Cheap to clone; clones share the same registries.
#[derive(Clone)]
pub struct ExecServer {
    state: AppState,
}

impl ExecServer {
    /// Build a server with explicit collaborators.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the configuration is invalid.
    pub fn new(
        config: GlobalConfig,
        hooks: Arc<dyn ExecutionHooks>,
        advisor: Arc<dyn TimeoutAdvisor>,
    ) -> Result<Self> {
        config.validate()?;
        let manager = SessionManager::new(Arc::new(config), hooks, advisor)?;
        Ok(Self {
            state: AppState {
                manager: Arc::new(manager),
                started_at: Instant::now(),
                connections: CancellationToken::new(),
            },
        })
    }

    /// Build a server whose hooks and timeout rules come from `config`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the configuration or a timeout rule
    /// pattern is invalid.
    pub fn from_config(config: GlobalConfig) -> Result<Self> {
        let hooks = CommandHooks::new(&config.hooks, config.hook_timeout());
        let advisor = RuleTimeoutAdvisor::from_rules(&config.timeout_rules)?;
        Self::new(config, Arc::new(hooks), Arc::new(advisor))
    }

    /// Shared session manager.
    #[must_use]
    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.state.manager
    }

    /// Current health snapshot.
    #[must_use]
    pub fn health(&self) -> HealthStatus {
        health_of(&self.state)
    }

    /// Axum router with the WebSocket route and `/health`.
    #[must_use]
    pub fn router(&self) -> Router {
        let ws_path = self.state.manager.config().ws_path.clone();
        Router::new()
            .route(&ws_path, get(ws_handler))
            .route("/health", get(health))
            .with_state(self.state.clone())
    }

    /// Serve on `listener` until `ct` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the HTTP server fails.
    pub async fn serve(&self, listener: TcpListener, ct: CancellationToken) -> Result<()> {
        let addr = listener
            .local_addr()
            .map_err(|err| AppError::Transport(format!("listener has no address: {err}")))?;
        info!(%addr, ws_path = %self.state.manager.config().ws_path, "execution server listening");

        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Transport(format!("server error: {err}")))?;

        info!("execution server stopped accepting connections");
        Ok(())
    }

    /// Cancel every execution, wait for their terminal notifications,
    /// then close all connections.
    pub async fn shutdown(&self) {
        self.state.manager.shutdown().await;
        self.state.connections.cancel();
        info!("execution server shut down");
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    let max_message = state.manager.config().streams.max_message_bytes;
    let manager = Arc::clone(&state.manager);
    let shutdown = state.connections.clone();
    ws.max_message_size(max_message).on_upgrade(move |socket| {
        let span = info_span!("connection", %peer);
        serve_connection(socket, Some(peer.to_string()), manager, shutdown).instrument(span)
    })
}

async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(health_of(&state))
}

fn health_of(state: &AppState) -> HealthStatus {
    HealthStatus {
        status: "healthy".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        active_sessions: state.manager.session_count(),
        max_sessions: state.manager.config().max_sessions,
        active_executions: state.manager.execution_count(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    }
}
