//! # switchboard-server
//!
//! HTTP/WebSocket front door. Provides:
//!
//! - Operational REST API: status, channels, worker modules, cron jobs
//! - WebSocket endpoint: chat turns streamed as dispatch events, every
//!   gateway broadcast, and approval prompts for the connection's own turns

pub mod routes;
pub mod ws;

use axum::{
    Router,
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use switchboard_approval::ApprovalPolicy;
use switchboard_channels::ChannelManager;
use switchboard_config::{ServerConfig, SwitchboardConfig};
use switchboard_core::{EventBus, Result, SwitchboardError};
use switchboard_cron::CronScheduler;
use switchboard_dispatch::Dispatcher;
use switchboard_heartbeat::HeartbeatSupervisor;

/// Shared server state. Subsystems that are switched off stay `None`.
pub struct AppState {
    pub config: ServerConfig,
    pub dispatcher: Dispatcher,
    pub bus: EventBus,
    pub approval: ApprovalPolicy,
    /// Hot-reloaded config. When set, `[approval]` is read from it per connection.
    pub live_config: Option<Arc<RwLock<SwitchboardConfig>>>,
    pub channels: Option<Arc<ChannelManager>>,
    pub cron: Option<Arc<CronScheduler>>,
    pub heartbeat: Option<Arc<HeartbeatSupervisor>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: ServerConfig, dispatcher: Dispatcher, bus: EventBus) -> Self {
        Self {
            config,
            dispatcher,
            bus,
            approval: ApprovalPolicy::default(),
            live_config: None,
            channels: None,
            cron: None,
            heartbeat: None,
            started_at: Instant::now(),
        }
    }

    pub fn with_approval(mut self, policy: ApprovalPolicy) -> Self {
        self.approval = policy;
        self
    }

    pub fn with_live_config(mut self, config: Arc<RwLock<SwitchboardConfig>>) -> Self {
        self.live_config = Some(config);
        self
    }

    /// Approval policy for a connection opening now.
    pub fn approval_policy(&self) -> ApprovalPolicy {
        match &self.live_config {
            Some(config) => ApprovalPolicy::from_config(&config.read().approval),
            None => self.approval,
        }
    }

    pub fn with_channels(mut self, channels: Arc<ChannelManager>) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn with_cron(mut self, cron: Arc<CronScheduler>) -> Self {
        self.cron = Some(cron);
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: Arc<HeartbeatSupervisor>) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }
}

/// Build the Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/api/v1/status", get(routes::status_handler))
        .route("/api/v1/channels", get(routes::channels_handler))
        .route("/api/v1/channels/send", post(routes::channel_send_handler))
        .route("/api/v1/modules", get(routes::modules_handler))
        .route("/api/v1/modules/check", post(routes::modules_check_handler))
        .route(
            "/api/v1/cron",
            get(routes::cron_list_handler).post(routes::cron_add_handler),
        )
        .route("/api/v1/cron/{id}", delete(routes::cron_remove_handler));

    let api_routes = if state.config.api_key.is_some() {
        api_routes.layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
    } else {
        api_routes
    };

    let mut router = Router::new()
        .route("/health", get(routes::health_handler))
        .route("/ws", get(ws::ws_handler))
        .merge(api_routes)
        .with_state(state.clone());

    if state.config.cors {
        router = router.layer(CorsLayer::permissive());
    }

    router
}

/// Middleware that checks the Authorization header against the configured API key.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: Request<axum::body::Body>,
    next: Next,
) -> std::result::Result<Response, StatusCode> {
    if let Some(ref expected_key) = state.config.api_key {
        let provided = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        match provided {
            Some(key) if key == expected_key => {}
            _ => {
                warn!("unauthorized API request, invalid or missing API key");
                return Err(StatusCode::UNAUTHORIZED);
            }
        }
    }
    Ok(next.run(request).await)
}

/// Serve until `shutdown` resolves.
pub async fn start_server(
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listen = state.config.listen.clone();
    let router = build_router(state);

    info!(listen = %listen, "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .map_err(|e| SwitchboardError::Config(format!("failed to bind {listen}: {e}")))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("HTTP server stopped");
    Ok(())
}
