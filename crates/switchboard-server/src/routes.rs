use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use switchboard_channels::{ChannelStatus, QueueStats};
use switchboard_core::SwitchboardError;
use switchboard_cron::{CronJob, NewCronJob};
use switchboard_heartbeat::{ModuleHealth, TickReport};

use crate::AppState;

/// JSON error body with a status derived from the error kind.
pub struct ApiError(StatusCode, String);

impl ApiError {
    fn disabled(what: &str) -> Self {
        ApiError(StatusCode::SERVICE_UNAVAILABLE, format!("{what} is not enabled"))
    }
}

impl From<SwitchboardError> for ApiError {
    fn from(e: SwitchboardError) -> Self {
        let status = match &e {
            SwitchboardError::InvalidRequest(_) | SwitchboardError::InvalidSchedule(_) => {
                StatusCode::BAD_REQUEST
            }
            SwitchboardError::UnknownChannel(_) | SwitchboardError::JobNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            SwitchboardError::ExecutorUnavailable(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({ "error": self.1 }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    version: &'static str,
    uptime_secs: u64,
    executor: String,
    clients: usize,
    channels: usize,
    outbound: Option<QueueStats>,
    cron_jobs: Option<usize>,
    modules: Option<usize>,
    modules_failing: Option<usize>,
}

pub async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let modules = state.heartbeat.as_ref().map(|h| h.summary());
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        executor: state.dispatcher.executor_name().to_string(),
        clients: state.bus.subscriber_count(),
        channels: state.channels.as_ref().map_or(0, |c| c.status().len()),
        outbound: state.channels.as_ref().map(|c| c.queue_stats()),
        cron_jobs: state.cron.as_ref().map(|c| c.list_jobs().len()),
        modules: modules.as_ref().map(Vec::len),
        modules_failing: modules
            .as_ref()
            .map(|m| m.iter().filter(|h| h.consecutive_failures > 0).count()),
    })
}

pub async fn channels_handler(State(state): State<Arc<AppState>>) -> Json<Vec<ChannelStatus>> {
    Json(state.channels.as_ref().map(|c| c.status()).unwrap_or_default())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    channel_id: String,
    chat_id: String,
    text: String,
}

pub async fn channel_send_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SendRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let channels = state
        .channels
        .as_ref()
        .ok_or_else(|| ApiError::disabled("channels"))?;
    let queued = channels.send(&req.channel_id, &req.chat_id, &req.text)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "queued": queued })),
    ))
}

pub async fn modules_handler(State(state): State<Arc<AppState>>) -> Json<Vec<ModuleHealth>> {
    Json(state.heartbeat.as_ref().map(|h| h.summary()).unwrap_or_default())
}

pub async fn modules_check_handler(State(state): State<Arc<AppState>>) -> ApiResult<Json<TickReport>> {
    let heartbeat = state
        .heartbeat
        .as_ref()
        .ok_or_else(|| ApiError::disabled("heartbeat"))?;
    Ok(Json(heartbeat.tick().await))
}

pub async fn cron_list_handler(State(state): State<Arc<AppState>>) -> Json<Vec<CronJob>> {
    Json(state.cron.as_ref().map(|c| c.list_jobs()).unwrap_or_default())
}

pub async fn cron_add_handler(
    State(state): State<Arc<AppState>>,
    Json(new): Json<NewCronJob>,
) -> ApiResult<(StatusCode, Json<CronJob>)> {
    let cron = state.cron.as_ref().ok_or_else(|| ApiError::disabled("cron"))?;
    let job = cron.add_job(new).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn cron_remove_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let cron = state.cron.as_ref().ok_or_else(|| ApiError::disabled("cron"))?;
    cron.remove_job(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
