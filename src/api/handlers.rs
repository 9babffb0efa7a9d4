use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::checks::{CheckConfig, HealthCheck, ProbeRecord, ProbeResult};
use crate::monitor::{Monitor, MonitorError};
use crate::notify::{
    ChannelConfig, Event, LogStatus, NotificationChannel, NotificationLog, Provider, Severity,
};
use crate::store::{LogFilter, LogStats, Page, PageRequest, DEFAULT_PER_PAGE};
use crate::validation::ValidationError;

/// Application state shared across handlers
pub struct AppState {
    pub monitor: Arc<Monitor>,
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub checks: usize,
    pub channels: usize,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        checks: state.monitor.list_health_checks().len(),
        channels: state.monitor.list_channels().len(),
    })
}

// ============================================================================
// Health Checks
// ============================================================================

pub async fn list_checks(State(state): State<Arc<AppState>>) -> Json<Vec<HealthCheck>> {
    Json(state.monitor.list_health_checks())
}

pub async fn create_check(
    State(state): State<Arc<AppState>>,
    Json(config): Json<CheckConfig>,
) -> Result<impl IntoResponse, ApiError> {
    let check = state.monitor.create_health_check(config)?;
    Ok((StatusCode::CREATED, Json(check)))
}

pub async fn get_check(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<HealthCheck>, ApiError> {
    Ok(Json(state.monitor.get_health_check(&id)?))
}

pub async fn update_check(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(config): Json<CheckConfig>,
) -> Result<Json<HealthCheck>, ApiError> {
    Ok(Json(state.monitor.update_health_check(&id, config)?))
}

pub async fn delete_check(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.monitor.delete_health_check(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn run_check(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ProbeResult>, ApiError> {
    Ok(Json(state.monitor.run_check_now(&id).await?))
}

#[derive(Deserialize)]
pub struct ResultsQuery {
    pub limit: Option<usize>,
}

pub async fn check_results(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<ResultsQuery>,
) -> Result<Json<Vec<ProbeRecord>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_PER_PAGE);
    Ok(Json(state.monitor.check_results(&id, limit)?))
}

// ============================================================================
// Channels
// ============================================================================

pub async fn list_channels(State(state): State<Arc<AppState>>) -> Json<Vec<NotificationChannel>> {
    Json(
        state
            .monitor
            .list_channels()
            .iter()
            .map(NotificationChannel::redacted)
            .collect(),
    )
}

pub async fn create_channel(
    State(state): State<Arc<AppState>>,
    Json(config): Json<ChannelConfig>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = state.monitor.create_channel(config)?;
    Ok((StatusCode::CREATED, Json(channel.redacted())))
}

pub async fn get_channel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<NotificationChannel>, ApiError> {
    Ok(Json(state.monitor.get_channel(&id)?.redacted()))
}

pub async fn edit_channel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(config): Json<ChannelConfig>,
) -> Result<Json<NotificationChannel>, ApiError> {
    Ok(Json(state.monitor.edit_channel(&id, config)?.redacted()))
}

pub async fn delete_channel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.monitor.delete_channel(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn toggle_channel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<NotificationChannel>, ApiError> {
    Ok(Json(state.monitor.toggle_channel(&id)?.redacted()))
}

pub async fn test_channel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<NotificationLog>, ApiError> {
    Ok(Json(state.monitor.test_channel(&id).await?))
}

// ============================================================================
// Events
// ============================================================================

#[derive(Deserialize)]
pub struct DispatchRequest {
    pub event_type: String,
    pub subject: String,
    #[serde(default)]
    pub message: String,
    /// Defaults to the severity of the event type
    pub severity: Option<Severity>,
    #[serde(default)]
    pub data: serde_json::Map<String, Value>,
}

#[derive(Serialize)]
pub struct DispatchResponse {
    pub delivered: usize,
    pub failed: usize,
    pub logs: Vec<NotificationLog>,
}

pub async fn dispatch_event(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DispatchRequest>,
) -> Result<Json<DispatchResponse>, ApiError> {
    let mut event = Event::new(request.event_type, request.subject, request.message);
    if let Some(severity) = request.severity {
        event = event.with_severity(severity);
    }
    for (key, value) in request.data {
        event = event.with_field(key, value);
    }

    let logs = state.monitor.dispatch(event).await?;
    let delivered = logs
        .iter()
        .filter(|log| log.status == LogStatus::Success)
        .count();

    Ok(Json(DispatchResponse {
        delivered,
        failed: logs.len() - delivered,
        logs,
    }))
}

// ============================================================================
// Notification Logs
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct LogQuery {
    pub provider: Option<Provider>,
    pub channel_id: Option<String>,
    pub status: Option<LogStatus>,
    pub event_type: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub search: Option<String>,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

impl LogQuery {
    fn split(self) -> (LogFilter, PageRequest) {
        let page = PageRequest::new(
            self.page.unwrap_or(1),
            self.per_page.unwrap_or(DEFAULT_PER_PAGE),
        );
        let filter = LogFilter {
            provider: self.provider,
            channel_id: self.channel_id,
            status: self.status,
            event_type: self.event_type,
            from: self.from,
            to: self.to,
            search: self.search,
        };
        (filter, page)
    }
}

pub async fn list_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogQuery>,
) -> Json<Page<NotificationLog>> {
    let (filter, page) = query.split();
    Json(state.monitor.notification_logs(&filter, page))
}

pub async fn log_stats(State(state): State<Arc<AppState>>) -> Json<LogStats> {
    Json(state.monitor.log_stats())
}

pub async fn retry_log(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<NotificationLog>, ApiError> {
    Ok(Json(state.monitor.retry_notification(&id).await?))
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<MonitorError> for ApiError {
    fn from(err: MonitorError) -> Self {
        let message = err.to_string();
        match err {
            MonitorError::Validation(ValidationError::DuplicateName(_)) => {
                ApiError::Conflict(message)
            }
            MonitorError::Validation(_) => ApiError::BadRequest(message),
            MonitorError::CheckNotFound(_)
            | MonitorError::ChannelNotFound(_)
            | MonitorError::LogNotFound(_) => ApiError::NotFound(message),
            MonitorError::CheckBusy(_) | MonitorError::NotRetryable { .. } => {
                ApiError::Conflict(message)
            }
            MonitorError::Store(_) | MonitorError::Prober(_) => {
                tracing::error!(error = %message, "Request failed");
                ApiError::Internal(message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
