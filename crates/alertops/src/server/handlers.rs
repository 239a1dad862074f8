use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use super::signing::{validate_timestamp, verify_slack_signature};
use super::AppState;
use crate::engine::{HealthStatus, StatusUpdate};
use crate::error::{EngineError, StoreError};
use crate::model::{AlertStatus, AlertmanagerPayload, MetricSnapshot, ReactionEvent, Severity};
use crate::store::AlertFilter;

/// Error response with a JSON `{"error": ...}` body.
pub(super) enum ApiError {
    Engine(EngineError),
    /// Missing or invalid request signature
    Unauthorized,
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self::Engine(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Engine(EngineError::Store(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = match self {
            Self::Unauthorized => {
                return (StatusCode::UNAUTHORIZED, Json(json!({"error": "invalid signature"})))
                    .into_response();
            }
            Self::Engine(err) => err,
        };
        let status = match &err {
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::InvalidTransition { .. }
            | EngineError::AlreadyTicketed { .. }
            | EngineError::TicketPending { .. }
            | EngineError::Immutable(_) => StatusCode::CONFLICT,
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::Ticket(_) => StatusCode::BAD_GATEWAY,
            EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %err, "Request failed");
        }
        (status, Json(json!({"error": err.to_string()}))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn validation(message: impl Into<String>) -> ApiError {
    ApiError::Engine(EngineError::Validation(message.into()))
}

// ============================================================================
// Ingestion
// ============================================================================

pub(super) async fn ingest_alerts(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AlertmanagerPayload>,
) -> impl IntoResponse {
    let report = state.engine.ingest_batch(&payload).await;
    let status = if report.storage_failed() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    (status, Json(report))
}

pub(super) async fn slack_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    if let Some(secret) = state.signing_secret.as_deref() {
        let (Some(timestamp), Some(signature)) = (
            header(&headers, "x-slack-request-timestamp"),
            header(&headers, "x-slack-signature"),
        ) else {
            warn!("Slack event without signature headers");
            return Err(ApiError::Unauthorized);
        };
        if !validate_timestamp(timestamp) {
            warn!(timestamp = %timestamp, "Stale Slack event timestamp");
            return Err(ApiError::Unauthorized);
        }
        if !verify_slack_signature(&body, timestamp, signature, secret) {
            warn!("Invalid Slack event signature");
            return Err(ApiError::Unauthorized);
        }
    }

    let envelope: Value =
        serde_json::from_slice(&body).map_err(|e| validation(format!("invalid JSON: {e}")))?;

    match envelope.get("type").and_then(Value::as_str) {
        Some("url_verification") => {
            let challenge = envelope
                .get("challenge")
                .and_then(Value::as_str)
                .ok_or_else(|| validation("missing challenge"))?;
            Ok(Json(json!({"challenge": challenge})))
        }
        Some("event_callback") => {
            let event = envelope.get("event").cloned().unwrap_or(Value::Null);
            let kind = event.get("type").and_then(Value::as_str).unwrap_or_default();
            if !matches!(kind, "reaction_added" | "reaction_removed") {
                debug!(event_type = %kind, "Ignoring Slack event");
                return Ok(Json(json!({"status": "ignored"})));
            }

            let reaction: ReactionEvent = match serde_json::from_value(event) {
                Ok(reaction) => reaction,
                Err(e) => {
                    warn!(error = %e, "Malformed reaction event");
                    return Ok(Json(json!({"status": "ignored", "reason": "malformed"})));
                }
            };
            let outcome = state.engine.react(&reaction).await?;
            Ok(Json(json!({"status": "ok", "result": outcome})))
        }
        _ => Ok(Json(json!({"status": "ignored"}))),
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

// ============================================================================
// Query API
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub(super) struct AlertQuery {
    severity: Option<String>,
    status: Option<String>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    limit: Option<usize>,
}

impl AlertQuery {
    fn into_filter(self) -> ApiResult<AlertFilter> {
        let severity = self
            .severity
            .map(|s| match Severity::from_label(&s) {
                Severity::Unknown if !s.eq_ignore_ascii_case("unknown") => {
                    Err(validation(format!("unknown severity '{s}'")))
                }
                severity => Ok(severity),
            })
            .transpose()?;
        let status = self
            .status
            .map(|s| s.parse::<AlertStatus>().map_err(validation))
            .transpose()?;

        Ok(AlertFilter {
            severity,
            status,
            since: self.since,
            until: self.until,
            limit: self.limit,
        })
    }
}

pub(super) async fn list_alerts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AlertQuery>,
) -> ApiResult<Json<Value>> {
    let filter = query.into_filter()?;
    let alerts = state.engine.list_alerts(&filter)?;
    Ok(Json(json!({"count": alerts.len(), "alerts": alerts})))
}

pub(super) async fn get_alert(
    State(state): State<Arc<AppState>>,
    Path(alert_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.alert_with_history(&alert_id)?))
}

pub(super) async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(alert_id): Path<String>,
    Json(update): Json<StatusUpdate>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.manual_status_update(&alert_id, update).await?))
}

#[derive(Debug, Deserialize)]
pub(super) struct CreateTicketRequest {
    actor: String,
}

pub(super) async fn create_ticket(
    State(state): State<Arc<AppState>>,
    Path(alert_id): Path<String>,
    Json(request): Json<CreateTicketRequest>,
) -> ApiResult<impl IntoResponse> {
    let alert = state
        .engine
        .create_ticket_now(&alert_id, &request.actor)
        .await?;
    Ok((StatusCode::CREATED, Json(alert)))
}

pub(super) async fn stats(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.stats()?))
}

// ============================================================================
// Metrics
// ============================================================================

#[derive(Debug, Deserialize)]
pub(super) struct MetricsQuery {
    #[serde(default = "default_hours")]
    hours: u32,
    hostname: Option<String>,
}

const fn default_hours() -> u32 {
    24
}

pub(super) async fn list_metrics(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MetricsQuery>,
) -> ApiResult<Json<Value>> {
    let metrics = state
        .engine
        .metrics(query.hours, query.hostname.as_deref())?;
    Ok(Json(json!({
        "metrics": metrics,
        "count": metrics.len(),
        "filters": {"hours": query.hours, "hostname": query.hostname},
    })))
}

#[derive(Debug, Deserialize)]
pub(super) struct MetricInput {
    hostname: String,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    metrics: Value,
    #[serde(default)]
    metric_type: Option<String>,
}

pub(super) async fn record_metrics(
    State(state): State<Arc<AppState>>,
    Json(input): Json<MetricInput>,
) -> ApiResult<impl IntoResponse> {
    if input.hostname.trim().is_empty() {
        return Err(validation("hostname is required"));
    }
    let snapshot = MetricSnapshot {
        id: None,
        hostname: input.hostname,
        timestamp: input.timestamp.unwrap_or_else(Utc::now),
        metrics: input.metrics,
        metric_type: input.metric_type.unwrap_or_else(|| "system".to_string()),
    };
    let id = state.engine.record_metrics(&snapshot)?;
    Ok((StatusCode::CREATED, Json(json!({"id": id}))))
}

// ============================================================================
// Health
// ============================================================================

pub(super) async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let report = state.engine.health();
    let status = match report.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };
    (status, Json(report))
}
