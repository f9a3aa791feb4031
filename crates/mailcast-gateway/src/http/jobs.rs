use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{api_error, store_error, ApiError};
use crate::app::AppState;

/// `scheduled_at` as accepted on the wire: RFC 3339 text, unix seconds as
/// text, or unix seconds as a number.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ScheduleAt {
    Unix(i64),
    Text(String),
}

impl ScheduleAt {
    /// `Ok(None)` means "now".
    fn resolve(&self) -> Result<Option<DateTime<Utc>>, String> {
        match self {
            ScheduleAt::Unix(secs) => from_unix(*secs).map(Some),
            ScheduleAt::Text(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return Ok(None);
                }
                if let Ok(secs) = text.parse::<i64>() {
                    return from_unix(secs).map(Some);
                }
                DateTime::parse_from_rfc3339(text)
                    .map(|t| Some(t.with_timezone(&Utc)))
                    .map_err(|_| format!("invalid scheduled_at: {text}"))
            }
        }
    }
}

fn from_unix(secs: i64) -> Result<DateTime<Utc>, String> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| format!("invalid scheduled_at: {secs}"))
}

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub scheduled_at: Option<ScheduleAt>,
}

/// POST /jobs — schedule a broadcast.
pub async fn schedule_job(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ScheduleRequest>,
) -> Result<Json<Value>, ApiError> {
    let subject = req.subject.trim();
    let body = req.body.trim();
    if subject.is_empty() || body.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "subject and body are required",
        ));
    }

    let scheduled_at = match &req.scheduled_at {
        Some(at) => at
            .resolve()
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?,
        None => None,
    };

    let job = state
        .store
        .create_job(subject, body, scheduled_at)
        .map_err(store_error)?;
    info!(job_id = %job.id, scheduled_at = %job.scheduled_at, "job scheduled");

    Ok(Json(json!({
        "id": job.id,
        "scheduled_at": job.scheduled_at.timestamp(),
    })))
}

/// GET /jobs — newest first.
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let jobs = state.store.list_jobs().map_err(store_error)?;
    Ok(Json(json!({ "jobs": jobs })))
}

/// GET /jobs/{id}
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let job = state.store.get_job(&id).map_err(store_error)?;
    Ok(Json(json!(job)))
}

/// GET /jobs/{id}/sends — per-recipient delivery records.
pub async fn list_sends(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.store.get_job(&id).map_err(store_error)?;
    let sends = state.store.list_sends(&id).map_err(store_error)?;
    Ok(Json(json!({ "sends": sends })))
}
