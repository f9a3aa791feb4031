pub mod health;
pub mod jobs;
pub mod subscribers;

use axum::{http::StatusCode, Json};
use mailcast_store::StoreError;
use serde_json::{json, Value};
use tracing::error;

/// Error half of every handler's return type.
pub type ApiError = (StatusCode, Json<Value>);

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

/// Map a store failure to a response: unknown ids are 404, the rest 500.
pub fn store_error(e: StoreError) -> ApiError {
    match e {
        StoreError::JobNotFound { id } => {
            api_error(StatusCode::NOT_FOUND, format!("job not found: {id}"))
        }
        other => {
            error!("store error: {other}");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "db error")
        }
    }
}
