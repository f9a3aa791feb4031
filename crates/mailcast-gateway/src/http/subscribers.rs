use std::sync::Arc;

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    Json,
};
use mailcast_store::SqliteStore;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{api_error, store_error, ApiError};
use crate::app::AppState;

/// Request body cap for `POST /upload`.
pub const UPLOAD_LIMIT: usize = 20 << 20;

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub emails: Vec<String>,
}

/// POST /subscribers — bulk import. Blank entries and duplicates are skipped.
pub async fn import_subscribers(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ImportRequest>,
) -> Result<Json<Value>, ApiError> {
    let added = add_all(&state.store, req.emails.iter().map(String::as_str));
    info!(added, submitted = req.emails.len(), "subscribers imported");
    Ok(Json(json!({ "added": added })))
}

/// POST /upload — multipart form with a CSV `file` field; the first column
/// of every row is an address.
pub async fn upload_csv(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let mut data = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
        data = Some(bytes);
        break;
    }
    let Some(data) = data else {
        return Err(api_error(StatusCode::BAD_REQUEST, "file required"));
    };

    let emails = first_column(&data);
    let added = add_all(&state.store, emails.iter().map(String::as_str));
    info!(added, rows = emails.len(), "subscribers uploaded");
    Ok(Json(json!({ "added": added })))
}

/// GET /subscribers
pub async fn list_subscribers(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    use mailcast_store::DeliveryStore;

    let subscribers = state.store.list_subscribers().map_err(store_error)?;
    Ok(Json(json!({ "subscribers": subscribers })))
}

/// First field of every readable CSV row. There is no header row and rows
/// may differ in width; unreadable rows are logged and skipped.
fn first_column(data: &[u8]) -> Vec<String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(data);

    reader
        .records()
        .filter_map(|record| match record {
            Ok(record) => record.get(0).map(str::to_string),
            Err(e) => {
                warn!("csv read: {e}");
                None
            }
        })
        .collect()
}

/// Insert every non-blank address; returns how many were new.
fn add_all<'a>(store: &SqliteStore, emails: impl Iterator<Item = &'a str>) -> usize {
    let mut added = 0;
    for email in emails.map(str::trim).filter(|e| !e.is_empty()) {
        match store.add_subscriber(email) {
            Ok(_) => added += 1,
            Err(e) => warn!(%email, "subscriber not added: {e}"),
        }
    }
    added
}
