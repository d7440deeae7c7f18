use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use std::sync::Arc;

use crate::core::errors::ApiError;
use crate::processing::{ClaimMode, ContentUnit, NewContentUnit, ProcessingStatus};
use crate::rag::ContentKind;
use crate::state::AppState;

fn parse_kind(kind: &str) -> Result<ContentKind, ApiError> {
    kind.parse::<ContentKind>().map_err(ApiError::from)
}

async fn load_unit(
    state: &AppState,
    kind: ContentKind,
    unit_id: &str,
) -> Result<ContentUnit, ApiError> {
    state
        .units
        .get(kind, unit_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("{} {} not found", kind, unit_id)))
}

pub async fn create_unit(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
    Json(payload): Json<NewContentUnit>,
) -> Result<impl IntoResponse, ApiError> {
    let kind = parse_kind(&kind)?;
    let unit = state.units.create(kind, payload).await?;
    let task = state.queue.enqueue(kind, &unit.id, ClaimMode::Fresh)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "unit": unit, "task": task })),
    ))
}

pub async fn get_unit(
    State(state): State<Arc<AppState>>,
    Path((kind, unit_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let kind = parse_kind(&kind)?;
    let unit = load_unit(&state, kind, &unit_id).await?;
    let chunk_count = state.chunk_store.count_chunks(kind, &unit_id).await?;

    let mut body = serde_json::to_value(&unit).map_err(ApiError::internal)?;
    if let Some(fields) = body.as_object_mut() {
        fields.insert("chunk_count".to_string(), json!(chunk_count));
    }
    Ok(Json(body))
}

pub async fn delete_unit(
    State(state): State<Arc<AppState>>,
    Path((kind, unit_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let kind = parse_kind(&kind)?;
    if !state.units.delete(kind, &unit_id).await? {
        return Err(ApiError::NotFound(format!("{} {} not found", kind, unit_id)));
    }
    tracing::info!(kind = %kind, unit_id = %unit_id, "Content unit deleted");
    Ok(Json(json!({ "status": "deleted" })))
}

/// Re-runs a unit whose last attempt failed.
pub async fn retry_unit(
    State(state): State<Arc<AppState>>,
    Path((kind, unit_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let kind = parse_kind(&kind)?;
    let unit = load_unit(&state, kind, &unit_id).await?;
    if unit.processing_status != ProcessingStatus::Failed {
        return Err(ApiError::BadRequest(format!(
            "only failed units can be retried; {} {} is {}",
            kind, unit_id, unit.processing_status
        )));
    }

    let task = state.queue.enqueue(kind, &unit_id, ClaimMode::Retry)?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "task": task }))))
}

/// Rebuilds the chunks of a unit regardless of its last outcome.
pub async fn reprocess_unit(
    State(state): State<Arc<AppState>>,
    Path((kind, unit_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let kind = parse_kind(&kind)?;
    let unit = load_unit(&state, kind, &unit_id).await?;
    if unit.processing_status == ProcessingStatus::Processing {
        return Err(ApiError::BadRequest(format!(
            "{} {} is already being processed",
            kind, unit_id
        )));
    }

    let task = state.queue.enqueue(kind, &unit_id, ClaimMode::Reprocess)?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "task": task }))))
}
