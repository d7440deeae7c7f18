use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "embedding_provider": state.gateway.provider_name(),
        "embedding_model": state.gateway.model(),
        "generation_enabled": state.generation.is_some(),
    }))
}

/// Probes the configured embedding provider. Always answers 200; the body
/// carries `ok`, `misconfigured` or `unavailable`.
pub async fn embedding_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.gateway.health_check().await;
    Json(health)
}
