use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::core::errors::ApiError;
use crate::generation::ChatMessage;
use crate::rag::{RetrieveOptions, ScopeDescriptor};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RetrieveRequest {
    pub query: String,
    pub scope: ScopeDescriptor,
    pub top_k: Option<usize>,
    pub max_chars: Option<usize>,
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub allow_partial: bool,
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
    pub scope: ScopeDescriptor,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    pub top_k: Option<usize>,
    pub max_chars: Option<usize>,
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub allow_partial: bool,
}

fn options(timeout_ms: Option<u64>, allow_partial: bool) -> RetrieveOptions {
    RetrieveOptions {
        timeout: timeout_ms.map(Duration::from_millis),
        allow_partial,
    }
}

pub async fn retrieve(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RetrieveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let defaults = state.retriever.settings();
    let bundle = state
        .retriever
        .retrieve(
            &payload.query,
            &payload.scope,
            payload.top_k.unwrap_or(defaults.top_k),
            payload.max_chars.unwrap_or(defaults.max_chars),
            options(payload.timeout_ms, payload.allow_partial),
        )
        .await?;
    Ok(Json(bundle))
}

pub async fn ask(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(generation) = state.generation.clone() else {
        return Err(ApiError::ServiceUnavailable(
            "answer generation is disabled".to_string(),
        ));
    };

    let defaults = state.retriever.settings();
    let bundle = state
        .retriever
        .retrieve(
            &payload.question,
            &payload.scope,
            payload.top_k.unwrap_or(defaults.top_k),
            payload.max_chars.unwrap_or(defaults.max_chars),
            options(payload.timeout_ms, payload.allow_partial),
        )
        .await?;

    let answer = generation
        .answer(&payload.question, &payload.history, &bundle)
        .await?;
    Ok(Json(answer))
}
