use std::time::Duration;

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            ApiError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg.clone()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}

/// Failures raised by an embedding provider or the gateway around it.
#[derive(Debug, Clone, Error)]
pub enum EmbeddingError {
    #[error("embedding provider unreachable: {0}")]
    Unreachable(String),
    #[error("embedding call timed out after {0:?}")]
    Timeout(Duration),
    #[error("embedding provider error: {0}")]
    Provider(String),
    #[error("embedding dimension mismatch: expected {expected}, provider returned {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding count mismatch: sent {sent} texts, received {received} vectors")]
    CountMismatch { sent: usize, received: usize },
}

impl EmbeddingError {
    /// Timeouts and connectivity failures may succeed on a later attempt.
    /// A dimension mismatch needs an operator to fix the configuration.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Timeout(_))
    }
}

#[derive(Debug, Error)]
pub enum RagError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error("extraction failed: {0}")]
    Extraction(String),
    #[error("store error: {0}")]
    Store(String),
    /// The database was locked or no pooled connection became free in time.
    #[error("store busy: {0}")]
    StoreBusy(String),
    #[error("retrieval failed: {0}")]
    Retrieval(String),
    #[error("retrieval timed out")]
    RetrievalTimeout,
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl RagError {
    pub fn configuration(message: impl Into<String>) -> Self {
        RagError::Configuration(message.into())
    }

    /// Whether the processing pipeline may retry the failed step.
    pub fn is_retryable(&self) -> bool {
        match self {
            RagError::Embedding(err) => err.is_retryable(),
            RagError::StoreBusy(_) => true,
            _ => false,
        }
    }
}

impl From<sqlx::Error> for RagError {
    fn from(err: sqlx::Error) -> Self {
        if is_busy(&err) {
            RagError::StoreBusy(err.to_string())
        } else {
            RagError::Store(err.to_string())
        }
    }
}

/// SQLITE_BUSY and SQLITE_LOCKED (including extended codes), or an exhausted pool.
fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db_err) => db_err
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map(|code| matches!(code & 0xff, 5 | 6))
            .unwrap_or(false),
        _ => false,
    }
}

impl From<RagError> for ApiError {
    fn from(err: RagError) -> Self {
        match err {
            RagError::Configuration(msg) | RagError::InvalidInput(msg) => ApiError::BadRequest(msg),
            RagError::NotFound(msg) => ApiError::NotFound(msg),
            RagError::RetrievalTimeout => {
                ApiError::Timeout("retrieval timed out, please try again".to_string())
            }
            RagError::Embedding(err) => {
                tracing::error!("Embedding failure surfaced to API: {}", err);
                ApiError::ServiceUnavailable("embedding service unavailable".to_string())
            }
            RagError::StoreBusy(msg) => {
                tracing::warn!("Store busy while serving request: {}", msg);
                ApiError::ServiceUnavailable("store busy, please try again".to_string())
            }
            RagError::Generation(msg) => {
                tracing::error!("Generation failure surfaced to API: {}", msg);
                ApiError::ServiceUnavailable("generation service unavailable".to_string())
            }
            other => {
                tracing::error!("Request failed: {}", other);
                ApiError::Internal("request failed".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_embedding_errors_are_retryable() {
        assert!(EmbeddingError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(EmbeddingError::Unreachable("refused".into()).is_retryable());
        assert!(!EmbeddingError::DimensionMismatch {
            expected: 768,
            actual: 1536
        }
        .is_retryable());
        assert!(!RagError::Extraction("bad pdf".into()).is_retryable());
        assert!(RagError::StoreBusy("database is locked".into()).is_retryable());
        assert!(!RagError::Store("no such table: source_units".into()).is_retryable());
    }

    #[test]
    fn pool_timeouts_are_busy() {
        assert!(RagError::from(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!RagError::from(sqlx::Error::RowNotFound).is_retryable());
    }

    #[tokio::test]
    async fn constraint_violations_are_permanent() {
        let pool = crate::db::test_pool().await;
        let err = sqlx::query(
            "INSERT INTO source_chunks (unit_id, chunk_index, content) VALUES ('ghost', 0, 'x')",
        )
        .execute(&pool)
        .await
        .unwrap_err();

        let err = RagError::from(err);
        assert!(matches!(err, RagError::Store(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn locked_database_is_retryable() {
        use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
        use sqlx::Connection;

        let path = std::env::temp_dir().join(format!("busy-{}.db", uuid::Uuid::new_v4()));
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .busy_timeout(Duration::ZERO);
        let mut holder = SqliteConnection::connect_with(&options).await.unwrap();
        let mut writer = SqliteConnection::connect_with(&options).await.unwrap();

        sqlx::query("CREATE TABLE notes (body TEXT)")
            .execute(&mut holder)
            .await
            .unwrap();
        sqlx::query("BEGIN EXCLUSIVE").execute(&mut holder).await.unwrap();

        let err = sqlx::query("INSERT INTO notes VALUES ('x')")
            .execute(&mut writer)
            .await
            .unwrap_err();
        let err = RagError::from(err);
        assert!(matches!(err, RagError::StoreBusy(_)), "{err:?}");
        assert!(err.is_retryable());

        sqlx::query("ROLLBACK").execute(&mut holder).await.unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn internal_details_are_not_exposed() {
        let api: ApiError = RagError::Retrieval("disk I/O error at page 42".into()).into();
        match api {
            ApiError::Internal(msg) => assert!(!msg.contains("disk")),
            other => panic!("unexpected mapping: {other:?}"),
        }
    }
}
