use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::core::errors::EmbeddingError;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// provider name (e.g. "openai", "ollama", "hashing")
    fn name(&self) -> &str;

    /// model identifier sent with each request
    fn model(&self) -> &str;

    /// largest number of texts accepted in a single call
    fn max_batch_size(&self) -> usize;

    /// vector length the provider is known to produce, if it declares one
    fn declared_dimension(&self) -> Option<usize> {
        None
    }

    /// embed a batch of texts, one vector per input in input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// check that the provider is reachable and the model is served
    async fn health_check(&self) -> Result<(), EmbeddingError>;
}

/// Map a transport failure onto the embedding error taxonomy.
pub(crate) fn request_error(err: reqwest::Error, timeout: Duration) -> EmbeddingError {
    if err.is_timeout() {
        EmbeddingError::Timeout(timeout)
    } else if err.is_connect() || err.is_request() {
        EmbeddingError::Unreachable(err.to_string())
    } else {
        EmbeddingError::Provider(err.to_string())
    }
}

/// Server-side failures are transient; client errors are not.
pub(crate) fn status_error(provider: &str, status: StatusCode, body: &str) -> EmbeddingError {
    let message = format!("{} returned {}: {}", provider, status, body.trim());
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        EmbeddingError::Unreachable(message)
    } else {
        EmbeddingError::Provider(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_retryable() {
        assert!(status_error("openai", StatusCode::SERVICE_UNAVAILABLE, "busy").is_retryable());
        assert!(status_error("openai", StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        let err = status_error("openai", StatusCode::NOT_FOUND, "model not found");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("model not found"));
    }
}
