//! Ollama `/api/embed` adapter.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::provider::{request_error, status_error, EmbeddingProvider};
use crate::core::errors::EmbeddingError;

const MAX_BATCH_SIZE: usize = 64;

#[derive(Clone)]
pub struct OllamaEmbeddingProvider {
    base_url: String,
    model: String,
    timeout: Duration,
    client: Client,
}

impl OllamaEmbeddingProvider {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            timeout,
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddingProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn max_batch_size(&self) -> usize {
        MAX_BATCH_SIZE
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/api/embed", self.base_url);
        let body = json!({
            "model": self.model,
            "input": texts,
        });

        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(e, self.timeout))?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(status_error(self.name(), status, &text));
        }

        let payload: EmbedResponse = res
            .json()
            .await
            .map_err(|e| EmbeddingError::Provider(format!("invalid embed payload: {}", e)))?;
        Ok(payload.embeddings)
    }

    async fn health_check(&self) -> Result<(), EmbeddingError> {
        let url = format!("{}/api/tags", self.base_url);
        let res = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| request_error(e, self.timeout))?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(status_error(self.name(), status, &text));
        }

        let tags: TagsResponse = res
            .json()
            .await
            .map_err(|e| EmbeddingError::Provider(format!("invalid tags payload: {}", e)))?;
        if tags.models.iter().any(|m| model_matches(&m.name, &self.model)) {
            Ok(())
        } else {
            Err(EmbeddingError::Provider(format!(
                "model '{}' is not pulled on the Ollama server",
                self.model
            )))
        }
    }
}

/// Ollama lists models with an explicit tag (`name:latest`).
fn model_matches(listed: &str, configured: &str) -> bool {
    listed == configured
        || (!configured.contains(':') && listed.strip_suffix(":latest") == Some(configured))
}
