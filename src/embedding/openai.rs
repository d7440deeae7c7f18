//! OpenAI-compatible `/v1/embeddings` adapter. Also serves vLLM and LM Studio.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::provider::{request_error, status_error, EmbeddingProvider};
use crate::core::errors::EmbeddingError;

const MAX_BATCH_SIZE: usize = 256;

#[derive(Clone)]
pub struct OpenAiEmbeddingProvider {
    base_url: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
    client: Client,
}

impl OpenAiEmbeddingProvider {
    pub fn new(base_url: &str, model: &str, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            timeout,
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    fn name(&self) -> &str {
        "openai"
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

        let url = format!("{}/v1/embeddings", self.base_url);
        let body = json!({
            "model": self.model,
            "input": texts,
        });

        let res = self
            .authorized(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(e, self.timeout))?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(status_error(self.name(), status, &text));
        }

        let mut payload: EmbeddingsResponse = res
            .json()
            .await
            .map_err(|e| EmbeddingError::Provider(format!("invalid embeddings payload: {}", e)))?;

        // The API documents `index`; restore input order when it is present.
        if payload.data.iter().all(|item| item.index.is_some()) {
            payload.data.sort_by_key(|item| item.index);
        }

        Ok(payload.data.into_iter().map(|item| item.embedding).collect())
    }

    async fn health_check(&self) -> Result<(), EmbeddingError> {
        let url = format!("{}/v1/models", self.base_url);
        let res = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|e| request_error(e, self.timeout))?;

        let status = res.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = res.text().await.unwrap_or_default();
            Err(status_error(self.name(), status, &text))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_items_are_restored_to_input_order() {
        let mut payload: EmbeddingsResponse = serde_json::from_value(json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        }))
        .unwrap();
        payload.data.sort_by_key(|item| item.index);
        assert_eq!(payload.data[0].embedding, vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn unreachable_server_is_a_retryable_error() {
        let provider = OpenAiEmbeddingProvider::new(
            "http://127.0.0.1:9/",
            "text-embedding-3-small",
            None,
            Duration::from_secs(2),
        );
        assert_eq!(provider.base_url, "http://127.0.0.1:9");
        let err = provider.embed_batch(&["hello".to_string()]).await.unwrap_err();
        assert!(err.is_retryable(), "unexpected error: {err}");
    }
}
