use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::provider::{ChatMessage, GenerationProvider};
use crate::core::config::GenerationSettings;
use crate::core::errors::RagError;

/// OpenAI-compatible `/v1/chat/completions` client (vLLM, LM Studio, OpenAI).
#[derive(Clone)]
pub struct OpenAiChatProvider {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: Client,
}

impl OpenAiChatProvider {
    pub fn new(settings: &GenerationSettings) -> Self {
        Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            api_key: settings.api_key.clone(),
            client: Client::builder()
                .timeout(settings.timeout)
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

fn generation_error<E: std::fmt::Display>(err: E) -> RagError {
    RagError::Generation(err.to_string())
}

#[async_trait]
impl GenerationProvider for OpenAiChatProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn health_check(&self) -> Result<bool, RagError> {
        let url = format!("{}/v1/models", self.base_url);
        let res = self.authorized(self.client.get(&url)).send().await;
        match res {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, RagError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
        });

        let res = self
            .authorized(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(generation_error)?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(RagError::Generation(format!("chat error {}: {}", status, text)));
        }

        let payload: Value = res.json().await.map_err(generation_error)?;
        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RagError::Generation("chat response has no message content".to_string()))
    }
}
