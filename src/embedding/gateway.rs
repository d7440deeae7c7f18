//! Embedding gateway: batching, deadlines and dimension checks around a
//! provider.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::hashing::HashingEmbeddingProvider;
use super::ollama::OllamaEmbeddingProvider;
use super::openai::OpenAiEmbeddingProvider;
use super::provider::EmbeddingProvider;
use crate::core::config::{EmbeddingBackend, EmbeddingSettings};
use crate::core::errors::{EmbeddingError, RagError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    /// Reachable, but producing vectors of the wrong length.
    Misconfigured,
    Unavailable,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingHealth {
    pub status: HealthStatus,
    pub provider: String,
    pub model: String,
    /// Configured vector length.
    pub dimension: usize,
    /// Vector length observed from the health-check call, when it succeeded.
    pub observed_dimension: Option<usize>,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct EmbeddingGateway {
    provider: Arc<dyn EmbeddingProvider>,
    dimension: usize,
    batch_size: usize,
    timeout: Duration,
}

impl EmbeddingGateway {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        dimension: usize,
        batch_size: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            dimension,
            batch_size,
            timeout,
        }
    }

    pub fn from_settings(settings: &EmbeddingSettings) -> Result<Self, RagError> {
        if settings.dimension == 0 {
            return Err(RagError::configuration("embedding.dimension must be greater than zero"));
        }

        let provider: Arc<dyn EmbeddingProvider> = match settings.provider {
            EmbeddingBackend::OpenAi => Arc::new(OpenAiEmbeddingProvider::new(
                &settings.base_url,
                &settings.model,
                settings.api_key.clone(),
                settings.timeout,
            )),
            EmbeddingBackend::Ollama => Arc::new(OllamaEmbeddingProvider::new(
                &settings.base_url,
                &settings.model,
                settings.timeout,
            )),
            EmbeddingBackend::Hashing => Arc::new(HashingEmbeddingProvider::new(
                &settings.model,
                settings.dimension,
            )),
        };

        tracing::info!(
            provider = provider.name(),
            model = %settings.model,
            dimension = settings.dimension,
            "Embedding gateway configured"
        );

        Ok(Self::new(
            provider,
            settings.dimension,
            settings.batch_size,
            settings.timeout,
        ))
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Effective batch size: the smaller of the configured and provider limits.
    pub fn batch_size(&self) -> usize {
        self.batch_size.min(self.provider.max_batch_size()).max(1)
    }

    /// Embed `texts` in order. Empty input makes no provider call.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(declared) = self.provider.declared_dimension() {
            if declared != self.dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.dimension,
                    actual: declared,
                });
            }
        }

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size()) {
            let embedded = tokio::time::timeout(self.timeout, self.provider.embed_batch(batch))
                .await
                .map_err(|_| EmbeddingError::Timeout(self.timeout))??;

            if embedded.len() != batch.len() {
                return Err(EmbeddingError::CountMismatch {
                    sent: batch.len(),
                    received: embedded.len(),
                });
            }
            if let Some(wrong) = embedded.iter().find(|v| v.len() != self.dimension) {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.dimension,
                    actual: wrong.len(),
                });
            }
            vectors.extend(embedded);
        }

        tracing::debug!(
            provider = self.provider.name(),
            texts = texts.len(),
            "Embedded batch"
        );
        Ok(vectors)
    }

    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed(&[query.to_string()]).await?;
        vectors.pop().ok_or(EmbeddingError::CountMismatch {
            sent: 1,
            received: 0,
        })
    }

    /// Probe the provider: reachability first, then one embedding call to
    /// observe the real vector length.
    pub async fn health_check(&self) -> EmbeddingHealth {
        let mut health = EmbeddingHealth {
            status: HealthStatus::Ok,
            provider: self.provider.name().to_string(),
            model: self.provider.model().to_string(),
            dimension: self.dimension,
            observed_dimension: None,
            error: None,
        };

        let reachable = tokio::time::timeout(self.timeout, self.provider.health_check())
            .await
            .map_err(|_| EmbeddingError::Timeout(self.timeout))
            .and_then(|result| result);
        if let Err(err) = reachable {
            health.status = HealthStatus::Unavailable;
            health.error = Some(err.to_string());
            return health;
        }

        let check = tokio::time::timeout(
            self.timeout,
            self.provider.embed_batch(&["health check".to_string()]),
        )
        .await
        .map_err(|_| EmbeddingError::Timeout(self.timeout))
        .and_then(|result| result);

        match check {
            Ok(vectors) => {
                let observed = vectors.first().map(Vec::len);
                health.observed_dimension = observed;
                if observed != Some(self.dimension) {
                    let err = EmbeddingError::DimensionMismatch {
                        expected: self.dimension,
                        actual: observed.unwrap_or(0),
                    };
                    health.status = HealthStatus::Misconfigured;
                    health.error = Some(err.to_string());
                }
            }
            Err(err) => {
                health.status = HealthStatus::Unavailable;
                health.error = Some(err.to_string());
            }
        }

        health
    }
}
