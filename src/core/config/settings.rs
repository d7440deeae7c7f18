//! Typed view over the merged YAML configuration.

use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use super::validation::validate_config;
use crate::core::errors::RagError;

#[derive(Debug, Clone, Serialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ChunkingSettings {
    pub chunk_size: usize,
    pub overlap: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    OpenAi,
    Ollama,
    Hashing,
}

impl FromStr for EmbeddingBackend {
    type Err = RagError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "openai" | "vllm" | "lmstudio" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            "hashing" | "local" => Ok(Self::Hashing),
            other => Err(RagError::Configuration(format!(
                "Unknown embedding provider '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingBackend,
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
    pub batch_size: usize,
    pub timeout: Duration,
    #[serde(skip)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub max_chars: usize,
    pub lexical_enabled: bool,
    /// Weight of the similarity score in the blended score; lexical gets the rest.
    pub similarity_weight: f32,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessingSettings {
    pub workers: usize,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub stale_after: Duration,
    /// How often the supervisor sweeps for orphaned units while running.
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationSettings {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    #[serde(skip)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RagSettings {
    pub server: ServerSettings,
    pub chunking: ChunkingSettings,
    pub embedding: EmbeddingSettings,
    pub retrieval: RetrievalSettings,
    pub processing: ProcessingSettings,
    pub generation: GenerationSettings,
}

#[cfg(test)]
impl Default for RagSettings {
    fn default() -> Self {
        Self::from_config(&Value::Object(Default::default()))
            .expect("empty config always yields defaults")
    }
}

impl RagSettings {
    pub fn from_config(config: &Value) -> Result<Self, RagError> {
        validate_config(config)?;

        let server = ServerSettings {
            host: str_field(config, "server", "host").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: u64_field(config, "server", "port").unwrap_or(0) as u16,
            cors_allowed_origins: config
                .get("server")
                .and_then(|v| v.get("cors_allowed_origins"))
                .and_then(|v| v.as_array())
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| item.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
        };

        let chunking = ChunkingSettings {
            chunk_size: u64_field(config, "chunking", "chunk_size").unwrap_or(1000) as usize,
            overlap: u64_field(config, "chunking", "overlap").unwrap_or(200) as usize,
        };
        if chunking.overlap >= chunking.chunk_size {
            return Err(RagError::Configuration(format!(
                "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
                chunking.overlap, chunking.chunk_size
            )));
        }

        let embedding = EmbeddingSettings {
            provider: str_field(config, "embedding", "provider")
                .as_deref()
                .unwrap_or("hashing")
                .parse()?,
            base_url: str_field(config, "embedding", "base_url")
                .unwrap_or_else(|| "http://127.0.0.1:11434".to_string()),
            model: str_field(config, "embedding", "model")
                .unwrap_or_else(|| "nomic-embed-text".to_string()),
            dimension: u64_field(config, "embedding", "dimension").unwrap_or(768) as usize,
            batch_size: u64_field(config, "embedding", "batch_size").unwrap_or(64) as usize,
            timeout: Duration::from_secs(
                u64_field(config, "embedding", "timeout_secs").unwrap_or(30),
            ),
            api_key: str_field(config, "embedding", "api_key").filter(|key| !key.is_empty()),
        };

        let retrieval = RetrievalSettings {
            top_k: u64_field(config, "retrieval", "top_k").unwrap_or(8) as usize,
            max_chars: u64_field(config, "retrieval", "max_chars").unwrap_or(12_000) as usize,
            lexical_enabled: config
                .get("retrieval")
                .and_then(|v| v.get("lexical_enabled"))
                .and_then(|v| v.as_bool())
                .unwrap_or(true),
            similarity_weight: config
                .get("retrieval")
                .and_then(|v| v.get("similarity_weight"))
                .and_then(|v| v.as_f64())
                .unwrap_or(0.7) as f32,
            timeout: Duration::from_millis(
                u64_field(config, "retrieval", "timeout_ms").unwrap_or(10_000),
            ),
        };

        let processing = ProcessingSettings {
            workers: u64_field(config, "processing", "workers").unwrap_or(2) as usize,
            max_attempts: u64_field(config, "processing", "max_attempts").unwrap_or(3) as u32,
            backoff_base: Duration::from_millis(
                u64_field(config, "processing", "backoff_base_ms").unwrap_or(500),
            ),
            backoff_max: Duration::from_millis(
                u64_field(config, "processing", "backoff_max_ms").unwrap_or(8_000),
            ),
            stale_after: Duration::from_secs(
                u64_field(config, "processing", "stale_after_secs").unwrap_or(1_800),
            ),
            sweep_interval: Duration::from_secs(
                u64_field(config, "processing", "sweep_interval_secs").unwrap_or(60),
            ),
        };

        let generation = GenerationSettings {
            enabled: config
                .get("generation")
                .and_then(|v| v.get("enabled"))
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            base_url: str_field(config, "generation", "base_url")
                .unwrap_or_else(|| "http://127.0.0.1:1234".to_string()),
            model: str_field(config, "generation", "model")
                .unwrap_or_else(|| "local-model".to_string()),
            timeout: Duration::from_secs(
                u64_field(config, "generation", "timeout_secs").unwrap_or(120),
            ),
            api_key: str_field(config, "generation", "api_key").filter(|key| !key.is_empty()),
        };

        Ok(Self {
            server,
            chunking,
            embedding,
            retrieval,
            processing,
            generation,
        })
    }
}

fn str_field(config: &Value, section: &str, key: &str) -> Option<String> {
    config
        .get(section)
        .and_then(|v| v.get(key))
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
}

fn u64_field(config: &Value, section: &str, key: &str) -> Option<u64> {
    config
        .get(section)
        .and_then(|v| v.get(key))
        .and_then(|v| v.as_u64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_match_documented_values() {
        let settings = RagSettings::default();
        assert_eq!(settings.chunking.chunk_size, 1000);
        assert_eq!(settings.chunking.overlap, 200);
        assert_eq!(settings.embedding.provider, EmbeddingBackend::Hashing);
        assert_eq!(settings.embedding.dimension, 768);
        assert_eq!(settings.retrieval.top_k, 8);
        assert!((settings.retrieval.similarity_weight - 0.7).abs() < f32::EPSILON);
        assert_eq!(settings.processing.max_attempts, 3);
        assert_eq!(settings.processing.sweep_interval, Duration::from_secs(60));
        assert!(!settings.generation.enabled);
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let err = RagSettings::from_config(&json!({
            "chunking": { "chunk_size": 200, "overlap": 200 }
        }))
        .unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)));
    }

    #[test]
    fn unknown_embedding_provider_is_a_configuration_error() {
        let err = RagSettings::from_config(&json!({
            "embedding": { "provider": "carrier-pigeon" }
        }))
        .unwrap_err();
        assert!(err.to_string().contains("carrier-pigeon"));

        let settings = RagSettings::from_config(&json!({
            "embedding": { "provider": "vLLM", "api_key": "" }
        }))
        .unwrap();
        assert_eq!(settings.embedding.provider, EmbeddingBackend::OpenAi);
        assert!(settings.embedding.api_key.is_none());
    }
}
