//! Embedding providers and the gateway that batches and validates their output.

mod gateway;
mod hashing;
mod ollama;
mod openai;
mod provider;

pub use gateway::{EmbeddingGateway, EmbeddingHealth, HealthStatus};
pub use hashing::HashingEmbeddingProvider;
pub use ollama::OllamaEmbeddingProvider;
pub use openai::OpenAiEmbeddingProvider;
pub use provider::EmbeddingProvider;
