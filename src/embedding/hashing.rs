//! Local feature-hashing embedder.
//!
//! Each word and each adjacent word pair is hashed (FNV-1a) into one of
//! `dimension` buckets with a hash-derived sign, then the vector is
//! L2-normalized. No network, no model files, fully deterministic. Texts that
//! share vocabulary end up close in cosine space, which is enough for offline
//! deployments and tests.

use async_trait::async_trait;

use super::provider::EmbeddingProvider;
use crate::core::errors::EmbeddingError;
use crate::rag::lexical::tokenize;
use crate::vector_math::l2_normalize;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
const BIGRAM_WEIGHT: f32 = 0.5;

#[derive(Debug, Clone)]
pub struct HashingEmbeddingProvider {
    model: String,
    dimension: usize,
}

impl HashingEmbeddingProvider {
    pub fn new(model: &str, dimension: usize) -> Self {
        Self {
            model: model.to_string(),
            dimension,
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        if self.dimension == 0 {
            return vector;
        }

        let tokens = tokenize(text);
        for token in &tokens {
            self.accumulate(&mut vector, token.as_bytes(), 1.0);
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            self.accumulate(&mut vector, bigram.as_bytes(), BIGRAM_WEIGHT);
        }

        l2_normalize(&mut vector);
        vector
    }

    fn accumulate(&self, vector: &mut [f32], feature: &[u8], weight: f32) {
        let hash = fnv1a(feature);
        let bucket = (hash % self.dimension as u64) as usize;
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    fn name(&self) -> &str {
        "hashing"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn max_batch_size(&self) -> usize {
        1024
    }

    fn declared_dimension(&self) -> Option<usize> {
        Some(self.dimension)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }

    async fn health_check(&self) -> Result<(), EmbeddingError> {
        if self.dimension == 0 {
            return Err(EmbeddingError::Provider(
                "hashing embedder needs a non-zero dimension".to_string(),
            ));
        }
        Ok(())
    }
}
