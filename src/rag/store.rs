//! ChunkStore trait: storage and search interface for content-unit chunks.
//!
//! The primary implementation is `SqliteChunkStore` in the `sqlite` module.
//! The store is not an authorization boundary: callers validate the scope,
//! and the store must never search outside of it.

use async_trait::async_trait;

use super::types::{ChunkInput, CollectionScope, ContentKind, ScoredChunk};
use crate::core::errors::RagError;

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Replace every chunk of a content unit in one transaction.
    ///
    /// Indices must be exactly `0..chunks.len()`; vectors must match the
    /// configured dimension.
    async fn upsert_chunks(
        &self,
        kind: ContentKind,
        unit_id: &str,
        chunks: Vec<ChunkInput>,
    ) -> Result<usize, RagError>;

    /// Top `k` chunks by cosine similarity to `query_embedding`.
    async fn similarity_search(
        &self,
        query_embedding: &[f32],
        scope: &CollectionScope,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, RagError>;

    /// Top `k` chunks by query-term overlap, scored in [0, 1].
    async fn lexical_search(
        &self,
        query: &str,
        scope: &CollectionScope,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, RagError>;

    /// Chunk count for one unit.
    async fn count_chunks(&self, kind: ContentKind, unit_id: &str) -> Result<usize, RagError>;

    /// Chunks of a unit still lacking an embedding.
    async fn count_missing_embeddings(
        &self,
        kind: ContentKind,
        unit_id: &str,
    ) -> Result<usize, RagError>;

    /// Compare the stored embedding epoch against the configured one.
    ///
    /// When the dimension or model changed, every stored vector is invalid:
    /// all chunks are dropped and all units go back to `pending`. Returns the
    /// number of units reset.
    async fn ensure_embedding_epoch(&self, model: &str, dimension: usize) -> Result<usize, RagError>;
}
