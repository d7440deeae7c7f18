//! RAG (Retrieval-Augmented Generation) module.
//!
//! This module provides:
//! - `Chunker`: splits extracted text into overlapping chunks
//! - `ChunkStore` / `SqliteChunkStore`: scoped chunk persistence and search
//! - `ContextRetriever`: builds a ranked, size-bounded `ContextBundle` for a question

pub mod chunker;
pub mod lexical;
pub mod retriever;
pub mod sqlite;
pub mod store;
pub mod types;

pub use chunker::{chunk_text, Chunker, TextChunk};
pub use retriever::{
    ContextBundle, ContextExcerpt, ContextRetriever, Provenance, RetrievalResult,
    RetrieveOptions, ScopeDescriptor,
};
pub use sqlite::SqliteChunkStore;
pub use store::ChunkStore;
pub use types::{ChunkInput, CollectionScope, ContentKind, ScoredChunk, StoredChunk};
