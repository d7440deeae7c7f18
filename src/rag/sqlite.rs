//! SQLite-backed chunk store.
//!
//! Chunks live in one table per content kind. Similarity search is a
//! brute-force cosine scan over the scoped rows; lexical search scores the
//! same rows by query-term overlap.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use super::lexical::{overlap_score, query_terms};
use super::store::ChunkStore;
use super::types::{ChunkInput, CollectionScope, ContentKind, ScoredChunk, StoredChunk};
use crate::core::errors::{EmbeddingError, RagError};
use crate::db::{deserialize_embedding, now_timestamp, serialize_embedding};
use crate::vector_math::cosine_similarity;

const META_EMBEDDING_DIM: &str = "embedding_dim";
const META_EMBEDDING_MODEL: &str = "embedding_model";

#[derive(Clone)]
pub struct SqliteChunkStore {
    pool: SqlitePool,
    embedding_dim: usize,
}

impl SqliteChunkStore {
    pub fn new(pool: SqlitePool, embedding_dim: usize) -> Self {
        Self {
            pool,
            embedding_dim,
        }
    }

    /// Rows of `scope`, joined with their unit. Every scope filter is applied.
    async fn fetch_scoped(
        &self,
        scope: &CollectionScope,
        with_embedding: bool,
    ) -> Result<Vec<SqliteRow>, RagError> {
        let chunks = scope.kind.chunks_table();
        let units = scope.kind.units_table();
        let embedding_column = if with_embedding { ", c.embedding" } else { "" };

        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT c.id, c.unit_id, c.chunk_index, c.content, u.title, u.created_at{embedding_column}
             FROM {chunks} c
             JOIN {units} u ON u.id = c.unit_id
             WHERE 1 = 1"
        ));

        if with_embedding {
            query.push(" AND c.embedding IS NOT NULL");
        }
        if let Some(notebook_id) = &scope.notebook_id {
            query.push(" AND u.notebook_id = ").push_bind(notebook_id.clone());
        }
        if let Some(meeting_id) = &scope.meeting_id {
            query.push(" AND u.meeting_id = ").push_bind(meeting_id.clone());
        }
        if let Some(unit_ids) = &scope.unit_ids {
            query.push(" AND u.id IN (");
            let mut ids = query.separated(", ");
            for unit_id in unit_ids {
                ids.push_bind(unit_id.clone());
            }
            ids.push_unseparated(")");
        }

        Ok(query.build().fetch_all(&self.pool).await?)
    }

    fn row_to_chunk(kind: ContentKind, row: &SqliteRow) -> Result<StoredChunk, RagError> {
        Ok(StoredChunk {
            chunk_id: row.try_get("id")?,
            kind,
            unit_id: row.try_get("unit_id")?,
            chunk_index: row.try_get::<i64, _>("chunk_index")? as usize,
            content: row.try_get("content")?,
            unit_title: row.try_get("title")?,
            unit_created_at: row.try_get("created_at")?,
        })
    }

    /// Score descending, then newest unit, then chunk position.
    fn rank(results: &mut Vec<ScoredChunk>, k: usize) {
        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.chunk.unit_created_at.cmp(&a.chunk.unit_created_at))
                .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
                .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
        });
        results.truncate(k);
    }

    async fn read_meta(&self, key: &str) -> Result<Option<String>, RagError> {
        Ok(
            sqlx::query_scalar("SELECT value FROM rag_meta WHERE key = ?1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn count_foreign_vectors(&self, dimension: usize) -> Result<i64, RagError> {
        let mut total = 0;
        for kind in ContentKind::ALL {
            let count: i64 = sqlx::query_scalar(&format!(
                "SELECT COUNT(*) FROM {} WHERE embedding IS NOT NULL AND length(embedding) != ?1",
                kind.chunks_table()
            ))
            .bind((dimension * 4) as i64)
            .fetch_one(&self.pool)
            .await?;
            total += count;
        }
        Ok(total)
    }
}

#[async_trait]
impl ChunkStore for SqliteChunkStore {
    async fn upsert_chunks(
        &self,
        kind: ContentKind,
        unit_id: &str,
        chunks: Vec<ChunkInput>,
    ) -> Result<usize, RagError> {
        for (position, chunk) in chunks.iter().enumerate() {
            if chunk.index != position {
                return Err(RagError::InvalidInput(format!(
                    "chunk indices for {} {} must be contiguous from 0; found {} at position {}",
                    kind, unit_id, chunk.index, position
                )));
            }
            if let Some(embedding) = &chunk.embedding {
                if embedding.len() != self.embedding_dim {
                    return Err(EmbeddingError::DimensionMismatch {
                        expected: self.embedding_dim,
                        actual: embedding.len(),
                    }
                    .into());
                }
            }
        }

        let mut tx = self.pool.begin().await?;

        let exists: Option<i64> =
            sqlx::query_scalar(&format!("SELECT 1 FROM {} WHERE id = ?1", kind.units_table()))
                .bind(unit_id)
                .fetch_optional(&mut *tx)
                .await?;
        if exists.is_none() {
            return Err(RagError::NotFound(format!("{} {}", kind, unit_id)));
        }

        sqlx::query(&format!("DELETE FROM {} WHERE unit_id = ?1", kind.chunks_table()))
            .bind(unit_id)
            .execute(&mut *tx)
            .await?;

        let insert = format!(
            "INSERT INTO {} (unit_id, chunk_index, content, embedding) VALUES (?1, ?2, ?3, ?4)",
            kind.chunks_table()
        );
        for chunk in &chunks {
            let blob = chunk.embedding.as_deref().map(serialize_embedding);
            sqlx::query(&insert)
                .bind(unit_id)
                .bind(chunk.index as i64)
                .bind(&chunk.content)
                .bind(blob)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(chunks.len())
    }

    async fn similarity_search(
        &self,
        query_embedding: &[f32],
        scope: &CollectionScope,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, RagError> {
        if k == 0 || scope.is_empty() || query_embedding.is_empty() {
            return Ok(Vec::new());
        }

        let rows = self.fetch_scoped(scope, true).await?;
        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let bytes: Vec<u8> = row.try_get("embedding")?;
            let stored = deserialize_embedding(&bytes);
            if stored.len() != query_embedding.len() {
                tracing::warn!(
                    kind = %scope.kind,
                    expected = query_embedding.len(),
                    actual = stored.len(),
                    "Skipping chunk with foreign embedding dimension"
                );
                continue;
            }
            scored.push(ScoredChunk {
                chunk: Self::row_to_chunk(scope.kind, row)?,
                score: cosine_similarity(query_embedding, &stored),
            });
        }

        Self::rank(&mut scored, k);
        Ok(scored)
    }

    async fn lexical_search(
        &self,
        query: &str,
        scope: &CollectionScope,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, RagError> {
        let terms = query_terms(query);
        if k == 0 || scope.is_empty() || terms.is_empty() {
            return Ok(Vec::new());
        }

        let rows = self.fetch_scoped(scope, false).await?;
        let mut scored = Vec::new();
        for row in &rows {
            let chunk = Self::row_to_chunk(scope.kind, row)?;
            let score = overlap_score(&terms, &chunk.content);
            if score > 0.0 {
                scored.push(ScoredChunk { chunk, score });
            }
        }

        Self::rank(&mut scored, k);
        Ok(scored)
    }

    async fn count_chunks(&self, kind: ContentKind, unit_id: &str) -> Result<usize, RagError> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {} WHERE unit_id = ?1",
            kind.chunks_table()
        ))
        .bind(unit_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as usize)
    }

    async fn count_missing_embeddings(
        &self,
        kind: ContentKind,
        unit_id: &str,
    ) -> Result<usize, RagError> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {} WHERE unit_id = ?1 AND embedding IS NULL",
            kind.chunks_table()
        ))
        .bind(unit_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as usize)
    }

    async fn ensure_embedding_epoch(&self, model: &str, dimension: usize) -> Result<usize, RagError> {
        let stored_dim = self
            .read_meta(META_EMBEDDING_DIM)
            .await?
            .and_then(|value| value.parse::<usize>().ok());
        let stored_model = self.read_meta(META_EMBEDDING_MODEL).await?;

        let changed = match (stored_dim, stored_model.as_deref()) {
            (Some(dim), Some(previous)) => dim != dimension || previous != model,
            (Some(dim), None) => dim != dimension,
            _ => self.count_foreign_vectors(dimension).await? > 0,
        };

        let mut tx = self.pool.begin().await?;
        let mut reset = 0;

        if changed {
            let now = now_timestamp();
            for kind in ContentKind::ALL {
                sqlx::query(&format!("DELETE FROM {}", kind.chunks_table()))
                    .execute(&mut *tx)
                    .await?;
                let result = sqlx::query(&format!(
                    "UPDATE {} SET processing_status = 'pending', processing_error = NULL,
                        processing_started_at = NULL, updated_at = ?1
                     WHERE processing_status != 'pending'",
                    kind.units_table()
                ))
                .bind(&now)
                .execute(&mut *tx)
                .await?;
                reset += result.rows_affected() as usize;
            }
            tracing::warn!(
                previous_dimension = ?stored_dim,
                previous_model = ?stored_model,
                dimension,
                model,
                units_reset = reset,
                "Embedding epoch changed; stored vectors dropped for re-embedding"
            );
        }

        for (key, value) in [
            (META_EMBEDDING_DIM, dimension.to_string()),
            (META_EMBEDDING_MODEL, model.to_string()),
        ] {
            sqlx::query(
                "INSERT OR REPLACE INTO rag_meta (key, value, updated_at)
                 VALUES (?1, ?2, STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))",
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(reset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{insert_test_unit, test_pool};

    async fn test_store() -> SqliteChunkStore {
        SqliteChunkStore::new(test_pool().await, 3)
    }

    async fn insert_unit(
        store: &SqliteChunkStore,
        kind: ContentKind,
        id: &str,
        notebook_id: Option<&str>,
        meeting_id: Option<&str>,
        created_at: &str,
    ) {
        insert_test_unit(&store.pool, kind, id, notebook_id, meeting_id, created_at).await;
    }

    fn chunk(index: usize, content: &str, embedding: Option<Vec<f32>>) -> ChunkInput {
        ChunkInput {
            index,
            content: content.to_string(),
            embedding,
        }
    }

    #[tokio::test]
    async fn upsert_then_search_returns_self() {
        let store = test_store().await;
        insert_unit(&store, ContentKind::Source, "s1", Some("nb"), None, "2024-01-01T00:00:00.000000Z").await;

        let vector = vec![0.2, 0.7, 0.1];
        store
            .upsert_chunks(ContentKind::Source, "s1", vec![chunk(0, "Hello world", Some(vector.clone()))])
            .await
            .unwrap();

        let scope = CollectionScope::notebook(ContentKind::Source, "nb");
        let results = store.similarity_search(&vector, &scope, 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.unit_id, "s1");
        assert_eq!(results[0].chunk.unit_title, "Title of s1");
        assert!(results[0].score > 0.99);
    }

    #[tokio::test]
    async fn upsert_replaces_the_whole_set() {
        let store = test_store().await;
        insert_unit(&store, ContentKind::Minute, "m1", Some("nb"), None, "2024-01-01T00:00:00.000000Z").await;

        let first = (0..3)
            .map(|i| chunk(i, &format!("old {i}"), Some(vec![1.0, 0.0, 0.0])))
            .collect();
        store.upsert_chunks(ContentKind::Minute, "m1", first).await.unwrap();
        let second = (0..2)
            .map(|i| chunk(i, &format!("new {i}"), Some(vec![1.0, 0.0, 0.0])))
            .collect();
        store.upsert_chunks(ContentKind::Minute, "m1", second).await.unwrap();

        assert_eq!(store.count_chunks(ContentKind::Minute, "m1").await.unwrap(), 2);
        let scope = CollectionScope::units(ContentKind::Minute, vec!["m1".into()]);
        let results = store.similarity_search(&[1.0, 0.0, 0.0], &scope, 10).await.unwrap();
        let contents: Vec<_> = results.iter().map(|r| r.chunk.content.as_str()).collect();
        assert_eq!(contents, vec!["new 0", "new 1"]);
    }

    #[tokio::test]
    async fn rejected_upsert_leaves_existing_chunks() {
        let store = test_store().await;
        insert_unit(&store, ContentKind::Source, "s1", Some("nb"), None, "2024-01-01T00:00:00.000000Z").await;
        store
            .upsert_chunks(ContentKind::Source, "s1", vec![chunk(0, "kept", Some(vec![1.0, 0.0, 0.0]))])
            .await
            .unwrap();

        let gap = store
            .upsert_chunks(
                ContentKind::Source,
                "s1",
                vec![chunk(0, "a", None), chunk(2, "c", None)],
            )
            .await;
        assert!(matches!(gap, Err(RagError::InvalidInput(_))));

        let wrong_dim = store
            .upsert_chunks(ContentKind::Source, "s1", vec![chunk(0, "a", Some(vec![1.0; 5]))])
            .await;
        assert!(matches!(
            wrong_dim,
            Err(RagError::Embedding(EmbeddingError::DimensionMismatch { expected: 3, actual: 5 }))
        ));

        let missing = store
            .upsert_chunks(ContentKind::Source, "ghost", vec![chunk(0, "a", None)])
            .await;
        assert!(matches!(missing, Err(RagError::NotFound(_))));

        assert_eq!(store.count_chunks(ContentKind::Source, "s1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn search_never_leaves_the_scope() {
        let store = test_store().await;
        let ts = "2024-01-01T00:00:00.000000Z";
        insert_unit(&store, ContentKind::Source, "a1", Some("nb-a"), None, ts).await;
        insert_unit(&store, ContentKind::Source, "a2", Some("nb-a"), None, ts).await;
        insert_unit(&store, ContentKind::Source, "b1", Some("nb-b"), None, ts).await;
        for id in ["a1", "a2", "b1"] {
            store
                .upsert_chunks(
                    ContentKind::Source,
                    id,
                    vec![chunk(0, &format!("budget for {id}"), Some(vec![1.0, 0.0, 0.0]))],
                )
                .await
                .unwrap();
        }

        let notebook = CollectionScope::notebook(ContentKind::Source, "nb-a");
        let ids: Vec<_> = store
            .similarity_search(&[1.0, 0.0, 0.0], &notebook, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.chunk.unit_id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(!ids.contains(&"b1".to_string()));

        let subset = notebook.clone().with_unit_ids(vec!["a2".into(), "b1".into()]);
        let ids: Vec<_> = store
            .lexical_search("budget", &subset, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.chunk.unit_id)
            .collect();
        assert_eq!(ids, vec!["a2"]);

        let empty = notebook.with_unit_ids(vec![]);
        assert!(store.similarity_search(&[1.0, 0.0, 0.0], &empty, 10).await.unwrap().is_empty());

        let meetings = CollectionScope::meeting(ContentKind::Source, "nb-a");
        assert!(store.lexical_search("budget", &meetings, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ties_prefer_newest_unit_then_lowest_index() {
        let store = test_store().await;
        insert_unit(&store, ContentKind::Source, "old", Some("nb"), None, "2023-05-01T00:00:00.000000Z").await;
        insert_unit(&store, ContentKind::Source, "new", Some("nb"), None, "2024-05-01T00:00:00.000000Z").await;
        let same = Some(vec![0.0, 1.0, 0.0]);
        store
            .upsert_chunks(ContentKind::Source, "old", vec![chunk(0, "o0", same.clone())])
            .await
            .unwrap();
        store
            .upsert_chunks(
                ContentKind::Source,
                "new",
                vec![chunk(0, "n0", same.clone()), chunk(1, "n1", same.clone())],
            )
            .await
            .unwrap();

        let scope = CollectionScope::notebook(ContentKind::Source, "nb");
        let order: Vec<_> = store
            .similarity_search(&[0.0, 1.0, 0.0], &scope, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.chunk.content)
            .collect();
        assert_eq!(order, vec!["n0", "n1", "o0"]);

        let top = store.similarity_search(&[0.0, 1.0, 0.0], &scope, 1).await.unwrap();
        assert_eq!(top.len(), 1);
    }

    #[tokio::test]
    async fn lexical_search_scores_term_overlap() {
        let store = test_store().await;
        insert_unit(&store, ContentKind::AgendaMaterial, "mat", None, Some("mtg"), "2024-01-01T00:00:00.000000Z").await;
        store
            .upsert_chunks(
                ContentKind::AgendaMaterial,
                "mat",
                vec![
                    chunk(0, "Park maintenance schedule", None),
                    chunk(1, "The park budget was approved", None),
                    chunk(2, "Unrelated traffic item", None),
                ],
            )
            .await
            .unwrap();

        let scope = CollectionScope::meeting(ContentKind::AgendaMaterial, "mtg");
        let results = store.lexical_search("park budget", &scope, 10).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.chunk_index, 1);
        assert!((results[0].score - 1.0).abs() < f32::EPSILON);
        assert!((results[1].score - 0.5).abs() < f32::EPSILON);

        // Chunks without vectors are invisible to similarity search.
        assert!(store.similarity_search(&[1.0, 0.0, 0.0], &scope, 10).await.unwrap().is_empty());
        assert_eq!(
            store.count_missing_embeddings(ContentKind::AgendaMaterial, "mat").await.unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn lexical_search_matches_inside_japanese_sentences() {
        let store = test_store().await;
        insert_unit(&store, ContentKind::Minute, "m1", None, Some("mtg"), "2024-01-01T00:00:00.000000Z").await;
        store
            .upsert_chunks(
                ContentKind::Minute,
                "m1",
                vec![
                    chunk(0, "開会の宣言があった。", None),
                    chunk(1, "今年度の予算について審議した。", None),
                ],
            )
            .await
            .unwrap();

        let scope = CollectionScope::meeting(ContentKind::Minute, "mtg");
        let results = store.lexical_search("予算", &scope, 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.chunk_index, 1);
        assert!(results[0].score > 0.0);
    }

    #[tokio::test]
    async fn deleting_a_unit_cascades_to_chunks() {
        let store = test_store().await;
        insert_unit(&store, ContentKind::Source, "s1", Some("nb"), None, "2024-01-01T00:00:00.000000Z").await;
        store
            .upsert_chunks(ContentKind::Source, "s1", vec![chunk(0, "x", None), chunk(1, "y", None)])
            .await
            .unwrap();

        sqlx::query("DELETE FROM source_units WHERE id = 's1'")
            .execute(&store.pool)
            .await
            .unwrap();
        assert_eq!(store.count_chunks(ContentKind::Source, "s1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn dimension_change_starts_a_new_epoch() {
        let store = test_store().await;
        insert_unit(&store, ContentKind::Source, "s1", Some("nb"), None, "2024-01-01T00:00:00.000000Z").await;
        store
            .upsert_chunks(ContentKind::Source, "s1", vec![chunk(0, "x", Some(vec![1.0, 0.0, 0.0]))])
            .await
            .unwrap();

        assert_eq!(store.ensure_embedding_epoch("embed-a", 3).await.unwrap(), 0);
        assert_eq!(store.ensure_embedding_epoch("embed-a", 3).await.unwrap(), 0);
        assert_eq!(store.count_chunks(ContentKind::Source, "s1").await.unwrap(), 1);

        assert_eq!(store.ensure_embedding_epoch("embed-a", 768).await.unwrap(), 1);
        assert_eq!(store.count_chunks(ContentKind::Source, "s1").await.unwrap(), 0);
        let status: String =
            sqlx::query_scalar("SELECT processing_status FROM source_units WHERE id = 's1'")
                .fetch_one(&store.pool)
                .await
                .unwrap();
        assert_eq!(status, "pending");
    }

    #[tokio::test]
    async fn unrecorded_epoch_with_foreign_vectors_is_reset() {
        let store = test_store().await;
        insert_unit(&store, ContentKind::Minute, "m1", Some("nb"), None, "2024-01-01T00:00:00.000000Z").await;
        store
            .upsert_chunks(ContentKind::Minute, "m1", vec![chunk(0, "x", Some(vec![1.0, 0.0, 0.0]))])
            .await
            .unwrap();

        let wider = SqliteChunkStore::new(store.pool.clone(), 1536);
        assert_eq!(wider.ensure_embedding_epoch("embed-b", 1536).await.unwrap(), 1);
        assert_eq!(wider.count_chunks(ContentKind::Minute, "m1").await.unwrap(), 0);
    }
}
