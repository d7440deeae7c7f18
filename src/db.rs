//! SQLite pool setup and schema for content units and their chunks.

use std::path::Path;

use chrono::{SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;

use crate::core::errors::RagError;
use crate::rag::ContentKind;

pub async fn connect(db_path: &Path) -> Result<SqlitePool, RagError> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .min_connections(1)
        .max_connections(4)
        .connect_with(options)
        .await
        .map_err(|e| RagError::Store(format!("Failed to open database: {}", e)))?;

    init_schema(&pool).await?;
    Ok(pool)
}

pub async fn init_schema(pool: &SqlitePool) -> Result<(), RagError> {
    for kind in ContentKind::ALL {
        let units = kind.units_table();
        let chunks = kind.chunks_table();

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {units} (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                notebook_id TEXT,
                meeting_id TEXT,
                full_text TEXT,
                file_path TEXT,
                page_count INTEGER,
                processing_status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (processing_status IN ('pending', 'processing', 'completed', 'failed')),
                processing_error TEXT,
                processing_started_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"
        ))
        .execute(pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{units}_notebook ON {units}(notebook_id)"
        ))
        .execute(pool)
        .await?;
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{units}_meeting ON {units}(meeting_id)"
        ))
        .execute(pool)
        .await?;
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{units}_status ON {units}(processing_status)"
        ))
        .execute(pool)
        .await?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {chunks} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                unit_id TEXT NOT NULL REFERENCES {units}(id) ON DELETE CASCADE,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
                UNIQUE (unit_id, chunk_index)
            )"
        ))
        .execute(pool)
        .await?;
    }

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS rag_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
        )",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Fixed-width UTC timestamp, so stored values sort lexicographically.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Timestamp `age` before now, in the same format as [`now_timestamp`].
pub fn timestamp_before(age: std::time::Duration) -> Result<String, RagError> {
    let age = chrono::Duration::from_std(age)
        .map_err(|e| RagError::Configuration(format!("duration out of range: {}", e)))?;
    Ok((Utc::now() - age).to_rfc3339_opts(SecondsFormat::Micros, true))
}

pub fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let tmp = std::env::temp_dir().join(format!("notebook-rag-test-{}.db", uuid::Uuid::new_v4()));
    connect(&tmp).await.unwrap()
}

/// Insert a completed unit row directly, bypassing the processing pipeline.
#[cfg(test)]
pub(crate) async fn insert_test_unit(
    pool: &SqlitePool,
    kind: ContentKind,
    id: &str,
    notebook_id: Option<&str>,
    meeting_id: Option<&str>,
    created_at: &str,
) {
    sqlx::query(&format!(
        "INSERT INTO {} (id, title, notebook_id, meeting_id, processing_status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'completed', ?5, ?5)",
        kind.units_table()
    ))
    .bind(id)
    .bind(format!("Title of {id}"))
    .bind(notebook_id)
    .bind(meeting_id)
    .bind(created_at)
    .execute(pool)
    .await
    .unwrap();
}
