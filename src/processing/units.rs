//! Content units and their processing state.
//!
//! Status transitions are conditional UPDATEs: the `WHERE` clause names the
//! states a transition may start from, and `rows_affected` tells the caller
//! whether it won. Two workers can never both move a unit into `processing`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::core::errors::RagError;
use crate::db::{now_timestamp, timestamp_before};
use crate::rag::ContentKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = RagError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(RagError::Store(format!("unknown processing status '{}'", other))),
        }
    }
}

/// Which states a claim may start from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimMode {
    /// `pending` only: the normal path for queued work.
    Fresh,
    /// `pending` or `failed`.
    Retry,
    /// Anything but `processing`, including `completed`.
    Reprocess,
}

impl ClaimMode {
    fn from_states(&self) -> &'static str {
        match self {
            ClaimMode::Fresh => "('pending')",
            ClaimMode::Retry => "('pending', 'failed')",
            ClaimMode::Reprocess => "('pending', 'failed', 'completed')",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContentUnit {
    pub id: String,
    pub kind: ContentKind,
    pub title: String,
    pub notebook_id: Option<String>,
    pub meeting_id: Option<String>,
    #[serde(skip_serializing)]
    pub full_text: Option<String>,
    pub file_path: Option<String>,
    pub page_count: Option<i64>,
    pub processing_status: ProcessingStatus,
    pub processing_error: Option<String>,
    pub processing_started_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewContentUnit {
    pub title: String,
    #[serde(default)]
    pub notebook_id: Option<String>,
    #[serde(default)]
    pub meeting_id: Option<String>,
    #[serde(default)]
    pub full_text: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
}

impl NewContentUnit {
    fn validate(&self) -> Result<(), RagError> {
        let present = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.trim().is_empty());

        if self.title.trim().is_empty() {
            return Err(RagError::InvalidInput("title must not be empty".to_string()));
        }
        if !present(&self.notebook_id) && !present(&self.meeting_id) {
            return Err(RagError::InvalidInput(
                "a unit needs a notebook_id or a meeting_id".to_string(),
            ));
        }
        if !present(&self.full_text) && !present(&self.file_path) {
            return Err(RagError::InvalidInput(
                "a unit needs full_text or a file_path".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct UnitStore {
    pool: SqlitePool,
}

impl UnitStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, kind: ContentKind, unit: NewContentUnit) -> Result<ContentUnit, RagError> {
        unit.validate()?;

        let id = uuid::Uuid::new_v4().to_string();
        let now = now_timestamp();
        sqlx::query(&format!(
            "INSERT INTO {} (id, title, notebook_id, meeting_id, full_text, file_path,
                processing_status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?7)",
            kind.units_table()
        ))
        .bind(&id)
        .bind(unit.title.trim())
        .bind(&unit.notebook_id)
        .bind(&unit.meeting_id)
        .bind(&unit.full_text)
        .bind(&unit.file_path)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        tracing::info!(kind = %kind, unit_id = %id, "Content unit registered");
        self.get(kind, &id)
            .await?
            .ok_or_else(|| RagError::Store(format!("{} {} vanished after insert", kind, id)))
    }

    pub async fn get(&self, kind: ContentKind, id: &str) -> Result<Option<ContentUnit>, RagError> {
        let row = sqlx::query(&format!(
            "SELECT id, title, notebook_id, meeting_id, full_text, file_path, page_count,
                    processing_status, processing_error, processing_started_at, created_at, updated_at
             FROM {} WHERE id = ?1",
            kind.units_table()
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| row_to_unit(kind, &row)).transpose()
    }

    /// Delete a unit; its chunks go with it.
    pub async fn delete(&self, kind: ContentKind, id: &str) -> Result<bool, RagError> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE id = ?1", kind.units_table()))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Move the unit into `processing`. Returns false when another worker
    /// holds it or its state does not allow the claim.
    pub async fn claim(&self, kind: ContentKind, id: &str, mode: ClaimMode) -> Result<bool, RagError> {
        let now = now_timestamp();
        let result = sqlx::query(&format!(
            "UPDATE {} SET processing_status = 'processing', processing_error = NULL,
                processing_started_at = ?1, updated_at = ?1
             WHERE id = ?2 AND processing_status IN {}",
            kind.units_table(),
            mode.from_states()
        ))
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn set_extracted(
        &self,
        kind: ContentKind,
        id: &str,
        full_text: &str,
        page_count: Option<i64>,
    ) -> Result<(), RagError> {
        sqlx::query(&format!(
            "UPDATE {} SET full_text = ?1, page_count = ?2, updated_at = ?3 WHERE id = ?4",
            kind.units_table()
        ))
        .bind(full_text)
        .bind(page_count)
        .bind(now_timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// `processing` → `completed`, only when every chunk carries a vector.
    pub async fn mark_completed(&self, kind: ContentKind, id: &str) -> Result<bool, RagError> {
        let result = sqlx::query(&format!(
            "UPDATE {units} SET processing_status = 'completed', processing_error = NULL,
                processing_started_at = NULL, updated_at = ?1
             WHERE id = ?2 AND processing_status = 'processing'
               AND NOT EXISTS (
                   SELECT 1 FROM {chunks} WHERE unit_id = ?2 AND embedding IS NULL
               )",
            units = kind.units_table(),
            chunks = kind.chunks_table()
        ))
        .bind(now_timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// `processing` → `failed` with the captured message.
    pub async fn mark_failed(&self, kind: ContentKind, id: &str, message: &str) -> Result<bool, RagError> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET processing_status = 'failed', processing_error = ?1,
                processing_started_at = NULL, updated_at = ?2
             WHERE id = ?3 AND processing_status = 'processing'",
            kind.units_table()
        ))
        .bind(message)
        .bind(now_timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Reset units stuck in `processing` for longer than `stale_after` back
    /// to `pending`. Returns the reset units.
    pub async fn sweep_orphans(
        &self,
        stale_after: Duration,
    ) -> Result<Vec<(ContentKind, String)>, RagError> {
        let cutoff = timestamp_before(stale_after)?;
        let now = now_timestamp();
        let mut reset = Vec::new();

        for kind in ContentKind::ALL {
            let ids: Vec<String> = sqlx::query_scalar(&format!(
                "UPDATE {} SET processing_status = 'pending', processing_started_at = NULL,
                    updated_at = ?1
                 WHERE processing_status = 'processing'
                   AND (processing_started_at IS NULL OR processing_started_at < ?2)
                 RETURNING id",
                kind.units_table()
            ))
            .bind(&now)
            .bind(&cutoff)
            .fetch_all(&self.pool)
            .await?;

            for id in ids {
                tracing::warn!(kind = %kind, unit_id = %id, "Reset orphaned processing unit");
                reset.push((kind, id));
            }
        }

        Ok(reset)
    }

    /// Pending units of one kind, oldest first.
    pub async fn pending_ids(&self, kind: ContentKind) -> Result<Vec<String>, RagError> {
        Ok(sqlx::query_scalar(&format!(
            "SELECT id FROM {} WHERE processing_status = 'pending' ORDER BY created_at, id",
            kind.units_table()
        ))
        .fetch_all(&self.pool)
        .await?)
    }
}

fn row_to_unit(kind: ContentKind, row: &SqliteRow) -> Result<ContentUnit, RagError> {
    let status: String = row.try_get("processing_status")?;
    Ok(ContentUnit {
        id: row.try_get("id")?,
        kind,
        title: row.try_get("title")?,
        notebook_id: row.try_get("notebook_id")?,
        meeting_id: row.try_get("meeting_id")?,
        full_text: row.try_get("full_text")?,
        file_path: row.try_get("file_path")?,
        page_count: row.try_get("page_count")?,
        processing_status: status.parse()?,
        processing_error: row.try_get("processing_error")?,
        processing_started_at: row.try_get("processing_started_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    fn new_source(title: &str) -> NewContentUnit {
        NewContentUnit {
            title: title.to_string(),
            notebook_id: Some("nb-1".to_string()),
            full_text: Some("Some text.".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_validates_and_starts_pending() {
        let units = UnitStore::new(test_pool().await);

        let unit = units.create(ContentKind::Source, new_source("Report")).await.unwrap();
        assert_eq!(unit.processing_status, ProcessingStatus::Pending);
        assert_eq!(unit.notebook_id.as_deref(), Some("nb-1"));

        let orphan = NewContentUnit {
            title: "No scope".into(),
            full_text: Some("x".into()),
            ..Default::default()
        };
        assert!(matches!(
            units.create(ContentKind::Source, orphan).await,
            Err(RagError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_claims_have_exactly_one_winner() {
        let units = UnitStore::new(test_pool().await);
        let unit = units.create(ContentKind::Minute, new_source("Minutes")).await.unwrap();

        let attempts = (0..8).map(|_| {
            let units = units.clone();
            let id = unit.id.clone();
            tokio::spawn(async move { units.claim(ContentKind::Minute, &id, ClaimMode::Fresh).await })
        });
        let mut winners = 0;
        for attempt in attempts {
            if attempt.await.unwrap().unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);

        let claimed = units.get(ContentKind::Minute, &unit.id).await.unwrap().unwrap();
        assert_eq!(claimed.processing_status, ProcessingStatus::Processing);
        assert!(claimed.processing_started_at.is_some());
    }

    #[tokio::test]
    async fn claim_modes_follow_the_state_machine() {
        let units = UnitStore::new(test_pool().await);
        let id = units.create(ContentKind::Source, new_source("Doc")).await.unwrap().id;
        let kind = ContentKind::Source;

        assert!(units.claim(kind, &id, ClaimMode::Fresh).await.unwrap());
        assert!(!units.claim(kind, &id, ClaimMode::Reprocess).await.unwrap());
        assert!(units.mark_failed(kind, &id, "boom").await.unwrap());

        let failed = units.get(kind, &id).await.unwrap().unwrap();
        assert_eq!(failed.processing_status, ProcessingStatus::Failed);
        assert_eq!(failed.processing_error.as_deref(), Some("boom"));

        assert!(!units.claim(kind, &id, ClaimMode::Fresh).await.unwrap());
        assert!(units.claim(kind, &id, ClaimMode::Retry).await.unwrap());
        assert!(units.mark_completed(kind, &id).await.unwrap());
        assert!(!units.claim(kind, &id, ClaimMode::Retry).await.unwrap());
        assert!(units.claim(kind, &id, ClaimMode::Reprocess).await.unwrap());
    }

    #[tokio::test]
    async fn completion_requires_every_chunk_embedded() {
        let pool = test_pool().await;
        let units = UnitStore::new(pool.clone());
        let id = units.create(ContentKind::Source, new_source("Doc")).await.unwrap().id;
        assert!(units.claim(ContentKind::Source, &id, ClaimMode::Fresh).await.unwrap());

        sqlx::query("INSERT INTO source_chunks (unit_id, chunk_index, content) VALUES (?1, 0, 'x')")
            .bind(&id)
            .execute(&pool)
            .await
            .unwrap();
        assert!(!units.mark_completed(ContentKind::Source, &id).await.unwrap());

        sqlx::query("UPDATE source_chunks SET embedding = x'0000803f' WHERE unit_id = ?1")
            .bind(&id)
            .execute(&pool)
            .await
            .unwrap();
        assert!(units.mark_completed(ContentKind::Source, &id).await.unwrap());
    }

    #[tokio::test]
    async fn sweep_resets_only_stale_processing_units() {
        let pool = test_pool().await;
        let units = UnitStore::new(pool.clone());
        let stale = units.create(ContentKind::AgendaMaterial, NewContentUnit {
            meeting_id: Some("mtg".into()),
            notebook_id: None,
            ..new_source("Stale")
        })
        .await
        .unwrap()
        .id;
        let fresh = units
            .create(ContentKind::Source, new_source("Fresh"))
            .await
            .unwrap()
            .id;

        assert!(units.claim(ContentKind::AgendaMaterial, &stale, ClaimMode::Fresh).await.unwrap());
        assert!(units.claim(ContentKind::Source, &fresh, ClaimMode::Fresh).await.unwrap());
        sqlx::query(
            "UPDATE agenda_material_units SET processing_started_at = '2000-01-01T00:00:00.000000Z'",
        )
        .execute(&pool)
        .await
        .unwrap();

        let reset = units.sweep_orphans(Duration::from_secs(600)).await.unwrap();
        assert_eq!(reset, vec![(ContentKind::AgendaMaterial, stale.clone())]);
        assert_eq!(units.pending_ids(ContentKind::AgendaMaterial).await.unwrap(), vec![stale]);
        assert!(units.pending_ids(ContentKind::Source).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_reports_whether_a_row_existed() {
        let units = UnitStore::new(test_pool().await);
        let id = units.create(ContentKind::Source, new_source("Doc")).await.unwrap().id;
        assert!(units.delete(ContentKind::Source, &id).await.unwrap());
        assert!(!units.delete(ContentKind::Source, &id).await.unwrap());
        assert!(units.get(ContentKind::Source, &id).await.unwrap().is_none());
    }
}
