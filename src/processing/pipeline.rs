//! Per-unit processing: claim → extract → chunk → embed → store → complete.
//!
//! Every step after the claim is idempotent. Re-processing a unit replaces
//! its whole chunk set, so a duplicate or resumed run converges to the same
//! stored state.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;

use super::extractor::Extractor;
use super::retry::RetryPolicy;
use super::units::{ClaimMode, UnitStore};
use crate::core::errors::RagError;
use crate::embedding::EmbeddingGateway;
use crate::rag::{ChunkInput, ChunkStore, Chunker, ContentKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    Completed { chunk_count: usize },
    Failed { error: String },
    /// Another worker holds the unit, or its state does not allow the claim.
    Skipped,
    /// The unit was deleted, or swept back to `pending`, while this run held
    /// it. Nothing was recorded.
    Released,
}

pub struct ProcessingPipeline {
    units: UnitStore,
    store: Arc<dyn ChunkStore>,
    gateway: Arc<EmbeddingGateway>,
    extractor: Arc<dyn Extractor>,
    chunker: Chunker,
    retry: RetryPolicy,
}

impl ProcessingPipeline {
    pub fn new(
        units: UnitStore,
        store: Arc<dyn ChunkStore>,
        gateway: Arc<EmbeddingGateway>,
        extractor: Arc<dyn Extractor>,
        chunker: Chunker,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            units,
            store,
            gateway,
            extractor,
            chunker,
            retry,
        }
    }

    pub fn units(&self) -> &UnitStore {
        &self.units
    }

    /// Process one unit. Per-unit failures are recorded on the unit and
    /// returned as `Failed`; `Err` means the state itself could not be
    /// updated.
    pub async fn process(
        &self,
        kind: ContentKind,
        unit_id: &str,
        mode: ClaimMode,
    ) -> Result<ProcessOutcome, RagError> {
        if !self.units.claim(kind, unit_id, mode).await? {
            tracing::debug!(kind = %kind, unit_id, ?mode, "Unit not claimable; skipping");
            return Ok(ProcessOutcome::Skipped);
        }
        tracing::info!(kind = %kind, unit_id, ?mode, "Processing started");

        let error = match self.run_claimed(kind, unit_id).await {
            Ok(chunk_count) => {
                if self.units.mark_completed(kind, unit_id).await? {
                    tracing::info!(kind = %kind, unit_id, chunk_count, "Processing completed");
                    return Ok(ProcessOutcome::Completed { chunk_count });
                }
                let missing = self.store.count_missing_embeddings(kind, unit_id).await?;
                if missing == 0 {
                    return Ok(self.released(kind, unit_id, None));
                }
                format!(
                    "{} of {} stored chunks are missing embeddings",
                    missing, chunk_count
                )
            }
            Err(err) => err.to_string(),
        };

        if !self.units.mark_failed(kind, unit_id, &error).await? {
            return Ok(self.released(kind, unit_id, Some(&error)));
        }
        tracing::error!(kind = %kind, unit_id, error = %error, "Processing failed");
        Ok(ProcessOutcome::Failed { error })
    }

    fn released(&self, kind: ContentKind, unit_id: &str, error: Option<&str>) -> ProcessOutcome {
        tracing::warn!(
            kind = %kind,
            unit_id,
            error = error.unwrap_or(""),
            "Unit was deleted or released during processing; result discarded"
        );
        ProcessOutcome::Released
    }

    async fn run_claimed(&self, kind: ContentKind, unit_id: &str) -> Result<usize, RagError> {
        let unit = self
            .units
            .get(kind, unit_id)
            .await?
            .ok_or_else(|| RagError::NotFound(format!("{} {}", kind, unit_id)))?;

        let extracted = self.extractor.extract(&unit).await?;
        let units = &self.units;
        let text = extracted.full_text.as_str();
        self.with_retry(kind, unit_id, "save_text", move || async move {
            units
                .set_extracted(kind, unit_id, text, extracted.page_count)
                .await
        })
        .await?;

        let pieces = self.chunker.split(text);
        if pieces.is_empty() {
            tracing::warn!(kind = %kind, unit_id, "Extracted text is blank; unit has no chunks");
        }
        let texts: Vec<String> = pieces.iter().map(|piece| piece.text.clone()).collect();

        let gateway = &self.gateway;
        let batch = &texts;
        let vectors = self
            .with_retry(kind, unit_id, "embed", move || async move {
                gateway.embed(batch).await.map_err(RagError::from)
            })
            .await?;

        let inputs: Vec<ChunkInput> = pieces
            .into_iter()
            .zip(vectors)
            .map(|(piece, vector)| ChunkInput {
                index: piece.index,
                content: piece.text,
                embedding: Some(vector),
            })
            .collect();

        let store = &self.store;
        let inputs = &inputs;
        self.with_retry(kind, unit_id, "store", move || async move {
            store.upsert_chunks(kind, unit_id, inputs.clone()).await
        })
        .await
    }

    async fn with_retry<T, F, Fut>(
        &self,
        kind: ContentKind,
        unit_id: &str,
        step: &str,
        mut operation: F,
    ) -> Result<T, RagError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RagError>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay(attempt);
                    tracing::warn!(
                        kind = %kind,
                        unit_id,
                        step,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retryable processing failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
