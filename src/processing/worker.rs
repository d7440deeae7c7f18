//! Worker pool draining the task queue, and the supervisor that recovers
//! orphaned units at startup and on a fixed interval afterwards.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::pipeline::{ProcessOutcome, ProcessingPipeline};
use super::queue::{TaskQueue, TaskReceiver};
use super::units::{ClaimMode, UnitStore};
use crate::core::errors::RagError;
use crate::rag::ContentKind;

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` tasks sharing `receiver`. Each processes one unit at a time.
    pub fn spawn(pipeline: Arc<ProcessingPipeline>, receiver: TaskReceiver, workers: usize) -> Self {
        let workers = workers.max(1);
        let handles = (0..workers)
            .map(|worker_id| {
                let pipeline = pipeline.clone();
                let receiver = receiver.clone();
                tokio::spawn(async move {
                    while let Some(task) = receiver.recv().await {
                        let outcome = pipeline.process(task.kind, &task.unit_id, task.mode).await;
                        match outcome {
                            Ok(ProcessOutcome::Completed { chunk_count }) => tracing::debug!(
                                worker_id,
                                task_id = %task.task_id,
                                chunk_count,
                                "Task finished"
                            ),
                            Ok(ProcessOutcome::Failed { error }) => tracing::warn!(
                                worker_id,
                                task_id = %task.task_id,
                                error = %error,
                                "Task finished with a failed unit"
                            ),
                            Ok(ProcessOutcome::Skipped) => tracing::debug!(
                                worker_id,
                                task_id = %task.task_id,
                                "Task skipped"
                            ),
                            Ok(ProcessOutcome::Released) => tracing::debug!(
                                worker_id,
                                task_id = %task.task_id,
                                "Task released its unit"
                            ),
                            Err(err) => tracing::error!(
                                worker_id,
                                task_id = %task.task_id,
                                kind = %task.kind,
                                unit_id = %task.unit_id,
                                error = %err,
                                "Task could not update unit state"
                            ),
                        }
                    }
                    tracing::debug!(worker_id, "Processing worker stopped");
                })
            })
            .collect();

        tracing::info!(workers, "Processing worker pool started");
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to exit. Workers exit once all queue handles
    /// are dropped and the backlog is drained.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "Processing worker panicked");
            }
        }
    }

    pub fn abort(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    pub orphans_reset: usize,
    pub enqueued: usize,
}

/// Crash recovery: reset stale `processing` units and queue them again.
pub struct Supervisor {
    units: UnitStore,
    queue: TaskQueue,
    stale_after: Duration,
}

impl Supervisor {
    pub fn new(units: UnitStore, queue: TaskQueue, stale_after: Duration) -> Self {
        Self {
            units,
            queue,
            stale_after,
        }
    }

    /// Startup pass: sweep orphans, then queue every pending unit.
    pub async fn recover(&self) -> Result<RecoveryReport, RagError> {
        let orphans = self.units.sweep_orphans(self.stale_after).await?;

        let mut enqueued = 0;
        for kind in ContentKind::ALL {
            for unit_id in self.units.pending_ids(kind).await? {
                self.queue.enqueue(kind, &unit_id, ClaimMode::Fresh)?;
                enqueued += 1;
            }
        }

        let report = RecoveryReport {
            orphans_reset: orphans.len(),
            enqueued,
        };
        tracing::info!(
            orphans_reset = report.orphans_reset,
            enqueued = report.enqueued,
            "Processing recovery finished"
        );
        Ok(report)
    }

    /// Reset stale `processing` units and queue exactly those units.
    pub async fn sweep(&self) -> Result<RecoveryReport, RagError> {
        let orphans = self.units.sweep_orphans(self.stale_after).await?;
        for (kind, unit_id) in &orphans {
            self.queue.enqueue(*kind, unit_id, ClaimMode::Fresh)?;
        }
        Ok(RecoveryReport {
            orphans_reset: orphans.len(),
            enqueued: orphans.len(),
        })
    }

    /// Run `sweep` every `every` until the returned task is aborted. The
    /// first sweep happens one interval after the call.
    pub fn spawn_periodic(self, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.sweep().await {
                    Ok(report) if report.orphans_reset > 0 => tracing::info!(
                        orphans_reset = report.orphans_reset,
                        "Periodic orphan sweep requeued units"
                    ),
                    Ok(_) => {}
                    Err(err) => tracing::warn!(error = %err, "Periodic orphan sweep failed"),
                }
            }
        })
    }
}
