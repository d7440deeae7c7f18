//! In-process task queue feeding the worker pool.
//!
//! Delivery is at-least-once from the caller's point of view: the same unit
//! may be enqueued several times (upload, retry, supervisor recovery) and the
//! claim in the pipeline turns the extra deliveries into no-ops.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};

use super::units::ClaimMode;
use crate::core::errors::RagError;
use crate::rag::ContentKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingTask {
    pub task_id: String,
    pub kind: ContentKind,
    pub unit_id: String,
    pub mode: ClaimMode,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskHandle {
    pub task_id: String,
    pub kind: ContentKind,
    pub unit_id: String,
}

#[derive(Clone)]
pub struct TaskQueue {
    sender: mpsc::UnboundedSender<ProcessingTask>,
}

/// Receiving side, shared by every worker of the pool.
#[derive(Clone)]
pub struct TaskReceiver {
    inner: Arc<Mutex<mpsc::UnboundedReceiver<ProcessingTask>>>,
}

impl TaskReceiver {
    /// Next task, or `None` once every queue handle is dropped and the
    /// backlog is drained.
    pub async fn recv(&self) -> Option<ProcessingTask> {
        self.inner.lock().await.recv().await
    }
}

impl TaskQueue {
    pub fn new() -> (Self, TaskReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self { sender },
            TaskReceiver {
                inner: Arc::new(Mutex::new(receiver)),
            },
        )
    }

    pub fn enqueue(
        &self,
        kind: ContentKind,
        unit_id: &str,
        mode: ClaimMode,
    ) -> Result<TaskHandle, RagError> {
        let task = ProcessingTask {
            task_id: uuid::Uuid::new_v4().to_string(),
            kind,
            unit_id: unit_id.to_string(),
            mode,
        };
        let handle = TaskHandle {
            task_id: task.task_id.clone(),
            kind,
            unit_id: task.unit_id.clone(),
        };

        self.sender
            .send(task)
            .map_err(|_| RagError::Store("processing queue is closed".to_string()))?;
        tracing::debug!(task_id = %handle.task_id, kind = %kind, unit_id, ?mode, "Task enqueued");
        Ok(handle)
    }
}
