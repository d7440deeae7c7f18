//! Background processing of content units into embedded chunks.

pub mod extractor;
pub mod pipeline;
pub mod queue;
pub mod retry;
pub mod units;
pub mod worker;

pub use extractor::{Extracted, Extractor, PlainTextExtractor};
pub use pipeline::{ProcessOutcome, ProcessingPipeline};
pub use queue::{ProcessingTask, TaskHandle, TaskQueue, TaskReceiver};
pub use retry::RetryPolicy;
pub use units::{ClaimMode, ContentUnit, NewContentUnit, ProcessingStatus, UnitStore};
pub use worker::{RecoveryReport, Supervisor, WorkerPool};
