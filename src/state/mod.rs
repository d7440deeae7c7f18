use std::sync::Arc;

use crate::core::config::{AppPaths, ConfigService, RagSettings};
use crate::db;
use crate::embedding::EmbeddingGateway;
use crate::generation::{GenerationOrchestrator, OpenAiChatProvider};
use crate::processing::{
    PlainTextExtractor, ProcessingPipeline, RetryPolicy, TaskQueue, TaskReceiver, UnitStore,
};
use crate::rag::{ChunkStore, Chunker, ContextRetriever, SqliteChunkStore};

pub mod error;

use error::InitializationError;

/// Application state shared across all routes and background workers.
#[derive(Clone)]
pub struct AppState {
    pub config: ConfigService,
    pub settings: Arc<RagSettings>,
    pub units: UnitStore,
    pub chunk_store: Arc<dyn ChunkStore>,
    pub gateway: Arc<EmbeddingGateway>,
    pub retriever: Arc<ContextRetriever>,
    pub pipeline: Arc<ProcessingPipeline>,
    pub queue: TaskQueue,
    /// `None` when generation is disabled in the configuration.
    pub generation: Option<Arc<GenerationOrchestrator>>,
}

impl AppState {
    /// Initializes the application state.
    ///
    /// This process includes:
    /// 1. Loading and validating configuration
    /// 2. Opening the database and checking the embedding epoch
    /// 3. Wiring the retriever, the processing pipeline and its queue
    ///
    /// The returned receiver feeds the worker pool.
    pub async fn initialize(
        paths: Arc<AppPaths>,
    ) -> Result<(Arc<Self>, TaskReceiver), InitializationError> {
        let config = ConfigService::new(paths.clone());
        let settings = config
            .load_settings()
            .map_err(|e| InitializationError::Config(e.into()))?;
        Self::build(paths, config, settings).await
    }

    pub async fn build(
        paths: Arc<AppPaths>,
        config: ConfigService,
        settings: RagSettings,
    ) -> Result<(Arc<Self>, TaskReceiver), InitializationError> {
        let pool = db::connect(&paths.db_path)
            .await
            .map_err(|e| InitializationError::Database(e.into()))?;

        let gateway = Arc::new(
            EmbeddingGateway::from_settings(&settings.embedding)
                .map_err(|e| InitializationError::Embedding(e.into()))?,
        );

        let chunk_store: Arc<dyn ChunkStore> =
            Arc::new(SqliteChunkStore::new(pool.clone(), settings.embedding.dimension));
        let reset = chunk_store
            .ensure_embedding_epoch(gateway.model(), gateway.dimension())
            .await
            .map_err(|e| InitializationError::Database(e.into()))?;
        if reset > 0 {
            tracing::warn!(units = reset, "Units queued for re-embedding");
        }

        let chunker = Chunker::from_settings(&settings.chunking)
            .map_err(|e| InitializationError::Config(e.into()))?;

        let retriever = Arc::new(ContextRetriever::new(
            chunk_store.clone(),
            gateway.clone(),
            settings.retrieval.clone(),
            chunker.overlap(),
        ));

        let units = UnitStore::new(pool.clone());
        let pipeline = Arc::new(ProcessingPipeline::new(
            units.clone(),
            chunk_store.clone(),
            gateway.clone(),
            Arc::new(PlainTextExtractor),
            chunker,
            RetryPolicy::from_settings(&settings.processing),
        ));
        let (queue, receiver) = TaskQueue::new();

        let generation = if settings.generation.enabled {
            let provider = Arc::new(OpenAiChatProvider::new(&settings.generation));
            tracing::info!(model = %settings.generation.model, "Answer generation enabled");
            Some(Arc::new(GenerationOrchestrator::new(provider)))
        } else {
            None
        };

        let state = Arc::new(AppState {
            config,
            settings: Arc::new(settings),
            units,
            chunk_store,
            gateway,
            retriever,
            pipeline,
            queue,
            generation,
        });
        Ok((state, receiver))
    }
}
