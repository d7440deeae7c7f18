use thiserror::Error;

#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("Failed to load configuration: {0}")]
    Config(#[source] anyhow::Error),

    #[error("Failed to initialize database: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Failed to initialize embedding gateway: {0}")]
    Embedding(#[source] anyhow::Error),
}
