use std::env;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;

use notebook_rag::core::config::AppPaths;
use notebook_rag::core::logging;
use notebook_rag::processing::{Supervisor, WorkerPool};
use notebook_rag::server;
use notebook_rag::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let paths = Arc::new(AppPaths::new());
    logging::init(&paths);

    let (state, receiver) = AppState::initialize(paths).await?;

    let settings = state.settings.clone();
    let workers = WorkerPool::spawn(state.pipeline.clone(), receiver, settings.processing.workers);

    let supervisor = Supervisor::new(
        state.units.clone(),
        state.queue.clone(),
        settings.processing.stale_after,
    );
    if let Err(err) = supervisor.recover().await {
        tracing::warn!("Failed to recover interrupted processing: {}", err);
    }
    let sweeper = supervisor.spawn_periodic(settings.processing.sweep_interval);

    let port = env::var("PORT")
        .ok()
        .and_then(|val| val.parse::<u16>().ok())
        .unwrap_or(settings.server.port);
    let bind_addr = format!("{}:{}", settings.server.host, port);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    let addr = listener.local_addr()?;

    println!("NOTEBOOK_RAG_PORT={}", addr.port());
    tracing::info!("Listening on {}", addr);

    let app: Router = server::router::router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    sweeper.abort();
    workers.abort();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
