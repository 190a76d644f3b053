//! Standalone worker process draining the durable queues.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use studiora_db::Database;
use studiora_jobs::{
    CheckInEvaluationHandler, HandlerRegistry, HttpGenerationProvider, LessonGenerationHandler,
    MaterialUploadHandler, ParagraphIngestor, WorkerConfig, WorkerPool,
};
use studiora_limits::ResultCache;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "studiora_jobs=debug,studiora_db=info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/studiora".to_string());
    let db = Database::connect(&database_url).await?;
    db.migrate().await?;

    let metrics_pool = db.pool.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            tick.tick().await;
            studiora_db::pool::log_metrics(&metrics_pool);
        }
    });

    let cache = ResultCache::from_env().await;
    let provider = Arc::new(HttpGenerationProvider::from_env()?);
    let registry = HandlerRegistry::new(
        Arc::new(MaterialUploadHandler::new(
            Arc::new(ParagraphIngestor),
            cache.clone(),
        )),
        Arc::new(LessonGenerationHandler::new(provider.clone(), cache)),
        Arc::new(CheckInEvaluationHandler::new(provider)),
    )?;

    let pool = WorkerPool::new(
        db.jobs.clone(),
        db.queue.clone(),
        registry,
        WorkerConfig::from_env(),
    );
    let handle = pool.start();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping worker pool");
    handle.shutdown();
    handle.join().await;

    Ok(())
}
