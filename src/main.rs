use anyhow::{Context, Result};
use dotenv::dotenv;
use log::info;
use morpho::cache::ResultCache;
use morpho::config::AppConfig;
use morpho::pipeline::PipelineExecutor;
use morpho::queue::JobQueue;
use morpho::repo::RedbImageRepository;
use morpho::service::TransformService;
use morpho::storage::FsBlobStorage;
use morpho::worker::WorkerPool;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::load()?;
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create data directory {:?}", config.data_dir))?;

    let storage = Arc::new(FsBlobStorage::new(&config.storage_root)?);
    let repo = Arc::new(RedbImageRepository::open(
        config.data_dir.join("metadata.redb"),
    )?);
    let queue = Arc::new(
        JobQueue::open_with_backoff(
            config.data_dir.join("queue.redb"),
            config.max_delivery_attempts,
            Duration::from_millis(config.queue_backoff_ms),
        )
        .await,
    );
    let cache = Arc::new(ResultCache::new(
        config.cache_capacity,
        Duration::from_secs(config.cache_ttl_secs),
    ));
    let executor = Arc::new(PipelineExecutor::new(config.font_dir.clone()));
    let service = Arc::new(TransformService::new(
        repo,
        storage,
        queue.clone(),
        cache,
        executor,
    ));

    let pool = WorkerPool::spawn(config.worker_count, queue.clone(), service.clone());
    info!(
        "morpho up: {} workers, {} jobs pending from the last run",
        config.worker_count,
        queue.pending()?
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown requested, draining workers");
    pool.shutdown().await;
    Ok(())
}
