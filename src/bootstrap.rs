//! Startup wiring shared by the server and worker binaries.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::{self, queries::PgResultStore};
use crate::services::{
    policy::PolicyError,
    processor::JobProcessor,
    provider::{ProviderError, UnsplashClient},
    queue::{MemoryQueue, QueueClient, QueueError, RedisQueue},
    store::{FileResultStore, ResultStore},
};

/// Open the configured result store: Postgres when `DATABASE_URL` is set,
/// otherwise the JSON file at `RESULTS_PATH`.
pub async fn open_store(config: &AppConfig) -> Result<Arc<dyn ResultStore>, BootstrapError> {
    match &config.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to PostgreSQL result store");
            let pool = db::init_pool(database_url).await?;

            tracing::info!("Running database migrations");
            db::run_migrations(&pool).await?;

            Ok(Arc::new(PgResultStore::new(pool)))
        }
        None => {
            tracing::info!(path = %config.results_path, "Using file result store");
            Ok(Arc::new(FileResultStore::new(&config.results_path)))
        }
    }
}

/// Connect to the Redis queue.
pub async fn open_redis_queue(
    redis_url: &str,
    queue_name: &str,
) -> Result<Arc<dyn QueueClient>, BootstrapError> {
    tracing::info!(queue = %queue_name, "Connecting to Redis job queue");
    let queue = RedisQueue::new(redis_url, queue_name)?;
    queue.connect().await?;
    Ok(Arc::new(queue))
}

/// Redis when `REDIS_URL` is set, otherwise an in-process queue.
pub async fn open_queue(config: &AppConfig) -> Result<Arc<dyn QueueClient>, BootstrapError> {
    match &config.redis_url {
        Some(redis_url) => open_redis_queue(redis_url, &config.queue_name).await,
        None => {
            tracing::warn!("REDIS_URL not set; using in-process queue, jobs will not survive a restart");
            Ok(Arc::new(MemoryQueue::new()))
        }
    }
}

/// Build a job processor over the given store and queue, and return stranded
/// in-flight messages to the queue when configured to.
pub async fn build_processor(
    config: &AppConfig,
    store: Arc<dyn ResultStore>,
    queue: Arc<dyn QueueClient>,
) -> Result<Arc<JobProcessor>, BootstrapError> {
    let settings = config.processor_settings()?;

    tracing::info!("Initializing Unsplash client");
    let provider = UnsplashClient::new(
        &config.unsplash_base_url,
        &config.unsplash_api_key,
        config.provider_timeout(),
    )?;

    if config.recover_in_flight {
        let recovered = queue.recover_in_flight().await?;
        if recovered > 0 {
            tracing::warn!(recovered = recovered, "Returned in-flight jobs to the queue");
        }
    }

    Ok(Arc::new(JobProcessor::new(
        store,
        queue,
        Arc::new(provider),
        settings,
    )))
}

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("Database setup failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Queue setup failed: {0}")]
    Queue(#[from] QueueError),

    #[error("Provider setup failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Invalid worker policy: {0}")]
    Policy(#[from] PolicyError),
}
