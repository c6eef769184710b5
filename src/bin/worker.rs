use job_relay::{bootstrap, config::AppConfig, shutdown::Shutdown};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting job-relay worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // A standalone worker only makes sense against a shared broker
    let redis_url = config
        .redis_url
        .as_deref()
        .expect("REDIS_URL is required for the standalone worker");

    let store = bootstrap::open_store(&config)
        .await
        .expect("Failed to open result store");
    let queue = bootstrap::open_redis_queue(redis_url, &config.queue_name)
        .await
        .expect("Failed to connect to job queue");

    let processor = bootstrap::build_processor(&config, store, queue)
        .await
        .expect("Failed to initialize job processor");

    let shutdown = Shutdown::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
        tracing::info!("Shutdown signal received, finishing in-flight jobs");
        signal.trigger();
    });

    tracing::info!("Worker ready, starting job processing loop");
    processor.run(shutdown).await;

    tracing::info!("Worker stopped");
}
