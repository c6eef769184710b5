use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use job_relay::{
    app_state::AppState, bootstrap, config::AppConfig, routes, shutdown::Shutdown,
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing job-relay server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!("jobs_submitted_total", "Total jobs submitted");
    metrics::describe_counter!(
        "jobs_publish_failed_total",
        "Jobs recorded as PENDING whose queue publish failed"
    );
    metrics::describe_counter!("jobs_resolved_total", "Total job attempts resolved");
    metrics::describe_counter!("jobs_rejected_total", "Total job attempts rejected");
    metrics::describe_counter!(
        "jobs_dropped_total",
        "Jobs dropped from the queue after reaching max attempts"
    );
    metrics::describe_histogram!(
        "job_processing_seconds",
        "Time spent fetching a job's result from the provider"
    );
    metrics::describe_gauge!("job_queue_depth", "Current number of jobs waiting in the queue");

    let store = bootstrap::open_store(&config)
        .await
        .expect("Failed to open result store");
    let queue = bootstrap::open_queue(&config)
        .await
        .expect("Failed to open job queue");

    let shutdown = Shutdown::new();

    let worker = if config.embedded_worker {
        tracing::info!("Starting embedded job processor");
        let processor = bootstrap::build_processor(&config, Arc::clone(&store), Arc::clone(&queue))
            .await
            .expect("Failed to initialize job processor");
        Some(tokio::spawn(processor.run(shutdown.clone())))
    } else {
        if config.redis_url.is_none() {
            tracing::warn!("No embedded worker and no Redis queue; submitted jobs will never be processed");
        }
        None
    };

    let state = AppState::new(store, queue);

    let app = routes::router(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(64 * 1024));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
            signal.trigger();
        })
        .await
        .expect("Server error");

    shutdown.trigger();
    if let Some(worker) = worker {
        if let Err(e) = worker.await {
            tracing::error!(error = %e, "Job processor task failed");
        }
    }

    tracing::info!("Server stopped");
}
