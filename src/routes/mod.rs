pub mod health;
pub mod jobs;
pub mod metrics;

use axum::routing::get;
use axum::Router;

use crate::app_state::AppState;

/// Job API routes. Transport layers (CORS, tracing, metrics endpoint) are
/// added by the server binary.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(jobs::index))
        .route("/health", get(health::health_check))
        .route("/jobs", get(jobs::list_jobs).post(jobs::submit_job))
        .route("/jobs/{job_id}", get(jobs::get_job))
        .with_state(state)
}
