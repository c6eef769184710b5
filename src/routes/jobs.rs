use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::{ErrorResponse, SubmitResponse};
use crate::models::job::JobRecord;
use crate::services::gateway::GatewayError;

/// GET / — liveness banner.
pub async fn index() -> Json<serde_json::Value> {
    Json(json!({ "message": "working" }))
}

/// POST /jobs — create a job and return its id immediately.
pub async fn submit_job(State(state): State<AppState>) -> Result<Json<SubmitResponse>, ApiError> {
    let job_id = state.gateway.submit().await?;
    Ok(Json(SubmitResponse { job_id }))
}

/// GET /jobs — all jobs, newest first.
pub async fn list_jobs(State(state): State<AppState>) -> Result<Json<Vec<JobRecord>>, ApiError> {
    Ok(Json(state.gateway.query_all().await?))
}

/// GET /jobs/{job_id} — status of one job. An id that is not a UUID can
/// never have been issued, so it is simply not found.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobRecord>, ApiError> {
    let Ok(id) = Uuid::parse_str(&job_id) else {
        return Err(ApiError::NotFound(job_id));
    };

    state
        .gateway
        .query(id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound(job_id))
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Job {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Gateway(e) => {
                tracing::error!(error = %e, "Job request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
