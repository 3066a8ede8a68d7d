//! Job API Handlers
//!
//! Submission and status polling endpoints.

use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
};
use ember_core::domain::job::JobStatus;
use ember_core::dto::job::{JobView, SubmitAccepted, SubmitJob};
use serde::Deserialize;
use uuid::Uuid;

use super::AppState;
use crate::api::error::{ApiError, ApiResult};

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

// =============================================================================
// Submission
// =============================================================================

/// POST /submit
/// Accept a job and return its id immediately
pub async fn submit_job(
    State(state): State<AppState>,
    body: Result<Json<SubmitJob>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubmitAccepted>)> {
    let Json(req) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let payload = req.into_payload().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let job_id = state.dispatcher.submit(payload).await?;

    // The backend may already have picked the job up
    let status = state
        .status
        .get(job_id)
        .map(|job| job.status)
        .unwrap_or(JobStatus::Pending);

    Ok((StatusCode::ACCEPTED, Json(SubmitAccepted { job_id, status })))
}

// =============================================================================
// Status
// =============================================================================

/// GET /status/{job_id}
/// Current snapshot of one job
pub async fn get_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobView>> {
    tracing::debug!("Polling job: {}", job_id);

    // A malformed id cannot name a job
    let id = Uuid::parse_str(&job_id)
        .map_err(|_| ApiError::NotFound("Job not found".to_string()))?;

    let job = state.status.get(id)?;
    Ok(Json(JobView::from(job)))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// GET /jobs
/// Recent jobs, newest first
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<JobView>>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<JobStatus>)
        .transpose()
        .map_err(ApiError::BadRequest)?;

    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
    let offset = query.offset.unwrap_or(0);

    let jobs = state
        .status
        .list(status, limit, offset)
        .into_iter()
        .map(JobView::from)
        .collect();

    Ok(Json(jobs))
}
