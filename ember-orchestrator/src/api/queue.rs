//! Queue API Handlers
//!
//! Lease and completion endpoints used by runners. Only meaningful
//! when the distributed backend is active; otherwise every call is a 404.

use std::sync::Arc;

use axum::{
    Json,
    extract::{
        Path, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ember_core::dto::queue::{CompleteDelivery, LeaseRequest};
use uuid::Uuid;

use super::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::backend::DistributedBackend;

fn queue(state: &AppState) -> ApiResult<&Arc<DistributedBackend>> {
    state
        .queue
        .as_ref()
        .ok_or_else(|| ApiError::NotFound("Distributed queue is not enabled".to_string()))
}

/// POST /queue/lease
/// Lease the next ready delivery; 204 when there is none
pub async fn lease_delivery(
    State(state): State<AppState>,
    body: Result<Json<LeaseRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let queue = queue(&state)?;
    let Json(req) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    match queue.lease(&req.runner_id).await? {
        Some(delivery) => Ok(Json(delivery).into_response()),
        None => {
            tracing::debug!("Nothing to lease for runner {}", req.runner_id);
            Ok(StatusCode::NO_CONTENT.into_response())
        }
    }
}

/// POST /queue/{delivery_id}/complete
/// Report the outcome of a leased delivery
pub async fn complete_delivery(
    State(state): State<AppState>,
    delivery_id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<CompleteDelivery>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let queue = queue(&state)?;
    let Path(delivery_id) = delivery_id.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let Json(req) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    queue.complete(delivery_id, req.job_id, req.outcome).await?;
    Ok(StatusCode::NO_CONTENT)
}
