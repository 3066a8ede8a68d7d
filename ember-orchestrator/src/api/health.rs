//! Health Check API Handler
//!
//! Liveness endpoint for load balancers, runners and the CLI.

use axum::{Json, extract::State};
use chrono::Utc;
use ember_core::dto::health::HealthStatus;

use super::AppState;

/// GET /health
/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "healthy".to_string(),
        service: state.service_name.to_string(),
        backend: state.dispatcher.backend().kind().to_string(),
        timestamp: Utc::now(),
    })
}
