//! Queue DTOs used between the orchestrator and runners

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::job::JobOutcome;

/// Request from a runner to lease the next ready delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseRequest {
    pub runner_id: String,
}

/// Outcome reported by a runner for a leased delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteDelivery {
    pub job_id: Uuid,
    pub outcome: JobOutcome,
}
