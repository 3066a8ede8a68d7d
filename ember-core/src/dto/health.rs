//! Health DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Liveness report returned by `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
    pub backend: String,
    pub timestamp: DateTime<Utc>,
}
