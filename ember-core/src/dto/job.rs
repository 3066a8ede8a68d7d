//! Job DTOs for inter-service communication

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::domain::job::{JobRecord, JobStatus};
use crate::domain::payload::Payload;
use crate::error::ValidationError;

/// Request to submit a new job
///
/// Every field other than the input is passed through to the worker as a
/// parameter. `text` and `input_text` are accepted as synonyms for `input`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitJob {
    #[serde(default, alias = "text", alias = "input_text")]
    pub input: Option<String>,
    #[serde(flatten)]
    pub parameters: Map<String, Value>,
}

impl SubmitJob {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: Some(input.into()),
            parameters: Map::new(),
        }
    }

    /// Convert into a payload, failing when no input was supplied
    pub fn into_payload(self) -> Result<Payload, ValidationError> {
        let input = self.input.ok_or(ValidationError::MissingInput)?;
        Ok(Payload {
            input,
            parameters: self.parameters,
        })
    }
}

/// Response returned once a job has been accepted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitAccepted {
    pub job_id: Uuid,
    pub status: JobStatus,
}

/// Externally visible job snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    pub job_id: Uuid,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<JobRecord> for JobView {
    fn from(job: JobRecord) -> Self {
        JobView {
            job_id: job.id,
            status: job.status,
            result: job.result,
            error: job.error,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}
