//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::payload::Payload;

/// Job execution record
///
/// Owned by the orchestrator's job store. Callers only ever see snapshots,
/// and every mutation goes through [`JobRecord::apply`] so the lifecycle
/// rules hold for all backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub status: JobStatus,
    pub payload: Payload,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Create a new pending record with a fresh identifier
    pub fn new(payload: Payload) -> Self {
        Self::with_id(Uuid::new_v4(), payload)
    }

    /// Create a new pending record with a specific identifier
    pub fn with_id(id: Uuid, payload: Payload) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            payload,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Apply one lifecycle transition
    ///
    /// The record is left untouched when the transition is not allowed.
    pub fn apply(&mut self, change: JobChange) -> Result<(), TransitionError> {
        let target = change.target();
        if !self.status.can_transition_to(target) {
            return Err(TransitionError {
                from: self.status,
                to: target,
            });
        }

        let now = Utc::now();
        match change {
            JobChange::Start => {
                self.started_at = Some(now);
            }
            JobChange::Complete(result) => {
                self.result = Some(result);
                self.completed_at = Some(now);
            }
            JobChange::Fail(error) => {
                self.error = Some(error);
                self.completed_at = Some(now);
            }
        }
        self.status = target;

        Ok(())
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Returns true if no further transition is permitted.
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Forward-only lifecycle.
    ///
    /// `Pending` may jump straight to a terminal state when execution is
    /// instantaneous or the backend fails the job before pickup.
    pub const fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Completed)
                | (Self::Pending, Self::Failed)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// A single state-machine step applied to a stored record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobChange {
    Start,
    Complete(String),
    Fail(String),
}

impl JobChange {
    /// Status the record ends up in after this change
    pub const fn target(&self) -> JobStatus {
        match self {
            JobChange::Start => JobStatus::Processing,
            JobChange::Complete(_) => JobStatus::Completed,
            JobChange::Fail(_) => JobStatus::Failed,
        }
    }
}

/// Terminal outcome of one job execution
///
/// Produced by every backend (and reported by remote runners) so failure is
/// a value threaded back into the store, never a lost panic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum JobOutcome {
    Completed { result: String },
    Failed { error: String },
}

impl JobOutcome {
    pub fn completed(result: impl Into<String>) -> Self {
        Self::Completed {
            result: result.into(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

impl From<JobOutcome> for JobChange {
    fn from(outcome: JobOutcome) -> Self {
        match outcome {
            JobOutcome::Completed { result } => JobChange::Complete(result),
            JobOutcome::Failed { error } => JobChange::Fail(error),
        }
    }
}

/// Rejected lifecycle transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid job transition from {from} to {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> JobRecord {
        JobRecord::new(Payload::new("hello"))
    }

    #[test]
    fn test_new_record_is_pending() {
        let job = record();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.result.is_none());
        assert!(job.error.is_none());
        assert!(job.started_at.is_none());
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn test_happy_path() {
        let mut job = record();
        job.apply(JobChange::Start).unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.started_at.is_some());

        job.apply(JobChange::Complete("olleh".to_string())).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result.as_deref(), Some("olleh"));
        assert!(job.error.is_none());
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_failure_sets_error_only() {
        let mut job = record();
        job.apply(JobChange::Start).unwrap();
        job.apply(JobChange::Fail("model exploded".to_string()))
            .unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.result.is_none());
        assert_eq!(job.error.as_deref(), Some("model exploded"));
    }

    #[test]
    fn test_terminal_state_is_final() {
        let mut job = record();
        job.apply(JobChange::Complete("done".to_string())).unwrap();
        let snapshot = job.clone();

        let err = job.apply(JobChange::Fail("late".to_string())).unwrap_err();
        assert_eq!(err.from, JobStatus::Completed);
        assert_eq!(err.to, JobStatus::Failed);
        assert!(job.apply(JobChange::Start).is_err());
        assert!(job.apply(JobChange::Complete("again".to_string())).is_err());
        assert_eq!(job, snapshot);
    }

    #[test]
    fn test_no_regression_or_restart() {
        let mut job = record();
        job.apply(JobChange::Start).unwrap();
        assert!(job.apply(JobChange::Start).is_err());
        assert!(!JobStatus::Processing.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Pending));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&JobStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
        assert_eq!("Completed".parse::<JobStatus>(), Ok(JobStatus::Completed));
        assert!("queued".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_outcome_wire_format() {
        let outcome: JobOutcome =
            serde_json::from_value(serde_json::json!({"status": "failed", "error": "boom"}))
                .unwrap();
        assert_eq!(outcome, JobOutcome::failed("boom"));
        assert_eq!(
            JobChange::from(JobOutcome::completed("ok")),
            JobChange::Complete("ok".to_string())
        );
    }
}
