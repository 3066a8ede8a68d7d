//! Job Dispatcher
//!
//! Accepts submissions: validates the payload, reserves capacity, creates
//! the record and hands the job to the execution backend.

use std::sync::Arc;

use ember_core::ValidationError;
use ember_core::domain::job::JobChange;
use ember_core::domain::payload::Payload;
use tracing::{error, info};
use uuid::Uuid;

use crate::backend::{BackendError, ExecutionBackend};
use crate::repository::JobStore;

/// Service error type
#[derive(Debug)]
pub enum JobError {
    Validation(ValidationError),
    Capacity(String),
    NotFound(Uuid),
    Unavailable(String),
}

impl From<ValidationError> for JobError {
    fn from(err: ValidationError) -> Self {
        JobError::Validation(err)
    }
}

impl From<BackendError> for JobError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Capacity(msg) => JobError::Capacity(msg),
            other => JobError::Unavailable(other.to_string()),
        }
    }
}

/// Front door for new jobs
pub struct Dispatcher {
    store: Arc<JobStore>,
    backend: Arc<dyn ExecutionBackend>,
    max_input_chars: usize,
}

impl Dispatcher {
    pub fn new(
        store: Arc<JobStore>,
        backend: Arc<dyn ExecutionBackend>,
        max_input_chars: usize,
    ) -> Self {
        Self {
            store,
            backend,
            max_input_chars,
        }
    }

    pub fn backend(&self) -> &dyn ExecutionBackend {
        self.backend.as_ref()
    }

    /// Accept a job and return its id without waiting for it to run
    ///
    /// Invalid payloads and refused admission create nothing. Once the
    /// record exists an id is always returned: if the hand-over fails the
    /// job is failed on the spot so it cannot stay pending forever.
    pub async fn submit(&self, payload: Payload) -> Result<Uuid, JobError> {
        payload.validate(self.max_input_chars)?;

        let reservation = self.backend.reserve().await?;
        let job_id = self.store.create(payload.clone());

        info!(
            "Job submitted: {} ({} chars, {} backend)",
            job_id,
            payload.input.chars().count(),
            self.backend.kind()
        );

        if let Err(e) = self.backend.enqueue(reservation, job_id, payload).await {
            error!("Failed to schedule job {}: {}", job_id, e);
            if let Err(update_err) = self
                .store
                .update(job_id, JobChange::Fail(format!("failed to schedule job: {}", e)))
            {
                error!("Could not fail unscheduled job {}: {}", job_id, update_err);
            }
        }

        Ok(job_id)
    }
}
