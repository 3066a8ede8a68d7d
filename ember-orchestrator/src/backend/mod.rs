//! Execution Backends
//!
//! Strategies that run accepted jobs to a terminal state. Every backend
//! splits admission (`reserve`) from hand-over (`enqueue`) so the dispatcher
//! can refuse work before a record exists, and every backend applies
//! exactly one terminal update per job.

pub mod cooperative;
pub mod distributed;
pub mod pool;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ember_core::Worker;
use ember_core::domain::job::{JobChange, JobOutcome};
use ember_core::domain::payload::Payload;
use ember_core::execution::run_blocking;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::repository::{BrokerError, JobStore, StoreError};

pub use cooperative::CooperativeBackend;
pub use distributed::{DistributedBackend, QueueSettings, SweepReport};
use distributed::PublishSlot;
pub use pool::WorkerPoolBackend;

/// Backend error type
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{0}")]
    Capacity(String),

    #[error("execution backend unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    DeliveryMismatch(String),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Execution strategy selected at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    WorkerPool,
    Cooperative,
    Distributed,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::WorkerPool => "pool",
            Self::Cooperative => "cooperative",
            Self::Distributed => "distributed",
        })
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pool" | "worker-pool" | "threads" => Ok(Self::WorkerPool),
            "cooperative" | "async" => Ok(Self::Cooperative),
            "distributed" | "queue" => Ok(Self::Distributed),
            other => Err(format!("unknown execution backend: {}", other)),
        }
    }
}

/// What to do when every permit is taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionPolicy {
    /// Fail immediately with a capacity error
    Reject,
    /// Wait up to `timeout` for a permit, then fail
    Block { timeout: Duration },
}

/// Capacity settings shared by the in-process backends
#[derive(Debug, Clone)]
pub struct BackendSettings {
    /// Number of jobs executing at once
    pub slots: usize,
    /// Accepted jobs allowed to wait for a slot
    pub queue_depth: usize,
    pub admission: AdmissionPolicy,
    pub job_timeout: Duration,
}

impl BackendSettings {
    /// Total permits: executing plus waiting
    pub fn capacity(&self) -> usize {
        self.slots + self.queue_depth
    }
}

/// Capacity granted by [`ExecutionBackend::reserve`]
///
/// Dropping it without enqueueing releases the capacity.
#[derive(Debug)]
pub struct Reservation {
    _hold: Hold,
}

// Variants are only held for their Drop
#[allow(dead_code)]
#[derive(Debug)]
enum Hold {
    Unbounded,
    Permit(OwnedSemaphorePermit),
    Publishing(PublishSlot),
}

impl Reservation {
    fn permit(permit: OwnedSemaphorePermit) -> Self {
        Self {
            _hold: Hold::Permit(permit),
        }
    }

    fn publishing(slot: PublishSlot) -> Self {
        Self {
            _hold: Hold::Publishing(slot),
        }
    }

    #[cfg(test)]
    pub(crate) fn unbounded() -> Self {
        Self {
            _hold: Hold::Unbounded,
        }
    }
}

/// Strategy that drives an accepted job to a terminal state
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Acquire capacity for one job
    async fn reserve(&self) -> Result<Reservation, BackendError>;

    /// Hand a created job over for execution; never waits for the job itself
    async fn enqueue(
        &self,
        reservation: Reservation,
        job_id: Uuid,
        payload: Payload,
    ) -> Result<(), BackendError>;
}

// ============================================================================
// Admission
// ============================================================================

#[derive(Debug)]
pub(crate) struct Admission {
    permits: Arc<Semaphore>,
    policy: AdmissionPolicy,
    capacity: usize,
}

impl Admission {
    pub(crate) fn new(capacity: usize, policy: AdmissionPolicy) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            policy,
            capacity,
        }
    }

    pub(crate) async fn acquire(&self) -> Result<Reservation, BackendError> {
        let permits = Arc::clone(&self.permits);

        let permit = match self.policy {
            AdmissionPolicy::Reject => permits.try_acquire_owned().map_err(|_| {
                BackendError::Capacity(format!(
                    "Server at capacity: all {} job slots are in use",
                    self.capacity
                ))
            })?,
            AdmissionPolicy::Block { timeout } => {
                match tokio::time::timeout(timeout, permits.acquire_owned()).await {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => {
                        return Err(BackendError::Unavailable(
                            "admission semaphore closed".to_string(),
                        ));
                    }
                    Err(_) => {
                        return Err(BackendError::Capacity(format!(
                            "Server at capacity: no job slot freed up within {}ms",
                            timeout.as_millis()
                        )));
                    }
                }
            }
        };

        Ok(Reservation::permit(permit))
    }
}

// ============================================================================
// Store Updates
// ============================================================================

/// Move a job to `Processing`; false when it must not run
pub(crate) fn mark_processing(store: &JobStore, job_id: Uuid) -> bool {
    match store.update(job_id, JobChange::Start) {
        Ok(_) => {
            debug!("Job {} is processing", job_id);
            true
        }
        Err(StoreError::NotFound(_)) => {
            error!("Job {} vanished from the store before it started", job_id);
            false
        }
        Err(e @ StoreError::InvalidTransition { .. }) => {
            warn!("Not starting job {}: {}", job_id, e);
            false
        }
    }
}

/// Apply the terminal outcome; false when it was discarded
pub(crate) fn record_outcome(store: &JobStore, job_id: Uuid, outcome: JobOutcome) -> bool {
    let succeeded = outcome.is_success();

    match store.update(job_id, outcome.into()) {
        Ok(job) => {
            if succeeded {
                info!("Job {} completed", job_id);
            } else {
                info!(
                    "Job {} failed: {}",
                    job_id,
                    job.error.as_deref().unwrap_or("unknown error")
                );
            }
            true
        }
        Err(StoreError::NotFound(_)) => {
            error!("Outcome for job {} has no record to land on", job_id);
            false
        }
        Err(e @ StoreError::InvalidTransition { .. }) => {
            warn!("Discarding duplicate outcome: {}", e);
            false
        }
    }
}

/// Run one job in-process from `Pending` to a terminal state
///
/// `guard` is released only once the worker call has really returned.
pub(crate) async fn execute<G>(
    store: &JobStore,
    worker: Arc<dyn Worker>,
    job_id: Uuid,
    payload: Payload,
    timeout: Duration,
    guard: G,
) where
    G: Send + 'static,
{
    if !mark_processing(store, job_id) {
        return;
    }

    let result = run_blocking(worker, payload, timeout, guard).await;
    record_outcome(store, job_id, result.into_outcome());
}
