//! Distributed queue backend
//!
//! Accepted jobs are published to a broker as deliveries; runner processes
//! lease them over HTTP, execute them and report back. The orchestrator
//! remains the only writer of the job store.
//!
//! Delivery is at-least-once, so both the lease and the completion path
//! check the job status first and drop anything aimed at a terminal job.
//!
//! Job records live in this process only, so one orchestrator owns a queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ember_core::domain::delivery::Delivery;
use ember_core::domain::job::{JobChange, JobOutcome, JobStatus};
use ember_core::domain::payload::Payload;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    BackendError, BackendKind, ExecutionBackend, Reservation, mark_processing, record_outcome,
};
use crate::repository::{Broker, JobStore, StoreError};

/// Queue tuning
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// How long a leased delivery stays hidden from other runners
    pub visibility_timeout: Duration,
    /// Leases allowed per delivery before the job is failed
    pub max_attempts: u32,
    /// Deliveries allowed in the broker before admission is refused
    pub max_backlog: usize,
    /// Jobs processing longer than this are failed by the sweep
    pub job_timeout: Duration,
}

/// Counts from one supervisory sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub exhausted: usize,
    pub timed_out: usize,
    pub orphaned: usize,
}

/// A submission admitted but not yet visible in the broker
///
/// Counted against the backlog limit until dropped after the publish.
#[derive(Debug)]
pub(crate) struct PublishSlot {
    in_flight: Arc<AtomicUsize>,
}

impl PublishSlot {
    /// Claim a slot and return how many were already claimed
    fn claim(in_flight: &Arc<AtomicUsize>) -> (Self, usize) {
        let ahead = in_flight.fetch_add(1, Ordering::SeqCst);
        let slot = Self {
            in_flight: Arc::clone(in_flight),
        };
        (slot, ahead)
    }
}

impl Drop for PublishSlot {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Broker-backed backend shared by the submit path and the queue endpoints
pub struct DistributedBackend {
    store: Arc<JobStore>,
    broker: Arc<dyn Broker>,
    settings: QueueSettings,
    in_flight: Arc<AtomicUsize>,
}

impl DistributedBackend {
    pub fn new(store: Arc<JobStore>, broker: Arc<dyn Broker>, settings: QueueSettings) -> Self {
        Self {
            store,
            broker,
            settings,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Lease the next delivery whose job still needs to run
    ///
    /// Deliveries for terminal or unknown jobs are acknowledged and skipped.
    pub async fn lease(&self, runner_id: &str) -> Result<Option<Delivery>, BackendError> {
        loop {
            let Some(delivery) = self
                .broker
                .lease(runner_id, self.settings.visibility_timeout)
                .await?
            else {
                return Ok(None);
            };

            match self.store.get(delivery.job_id) {
                Ok(job) if job.is_terminal() => {
                    warn!(
                        "Discarding redelivery {} of job {}: already {}",
                        delivery.delivery_id, job.id, job.status
                    );
                    self.broker.ack(delivery.delivery_id).await?;
                }
                Ok(job) => {
                    if job.status == JobStatus::Pending {
                        mark_processing(&self.store, job.id);
                    }
                    info!(
                        "Runner {} leased job {} (attempt {})",
                        runner_id, job.id, delivery.attempt
                    );
                    return Ok(Some(delivery));
                }
                Err(StoreError::NotFound(_)) => {
                    warn!(
                        "Discarding delivery {} for unknown job {}",
                        delivery.delivery_id, delivery.job_id
                    );
                    self.broker.ack(delivery.delivery_id).await?;
                }
                Err(e) => {
                    warn!("Discarding delivery {}: {}", delivery.delivery_id, e);
                    self.broker.ack(delivery.delivery_id).await?;
                }
            }
        }
    }

    /// Record a runner's outcome and retire the delivery
    ///
    /// An outcome for a job that is already terminal, or for a delivery that
    /// has been retired, is discarded. `job_id` must match the delivery.
    pub async fn complete(
        &self,
        delivery_id: Uuid,
        job_id: Uuid,
        outcome: JobOutcome,
    ) -> Result<(), BackendError> {
        match self.broker.job_of(delivery_id).await? {
            None => {
                debug!(
                    "Delivery {} was already retired, dropping outcome for job {}",
                    delivery_id, job_id
                );
                return Ok(());
            }
            Some(owner) if owner != job_id => {
                return Err(BackendError::DeliveryMismatch(format!(
                    "delivery {} belongs to job {}, not {}",
                    delivery_id, owner, job_id
                )));
            }
            Some(_) => {}
        }

        record_outcome(&self.store, job_id, outcome);

        if !self.broker.ack(delivery_id).await? {
            debug!("Delivery {} was already retired", delivery_id);
        }
        Ok(())
    }

    /// Redeliver expired leases and fail jobs that cannot finish
    pub async fn sweep(&self) -> Result<SweepReport, BackendError> {
        let mut report = SweepReport::default();

        for delivery in self
            .broker
            .reclaim_expired(self.settings.max_attempts)
            .await?
        {
            let error = format!("gave up after {} delivery attempts", delivery.attempt);
            if self.fail(delivery.job_id, error) {
                report.exhausted += 1;
            }
        }

        let limit = chrono::Duration::from_std(self.settings.job_timeout)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        for job_id in self.store.stuck(Utc::now() - limit) {
            let error = format!(
                "execution timed out after {}s",
                self.settings.job_timeout.as_secs_f64()
            );
            if self.fail(job_id, error) {
                report.timed_out += 1;
            }
        }

        // Give a fresh submission time to finish publishing
        let grace = chrono::Duration::from_std(self.settings.visibility_timeout)
            .unwrap_or_else(|_| chrono::Duration::days(1));
        let waiting = self.store.pending_before(Utc::now() - grace);
        if !waiting.is_empty() {
            let queued = self.broker.queued_jobs().await?;
            for job_id in waiting.into_iter().filter(|id| !queued.contains(id)) {
                let error = "delivery was lost before any runner picked it up".to_string();
                if self.fail(job_id, error) {
                    report.orphaned += 1;
                }
            }
        }

        if report != SweepReport::default() {
            info!(
                "Sweep failed {} exhausted, {} timed-out and {} orphaned jobs",
                report.exhausted, report.timed_out, report.orphaned
            );
        }
        Ok(report)
    }

    fn fail(&self, job_id: Uuid, error: String) -> bool {
        match self.store.update(job_id, JobChange::Fail(error)) {
            Ok(_) => true,
            Err(e) => {
                debug!("Sweep left job {} alone: {}", job_id, e);
                false
            }
        }
    }
}

#[async_trait]
impl ExecutionBackend for DistributedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Distributed
    }

    async fn reserve(&self) -> Result<Reservation, BackendError> {
        // Claim before reading the depth so concurrent submissions see each other
        let (slot, ahead) = PublishSlot::claim(&self.in_flight);
        let queued = self.broker.depth().await? + ahead;

        if queued >= self.settings.max_backlog {
            return Err(BackendError::Capacity(format!(
                "Server at capacity: {} jobs already queued",
                queued
            )));
        }
        Ok(Reservation::publishing(slot))
    }

    async fn enqueue(
        &self,
        reservation: Reservation,
        job_id: Uuid,
        payload: Payload,
    ) -> Result<(), BackendError> {
        let delivery = Delivery::new(job_id, payload);
        debug!(
            "Publishing job {} as delivery {}",
            job_id, delivery.delivery_id
        );
        self.broker.publish(delivery).await?;

        // Now counted by the broker itself
        drop(reservation);
        Ok(())
    }
}
