//! Delivery poller
//!
//! Leases deliveries from the orchestrator and executes them. Each delivery
//! runs in its own task; a semaphore caps how many run at once, and a
//! permit is only returned once the worker call has really finished and
//! the outcome has been reported.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use ember_client::OrchestratorClient;
use ember_core::Worker;
use ember_core::domain::delivery::Delivery;
use ember_core::domain::job::JobOutcome;
use ember_core::execution::run_blocking;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{self, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;

const REPORT_ATTEMPTS: u32 = 3;

/// Job poller that continuously leases and executes deliveries
pub struct JobPoller {
    config: Config,
    client: Arc<OrchestratorClient>,
    worker: Arc<dyn Worker>,
    semaphore: Arc<Semaphore>,
}

impl JobPoller {
    /// Creates a new job poller
    pub fn new(config: Config, client: Arc<OrchestratorClient>, worker: Arc<dyn Worker>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_parallel_jobs));
        Self {
            config,
            client,
            worker,
            semaphore,
        }
    }

    /// Starts the polling loop and runs until `shutdown` resolves
    ///
    /// Jobs already leased are finished and reported before returning.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        info!(
            "Starting job poller (interval: {:?}, parallel jobs: {})",
            self.config.poll_interval, self.config.max_parallel_jobs
        );

        let mut interval = time::interval(self.config.poll_interval);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, waiting for running jobs");
                    break;
                }
                _ = interval.tick() => {
                    debug!("Polling for deliveries");

                    match self.poll_once().await {
                        Ok(started) => {
                            if started > 0 {
                                info!("Started {} job(s) this cycle", started);
                            }
                        }
                        Err(e) => {
                            error!("Error during poll cycle: {:#}", e);
                        }
                    }
                }
            }
        }

        self.drain().await;
        Ok(())
    }

    /// Lease deliveries until the queue is empty or every slot is busy
    pub async fn poll_once(&self) -> Result<usize> {
        let mut started = 0;

        loop {
            let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
                debug!("Max parallel jobs reached, leaving deliveries queued");
                break;
            };

            let delivery = self
                .client
                .lease_delivery(&self.config.runner_id)
                .await
                .context("Failed to lease delivery")?;

            let Some(delivery) = delivery else {
                debug!("No deliveries available");
                break;
            };

            self.spawn_delivery_task(delivery, permit);
            started += 1;
        }

        Ok(started)
    }

    /// Wait until every running job has been reported
    pub async fn drain(&self) {
        let slots = self.config.max_parallel_jobs as u32;
        if let Ok(permits) = self.semaphore.acquire_many(slots).await {
            drop(permits);
        }
    }

    /// Spawns a task to execute a single delivery
    fn spawn_delivery_task(
        &self,
        delivery: Delivery,
        permit: OwnedSemaphorePermit,
    ) -> tokio::task::JoinHandle<()> {
        let client = Arc::clone(&self.client);
        let worker = Arc::clone(&self.worker);
        let timeout = self.config.job_timeout;

        tokio::spawn(async move {
            // Shared so the slot stays taken until both the worker call and
            // the report are done
            let permit = Arc::new(permit);

            info!(
                "Executing job {} (delivery {}, attempt {})",
                delivery.job_id, delivery.delivery_id, delivery.attempt
            );

            let result = run_blocking(worker, delivery.payload, timeout, Arc::clone(&permit)).await;
            let outcome = result.into_outcome();

            match &outcome {
                JobOutcome::Completed { .. } => info!("Job {} completed", delivery.job_id),
                JobOutcome::Failed { error } => {
                    warn!("Job {} failed: {}", delivery.job_id, error)
                }
            }

            report_with_retry(&client, delivery.delivery_id, delivery.job_id, outcome).await;
            drop(permit);
        })
    }
}

/// Report an outcome, retrying transient failures with backoff
///
/// If every attempt fails the lease simply expires and the orchestrator
/// redelivers the job.
async fn report_with_retry(
    client: &OrchestratorClient,
    delivery_id: Uuid,
    job_id: Uuid,
    outcome: JobOutcome,
) {
    let mut delay = Duration::from_millis(200);

    for attempt in 1..=REPORT_ATTEMPTS {
        match client
            .complete_delivery(delivery_id, job_id, outcome.clone())
            .await
        {
            Ok(()) => return,
            Err(e) if attempt < REPORT_ATTEMPTS && !e.is_client_error() => {
                warn!(
                    "Failed to report job {} (attempt {}/{}): {}",
                    job_id, attempt, REPORT_ATTEMPTS, e
                );
                time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => {
                error!(
                    "Giving up reporting job {}, it will be redelivered: {}",
                    job_id, e
                );
                return;
            }
        }
    }
}
