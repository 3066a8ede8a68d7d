//! Cooperative scheduler
//!
//! One dedicated thread runs a single-threaded runtime; every accepted job
//! becomes a local task interleaved on that thread. Worker calls are pushed
//! to the scheduler's own blocking pool, capped at `slots` threads, so a
//! CPU-bound job never stalls the other tasks or the HTTP server.

use std::sync::Arc;
use std::thread;

use async_trait::async_trait;
use ember_core::Worker;
use ember_core::domain::payload::Payload;
use tokio::runtime;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::LocalSet;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::{
    Admission, BackendError, BackendKind, BackendSettings, ExecutionBackend, Reservation, execute,
};
use crate::repository::JobStore;

struct ScheduledJob {
    job_id: Uuid,
    payload: Payload,
    reservation: Reservation,
}

/// Single-threaded event-loop backend
pub struct CooperativeBackend {
    admission: Admission,
    sender: mpsc::Sender<ScheduledJob>,
}

impl CooperativeBackend {
    /// Start the scheduler thread
    pub fn start(
        store: Arc<JobStore>,
        worker: Arc<dyn Worker>,
        settings: BackendSettings,
    ) -> std::io::Result<Self> {
        let slots = settings.slots.max(1);
        let runtime = runtime::Builder::new_current_thread()
            .enable_time()
            .max_blocking_threads(slots)
            .thread_name("ember-coop-blocking")
            .build()?;

        let (sender, receiver) = mpsc::channel(settings.capacity().max(1));
        let timeout = settings.job_timeout;

        info!(
            "Starting cooperative scheduler: {} blocking slots, backlog {}, worker '{}'",
            slots,
            settings.queue_depth,
            worker.name()
        );

        thread::Builder::new()
            .name("ember-scheduler".to_string())
            .spawn(move || schedule(runtime, receiver, store, worker, slots, timeout))?;

        Ok(Self {
            admission: Admission::new(settings.capacity(), settings.admission),
            sender,
        })
    }
}

fn schedule(
    runtime: runtime::Runtime,
    mut receiver: mpsc::Receiver<ScheduledJob>,
    store: Arc<JobStore>,
    worker: Arc<dyn Worker>,
    slots: usize,
    timeout: std::time::Duration,
) {
    // A job only starts its clock once a blocking thread is free for it
    let running = Arc::new(Semaphore::new(slots));
    let local = LocalSet::new();

    local.block_on(&runtime, async {
        while let Some(job) = receiver.recv().await {
            let store = Arc::clone(&store);
            let worker = Arc::clone(&worker);
            let running = Arc::clone(&running);

            tokio::task::spawn_local(async move {
                let Ok(slot) = running.acquire_owned().await else {
                    error!("Scheduler slots closed, dropping job {}", job.job_id);
                    return;
                };
                execute(
                    &store,
                    worker,
                    job.job_id,
                    job.payload,
                    timeout,
                    (job.reservation, slot),
                )
                .await;
            });
        }
    });

    debug!("Cooperative scheduler draining remaining jobs");
    runtime.block_on(local);
}

#[async_trait]
impl ExecutionBackend for CooperativeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cooperative
    }

    async fn reserve(&self) -> Result<Reservation, BackendError> {
        self.admission.acquire().await
    }

    async fn enqueue(
        &self,
        reservation: Reservation,
        job_id: Uuid,
        payload: Payload,
    ) -> Result<(), BackendError> {
        self.sender
            .try_send(ScheduledJob {
                job_id,
                payload,
                reservation,
            })
            .map_err(|e| BackendError::Unavailable(format!("scheduler stopped: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::AdmissionPolicy;
    use crate::backend::testing::{Broken, Gated, Upper, wait_for, wait_terminal};
    use ember_core::domain::job::JobStatus;
    use std::time::Duration;

    fn settings(slots: usize, queue_depth: usize) -> BackendSettings {
        BackendSettings {
            slots,
            queue_depth,
            admission: AdmissionPolicy::Reject,
            job_timeout: Duration::from_secs(5),
        }
    }

    async fn submit(store: &JobStore, backend: &CooperativeBackend, input: &str) -> Uuid {
        let reservation = backend.reserve().await.unwrap();
        let payload = Payload::new(input);
        let id = store.create(payload.clone());
        backend.enqueue(reservation, id, payload).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_job_runs_to_completion() {
        let store = Arc::new(JobStore::new());
        let backend =
            CooperativeBackend::start(Arc::clone(&store), Arc::new(Upper), settings(1, 4)).unwrap();

        let id = submit(&store, &backend, "hello").await;
        let job = wait_terminal(&store, id).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result.as_deref(), Some("HELLO"));
        assert_eq!(backend.kind(), BackendKind::Cooperative);
    }

    #[tokio::test]
    async fn test_failing_worker_marks_job_failed() {
        let store = Arc::new(JobStore::new());
        let backend =
            CooperativeBackend::start(Arc::clone(&store), Arc::new(Broken), settings(1, 1))
                .unwrap();

        let id = submit(&store, &backend, "hello").await;
        let job = wait_terminal(&store, id).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert!(!job.error.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_stays_readable_while_a_job_blocks() {
        let store = Arc::new(JobStore::new());
        let (worker, gate) = Gated::new();
        let backend =
            CooperativeBackend::start(Arc::clone(&store), Arc::new(worker), settings(1, 3))
                .unwrap();

        let blocked = submit(&store, &backend, "blocked").await;
        wait_for(&store, blocked, JobStatus::Processing).await;

        // queued behind the single slot, but accepted and visible
        let queued = submit(&store, &backend, "queued").await;
        assert_eq!(store.get(queued).unwrap().status, JobStatus::Pending);
        assert_eq!(store.get(blocked).unwrap().status, JobStatus::Processing);

        gate.send(()).unwrap();
        gate.send(()).unwrap();
        assert_eq!(
            wait_terminal(&store, blocked).await.status,
            JobStatus::Completed
        );
        assert_eq!(
            wait_terminal(&store, queued).await.status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_capacity_is_slots_plus_backlog() {
        let store = Arc::new(JobStore::new());
        let (worker, gate) = Gated::new();
        let backend =
            CooperativeBackend::start(Arc::clone(&store), Arc::new(worker), settings(1, 1))
                .unwrap();

        let first = submit(&store, &backend, "first").await;
        let second = submit(&store, &backend, "second").await;
        assert!(matches!(
            backend.reserve().await,
            Err(BackendError::Capacity(_))
        ));

        gate.send(()).unwrap();
        gate.send(()).unwrap();
        wait_terminal(&store, first).await;
        wait_terminal(&store, second).await;
    }
}
