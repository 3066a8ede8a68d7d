//! Bounded worker pool
//!
//! A fixed number of slot tasks pull jobs from a bounded backlog and run
//! the worker function on the blocking thread pool. Capacity is
//! `slots + queue_depth` permits, each held until its worker call returns.
//! A separate `slots`-sized semaphore keeps abandoned (timed-out) calls
//! counted, so no more than `slots` worker calls ever run at once.

use std::sync::Arc;

use async_trait::async_trait;
use ember_core::Worker;
use ember_core::domain::payload::Payload;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tracing::{debug, error, info};
use uuid::Uuid;

use super::{
    Admission, BackendError, BackendKind, BackendSettings, ExecutionBackend, Reservation, execute,
};
use crate::repository::JobStore;

struct QueuedJob {
    job_id: Uuid,
    payload: Payload,
    reservation: Reservation,
}

/// Bounded pool of execution slots on the multi-threaded runtime
pub struct WorkerPoolBackend {
    admission: Admission,
    sender: mpsc::Sender<QueuedJob>,
}

impl WorkerPoolBackend {
    /// Start the slot tasks on the current runtime
    pub fn spawn(store: Arc<JobStore>, worker: Arc<dyn Worker>, settings: BackendSettings) -> Self {
        let capacity = settings.capacity().max(1);
        let (sender, receiver) = mpsc::channel::<QueuedJob>(capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let running = Arc::new(Semaphore::new(settings.slots));

        info!(
            "Starting worker pool: {} slots, backlog {}, worker '{}'",
            settings.slots,
            settings.queue_depth,
            worker.name()
        );

        for slot in 0..settings.slots {
            let receiver = Arc::clone(&receiver);
            let store = Arc::clone(&store);
            let worker = Arc::clone(&worker);
            let running = Arc::clone(&running);
            let timeout = settings.job_timeout;

            tokio::spawn(async move {
                loop {
                    let next = receiver.lock().await.recv().await;
                    let Some(job) = next else {
                        debug!("Pool slot {} shutting down", slot);
                        break;
                    };

                    // Timed-out calls keep their permit until they return
                    let Ok(permit) = Arc::clone(&running).acquire_owned().await else {
                        error!("Pool slots closed, dropping job {}", job.job_id);
                        break;
                    };

                    debug!("Pool slot {} picked up job {}", slot, job.job_id);
                    execute(
                        &store,
                        Arc::clone(&worker),
                        job.job_id,
                        job.payload,
                        timeout,
                        (job.reservation, permit),
                    )
                    .await;
                }
            });
        }

        Self {
            admission: Admission::new(settings.capacity(), settings.admission),
            sender,
        }
    }
}

#[async_trait]
impl ExecutionBackend for WorkerPoolBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::WorkerPool
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
        // Permits bound the backlog, so a full channel means the slots are gone
        self.sender
            .try_send(QueuedJob {
                job_id,
                payload,
                reservation,
            })
            .map_err(|e| BackendError::Unavailable(format!("worker pool stopped: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::AdmissionPolicy;
    use crate::backend::testing::{Broken, Gated, Sleepy, Upper, wait_for, wait_terminal};
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

    async fn submit(store: &JobStore, backend: &WorkerPoolBackend, input: &str) -> Uuid {
        let reservation = backend.reserve().await.unwrap();
        let payload = Payload::new(input);
        let id = store.create(payload.clone());
        backend.enqueue(reservation, id, payload).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_job_runs_to_completion() {
        let store = Arc::new(JobStore::new());
        let backend = WorkerPoolBackend::spawn(Arc::clone(&store), Arc::new(Upper), settings(2, 4));

        let id = submit(&store, &backend, "hello").await;
        let job = wait_terminal(&store, id).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result.as_deref(), Some("HELLO"));
        assert!(job.error.is_none());
        assert!(job.started_at.is_some());
        assert!(job.completed_at.is_some());
        assert_eq!(backend.kind(), BackendKind::WorkerPool);
    }

    #[tokio::test]
    async fn test_failing_worker_marks_job_failed() {
        let store = Arc::new(JobStore::new());
        let backend =
            WorkerPoolBackend::spawn(Arc::clone(&store), Arc::new(Broken), settings(1, 1));

        let id = submit(&store, &backend, "hello").await;
        let job = wait_terminal(&store, id).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("model exploded"));
        assert!(job.result.is_none());
    }

    #[tokio::test]
    async fn test_capacity_one_rejects_second_job() {
        let store = Arc::new(JobStore::new());
        let (worker, gate) = Gated::new();
        let backend = WorkerPoolBackend::spawn(Arc::clone(&store), Arc::new(worker), settings(1, 0));

        let first = submit(&store, &backend, "first").await;
        wait_for(&store, first, JobStatus::Processing).await;

        let err = backend.reserve().await.unwrap_err();
        assert!(matches!(err, BackendError::Capacity(_)));

        gate.send(()).unwrap();
        assert_eq!(
            wait_terminal(&store, first).await.status,
            JobStatus::Completed
        );

        // permit comes back once the call has returned
        let mut admitted = false;
        for _ in 0..100 {
            if backend.reserve().await.is_ok() {
                admitted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(admitted);
    }

    #[tokio::test]
    async fn test_hung_worker_times_out() {
        let store = Arc::new(JobStore::new());
        let mut config = settings(1, 0);
        config.job_timeout = Duration::from_millis(50);
        let backend = WorkerPoolBackend::spawn(
            Arc::clone(&store),
            Arc::new(Sleepy(Duration::from_millis(500))),
            config,
        );

        let id = submit(&store, &backend, "hello").await;
        let job = wait_terminal(&store, id).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("timed out"));

        // abandoned call still holds its permit
        assert!(matches!(
            backend.reserve().await,
            Err(BackendError::Capacity(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_submissions_all_finish() {
        let store = Arc::new(JobStore::new());
        let backend = Arc::new(WorkerPoolBackend::spawn(
            Arc::clone(&store),
            Arc::new(Upper),
            settings(4, 64),
        ));

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let store = Arc::clone(&store);
                let backend = Arc::clone(&backend);
                tokio::spawn(async move { submit(&store, &backend, &format!("job {}", i)).await })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }

        for id in &ids {
            let job = wait_terminal(&store, *id).await;
            assert_eq!(job.status, JobStatus::Completed);
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 32);
    }

    #[tokio::test]
    async fn test_timed_out_calls_still_occupy_their_slot() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct Counting {
            active: AtomicUsize,
            max_seen: AtomicUsize,
        }

        impl Worker for Counting {
            fn name(&self) -> &str {
                "counting"
            }

            fn process(&self, payload: &Payload) -> Result<String, ember_core::WorkerError> {
                let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_seen.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(150));
                self.active.fetch_sub(1, Ordering::SeqCst);
                Ok(payload.input.clone())
            }
        }

        let worker = Arc::new(Counting {
            active: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
        });
        let store = Arc::new(JobStore::new());
        let mut config = settings(1, 3);
        config.job_timeout = Duration::from_millis(20);
        let backend = WorkerPoolBackend::spawn(
            Arc::clone(&store),
            Arc::clone(&worker) as Arc<dyn Worker>,
            config,
        );

        let mut ids = Vec::new();
        for i in 0..4 {
            ids.push(submit(&store, &backend, &i.to_string()).await);
        }
        for id in ids {
            let job = wait_terminal(&store, id).await;
            assert!(job.error.unwrap().contains("timed out"));
        }

        assert_eq!(worker.max_seen.load(Ordering::SeqCst), 1);
    }
}
