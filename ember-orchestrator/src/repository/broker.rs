//! Delivery Broker
//!
//! Queue of deliveries waiting for the worker fleet. Delivery is
//! at-least-once: a leased delivery stays invisible until it is acked or
//! its lease expires, after which it becomes visible again.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ember_core::domain::delivery::Delivery;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Broker error type
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt delivery {id}: {reason}")]
    Corrupt { id: Uuid, reason: String },
}

/// Durable or in-memory delivery queue
#[async_trait]
pub trait Broker: Send + Sync {
    /// Append a delivery to the ready queue
    async fn publish(&self, delivery: Delivery) -> Result<(), BrokerError>;

    /// Take the oldest ready delivery and hide it for `visibility`
    ///
    /// The returned delivery carries the incremented attempt counter.
    async fn lease(
        &self,
        runner_id: &str,
        visibility: Duration,
    ) -> Result<Option<Delivery>, BrokerError>;

    /// Remove a delivery for good; returns false if it was already gone
    async fn ack(&self, delivery_id: Uuid) -> Result<bool, BrokerError>;

    /// Make expired leases visible again
    ///
    /// Deliveries that already used `max_attempts` are removed instead and
    /// returned so the caller can fail their jobs.
    async fn reclaim_expired(&self, max_attempts: u32) -> Result<Vec<Delivery>, BrokerError>;

    /// Ready plus leased deliveries
    async fn depth(&self) -> Result<usize, BrokerError>;

    /// Job a live delivery belongs to; `None` once it has been retired
    async fn job_of(&self, delivery_id: Uuid) -> Result<Option<Uuid>, BrokerError>;

    /// Jobs that still have a ready or leased delivery
    async fn queued_jobs(&self) -> Result<HashSet<Uuid>, BrokerError>;
}

#[derive(Debug)]
struct Lease {
    delivery: Delivery,
    runner_id: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct BrokerState {
    ready: VecDeque<Delivery>,
    leased: HashMap<Uuid, Lease>,
}

/// Process-local broker for single-node deployments and tests
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, delivery: Delivery) -> Result<(), BrokerError> {
        debug!(
            "Publishing delivery {} for job {}",
            delivery.delivery_id, delivery.job_id
        );
        self.state().ready.push_back(delivery);
        Ok(())
    }

    async fn lease(
        &self,
        runner_id: &str,
        visibility: Duration,
    ) -> Result<Option<Delivery>, BrokerError> {
        let mut state = self.state();
        let Some(mut delivery) = state.ready.pop_front() else {
            return Ok(None);
        };

        delivery.attempt += 1;
        state.leased.insert(
            delivery.delivery_id,
            Lease {
                delivery: delivery.clone(),
                runner_id: runner_id.to_string(),
                expires_at: Instant::now() + visibility,
            },
        );

        Ok(Some(delivery))
    }

    async fn ack(&self, delivery_id: Uuid) -> Result<bool, BrokerError> {
        let mut state = self.state();
        if state.leased.remove(&delivery_id).is_some() {
            return Ok(true);
        }

        // The lease may have expired and been requeued before the ack arrived
        let before = state.ready.len();
        state.ready.retain(|d| d.delivery_id != delivery_id);
        Ok(state.ready.len() != before)
    }

    async fn reclaim_expired(&self, max_attempts: u32) -> Result<Vec<Delivery>, BrokerError> {
        let mut state = self.state();
        let now = Instant::now();

        let expired: Vec<Uuid> = state
            .leased
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();

        let mut exhausted = Vec::new();
        for id in expired {
            let Some(lease) = state.leased.remove(&id) else {
                continue;
            };

            warn!(
                "Lease on delivery {} (job {}, attempt {}) held by {} expired",
                id, lease.delivery.job_id, lease.delivery.attempt, lease.runner_id
            );

            if lease.delivery.attempt >= max_attempts {
                exhausted.push(lease.delivery);
            } else {
                state.ready.push_back(lease.delivery);
            }
        }

        Ok(exhausted)
    }

    async fn depth(&self) -> Result<usize, BrokerError> {
        let state = self.state();
        Ok(state.ready.len() + state.leased.len())
    }

    async fn job_of(&self, delivery_id: Uuid) -> Result<Option<Uuid>, BrokerError> {
        let state = self.state();
        let leased = state.leased.get(&delivery_id).map(|l| l.delivery.job_id);
        Ok(leased.or_else(|| {
            state
                .ready
                .iter()
                .find(|d| d.delivery_id == delivery_id)
                .map(|d| d.job_id)
        }))
    }

    async fn queued_jobs(&self) -> Result<HashSet<Uuid>, BrokerError> {
        let state = self.state();
        Ok(state
            .ready
            .iter()
            .map(|d| d.job_id)
            .chain(state.leased.values().map(|l| l.delivery.job_id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::domain::payload::Payload;

    fn delivery(input: &str) -> Delivery {
        Delivery::new(Uuid::new_v4(), Payload::new(input))
    }

    #[tokio::test]
    async fn test_lease_is_fifo_and_counts_attempts() {
        let broker = InMemoryBroker::new();
        let first = delivery("first");
        let second = delivery("second");
        broker.publish(first.clone()).await.unwrap();
        broker.publish(second.clone()).await.unwrap();

        let leased = broker
            .lease("runner-1", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(leased.delivery_id, first.delivery_id);
        assert_eq!(leased.attempt, 1);
        assert_eq!(broker.depth().await.unwrap(), 2);

        let leased = broker
            .lease("runner-2", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(leased.delivery_id, second.delivery_id);

        assert!(
            broker
                .lease("runner-3", Duration::from_secs(30))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_ack_removes_delivery() {
        let broker = InMemoryBroker::new();
        let d = delivery("x");
        broker.publish(d.clone()).await.unwrap();
        broker.lease("r", Duration::from_secs(30)).await.unwrap();

        assert!(broker.ack(d.delivery_id).await.unwrap());
        assert!(!broker.ack(d.delivery_id).await.unwrap());
        assert_eq!(broker.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expired_lease_is_redelivered() {
        let broker = InMemoryBroker::new();
        let d = delivery("x");
        broker.publish(d.clone()).await.unwrap();

        broker.lease("r", Duration::from_millis(0)).await.unwrap();
        assert!(broker.reclaim_expired(3).await.unwrap().is_empty());

        let again = broker
            .lease("r", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.delivery_id, d.delivery_id);
        assert_eq!(again.attempt, 2);
    }

    #[tokio::test]
    async fn test_exhausted_delivery_is_returned_and_dropped() {
        let broker = InMemoryBroker::new();
        let d = delivery("x");
        broker.publish(d.clone()).await.unwrap();

        broker.lease("r", Duration::from_millis(0)).await.unwrap();
        let exhausted = broker.reclaim_expired(1).await.unwrap();

        assert_eq!(exhausted.len(), 1);
        assert_eq!(exhausted[0].job_id, d.job_id);
        assert_eq!(broker.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_late_ack_after_requeue() {
        let broker = InMemoryBroker::new();
        let d = delivery("x");
        broker.publish(d.clone()).await.unwrap();
        broker.lease("r", Duration::from_millis(0)).await.unwrap();
        broker.reclaim_expired(5).await.unwrap();

        assert!(broker.ack(d.delivery_id).await.unwrap());
        assert!(
            broker
                .lease("r", Duration::from_secs(30))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_job_lookup_follows_the_delivery() {
        let broker = InMemoryBroker::new();
        let ready = delivery("ready");
        let leased = delivery("leased");
        broker.publish(leased.clone()).await.unwrap();
        broker.publish(ready.clone()).await.unwrap();
        broker.lease("r", Duration::from_secs(30)).await.unwrap();

        assert_eq!(
            broker.job_of(leased.delivery_id).await.unwrap(),
            Some(leased.job_id)
        );
        assert_eq!(
            broker.job_of(ready.delivery_id).await.unwrap(),
            Some(ready.job_id)
        );

        let queued = broker.queued_jobs().await.unwrap();
        assert_eq!(queued, HashSet::from([ready.job_id, leased.job_id]));

        broker.ack(leased.delivery_id).await.unwrap();
        assert_eq!(broker.job_of(leased.delivery_id).await.unwrap(), None);
        assert!(!broker.queued_jobs().await.unwrap().contains(&leased.job_id));
    }
}
