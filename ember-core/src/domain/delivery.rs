//! Queue delivery domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::payload::Payload;

/// One attempt to hand a job to the worker fleet
///
/// A job may be delivered more than once (expired lease, runner crash), so
/// `delivery_id` identifies the message while `job_id` identifies the work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub delivery_id: Uuid,
    pub job_id: Uuid,
    pub payload: Payload,
    /// 1-based attempt counter, incremented on every lease
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl Delivery {
    pub fn new(job_id: Uuid, payload: Payload) -> Self {
        Self {
            delivery_id: Uuid::new_v4(),
            job_id,
            payload,
            attempt: 0,
            enqueued_at: Utc::now(),
        }
    }
}
