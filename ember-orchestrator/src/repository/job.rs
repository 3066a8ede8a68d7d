//! Job Repository
//!
//! In-memory job table shared by submit handlers, execution backends and
//! status queries.
//!
//! Locking is two-level: the index map is behind a `RwLock` that is only
//! write-locked to insert or evict, and every record has its own `RwLock`.
//! Updates to different jobs therefore only share read access to the index
//! and never contend with each other. No lock is held across an `.await`
//! or across a worker call.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use ember_core::domain::job::{JobChange, JobRecord, JobStatus, TransitionError};
use ember_core::domain::payload::Payload;
use thiserror::Error;
use uuid::Uuid;

/// Store error type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    NotFound(Uuid),

    #[error("job {id}: {source}")]
    InvalidTransition {
        id: Uuid,
        #[source]
        source: TransitionError,
    },
}

type Slot = Arc<RwLock<JobRecord>>;

/// Concurrency-safe repository of job records keyed by id
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<Uuid, Slot>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new pending record and return its id
    ///
    /// The record is visible to `get` as soon as this returns.
    pub fn create(&self, payload: Payload) -> Uuid {
        let mut jobs = write(&self.jobs);
        let mut id = Uuid::new_v4();
        while jobs.contains_key(&id) {
            id = Uuid::new_v4();
        }
        jobs.insert(id, Arc::new(RwLock::new(JobRecord::with_id(id, payload))));
        id
    }

    /// Snapshot of one record
    pub fn get(&self, id: Uuid) -> Result<JobRecord, StoreError> {
        let slot = self.slot(id)?;
        let record = read(&slot).clone();
        Ok(record)
    }

    /// Apply one lifecycle transition and return the updated snapshot
    ///
    /// Unknown ids and disallowed transitions leave every record untouched.
    pub fn update(&self, id: Uuid, change: JobChange) -> Result<JobRecord, StoreError> {
        let slot = self.slot(id)?;
        let mut record = write(&slot);
        record
            .apply(change)
            .map_err(|source| StoreError::InvalidTransition { id, source })?;
        Ok(record.clone())
    }

    /// Number of records currently held
    pub fn len(&self) -> usize {
        read(&self.jobs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshots ordered most recent first, optionally filtered by status
    pub fn list(&self, status: Option<JobStatus>, limit: usize, offset: usize) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = self
            .snapshot_all()
            .into_iter()
            .filter(|job| status.is_none_or(|s| job.status == s))
            .collect();

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.into_iter().skip(offset).take(limit).collect()
    }

    /// Ids of jobs that entered `Processing` before `started_before`
    pub fn stuck(&self, started_before: DateTime<Utc>) -> Vec<Uuid> {
        self.snapshot_all()
            .into_iter()
            .filter(|job| {
                job.status == JobStatus::Processing
                    && job.started_at.is_some_and(|t| t < started_before)
            })
            .map(|job| job.id)
            .collect()
    }

    /// Ids of jobs still `Pending` that were created before `created_before`
    pub fn pending_before(&self, created_before: DateTime<Utc>) -> Vec<Uuid> {
        self.snapshot_all()
            .into_iter()
            .filter(|job| job.status == JobStatus::Pending && job.created_at < created_before)
            .map(|job| job.id)
            .collect()
    }

    /// Drop terminal records that completed before `completed_before`
    ///
    /// Non-terminal records are never evicted. Returns how many were removed.
    pub fn evict_terminal(&self, completed_before: DateTime<Utc>) -> usize {
        let mut jobs = write(&self.jobs);
        let before = jobs.len();
        jobs.retain(|_, slot| {
            let record = read(slot);
            !(record.is_terminal() && record.completed_at.is_some_and(|t| t < completed_before))
        });
        before - jobs.len()
    }

    fn slot(&self, id: Uuid) -> Result<Slot, StoreError> {
        read(&self.jobs)
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    fn snapshot_all(&self) -> Vec<JobRecord> {
        let slots: Vec<Slot> = read(&self.jobs).values().cloned().collect();
        slots.iter().map(|slot| read(slot).clone()).collect()
    }
}

// Critical sections never panic, so a poisoned lock still holds a
// consistent record.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
