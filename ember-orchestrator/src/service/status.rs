//! Status Query Service
//!
//! Read-only access to job snapshots for pollers.

use std::sync::Arc;

use ember_core::domain::job::{JobRecord, JobStatus};
use uuid::Uuid;

use super::dispatcher::JobError;
use crate::repository::{JobStore, StoreError};

/// Pure read path over the job store
#[derive(Clone)]
pub struct StatusQuery {
    store: Arc<JobStore>,
}

impl StatusQuery {
    pub fn new(store: Arc<JobStore>) -> Self {
        Self { store }
    }

    /// Current snapshot of one job
    pub fn get(&self, id: Uuid) -> Result<JobRecord, JobError> {
        self.store.get(id).map_err(|e| match e {
            StoreError::NotFound(id) | StoreError::InvalidTransition { id, .. } => {
                JobError::NotFound(id)
            }
        })
    }

    /// Most recent jobs first, optionally filtered by status
    pub fn list(&self, status: Option<JobStatus>, limit: usize, offset: usize) -> Vec<JobRecord> {
        self.store.list(status, limit, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::domain::job::JobChange;
    use ember_core::domain::payload::Payload;

    #[test]
    fn test_get_has_no_side_effects() {
        let store = Arc::new(JobStore::new());
        let query = StatusQuery::new(Arc::clone(&store));
        let id = store.create(Payload::new("hello"));
        store.update(id, JobChange::Start).unwrap();
        store
            .update(id, JobChange::Complete("HELLO".to_string()))
            .unwrap();

        let first = query.get(id).unwrap();
        let second = query.get(id).unwrap();
        assert_eq!(first, second);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unknown_id() {
        let query = StatusQuery::new(Arc::new(JobStore::new()));
        let id = Uuid::new_v4();
        assert!(matches!(query.get(id), Err(JobError::NotFound(missing)) if missing == id));
    }
}
