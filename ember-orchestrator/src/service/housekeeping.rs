//! Background maintenance loops
//!
//! Retention eviction for terminal records and the supervisory sweep of
//! the distributed queue. Both run on fixed intervals for the life of the
//! process.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info};

use crate::backend::DistributedBackend;
use crate::repository::JobStore;

/// Periodically evict terminal records older than `retention`
pub fn spawn_retention(
    store: Arc<JobStore>,
    retention: Duration,
    interval: Duration,
) -> JoinHandle<()> {
    info!(
        "Starting retention loop (retention: {:?}, interval: {:?})",
        retention, interval
    );

    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        loop {
            ticker.tick().await;
            evict_once(&store, retention);
        }
    })
}

fn evict_once(store: &JobStore, retention: Duration) -> usize {
    let Ok(window) = chrono::Duration::from_std(retention) else {
        return 0;
    };

    let evicted = store.evict_terminal(Utc::now() - window);
    if evicted > 0 {
        info!("Evicted {} finished jobs, {} remain", evicted, store.len());
    } else {
        debug!("Nothing to evict ({} jobs held)", store.len());
    }
    evicted
}

/// Periodically reclaim expired leases and fail stuck jobs
pub fn spawn_sweeper(backend: Arc<DistributedBackend>, interval: Duration) -> JoinHandle<()> {
    info!("Starting queue sweeper (interval: {:?})", interval);

    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = backend.sweep().await {
                error!("Queue sweep failed: {}", e);
            }
        }
    })
}
