//! Runner configuration
//!
//! Defines all configurable parameters for the runner including
//! polling interval, parallelism, and orchestrator connection settings.

use std::time::Duration;

use ember_client::WorkerKind;

/// Runner configuration
///
/// All timeouts and intervals are configurable to allow tuning
/// for different deployment scenarios (dev vs prod, CPU vs GPU hosts).
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique identifier for this runner instance
    pub runner_id: String,

    /// Orchestrator base URL (e.g., "http://localhost:8080")
    pub orchestrator_url: String,

    /// How often to poll the orchestrator for new deliveries
    pub poll_interval: Duration,

    /// Maximum time a job can run before timing out
    pub job_timeout: Duration,

    /// Max parallel jobs the runner can handle
    pub max_parallel_jobs: usize,

    /// Worker implementation
    pub worker_kind: WorkerKind,

    /// Inference service endpoint for the http worker
    pub inference_url: Option<String>,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(runner_id: String, orchestrator_url: String) -> Self {
        Self {
            runner_id,
            orchestrator_url,
            poll_interval: Duration::from_millis(1000),
            job_timeout: Duration::from_secs(300), // 5 minutes
            max_parallel_jobs: 2,
            worker_kind: WorkerKind::Echo,
            inference_url: None,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - RUNNER_ID (required)
    /// - ORCHESTRATOR_URL (required)
    /// - POLL_INTERVAL_MS (optional, default: 1000)
    /// - JOB_TIMEOUT_SECS (optional, default: 300)
    /// - MAX_PARALLEL_JOBS (optional, default: 2)
    /// - WORKER_KIND (optional, echo | http, default: echo)
    /// - INFERENCE_URL (required for the http worker)
    pub fn from_env() -> anyhow::Result<Self> {
        let runner_id = std::env::var("RUNNER_ID")
            .map_err(|_| anyhow::anyhow!("RUNNER_ID environment variable not set"))?;

        let orchestrator_url = std::env::var("ORCHESTRATOR_URL")
            .map_err(|_| anyhow::anyhow!("ORCHESTRATOR_URL environment variable not set"))?;

        let poll_interval = std::env::var("POLL_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(1000));

        let job_timeout = std::env::var("JOB_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(300));

        let max_parallel_jobs = std::env::var("MAX_PARALLEL_JOBS")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(2);

        let worker_kind = match std::env::var("WORKER_KIND") {
            Ok(s) => s.parse().map_err(anyhow::Error::msg)?,
            Err(_) => WorkerKind::Echo,
        };

        let inference_url = std::env::var("INFERENCE_URL")
            .ok()
            .filter(|s| !s.is_empty());

        Ok(Self {
            runner_id,
            orchestrator_url,
            poll_interval,
            job_timeout,
            max_parallel_jobs,
            worker_kind,
            inference_url,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.runner_id.is_empty() {
            anyhow::bail!("runner_id cannot be empty");
        }

        if self.orchestrator_url.is_empty() {
            anyhow::bail!("orchestrator_url cannot be empty");
        }

        if !self.orchestrator_url.starts_with("http://")
            && !self.orchestrator_url.starts_with("https://")
        {
            anyhow::bail!("orchestrator_url must start with http:// or https://");
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.job_timeout.is_zero() {
            anyhow::bail!("job_timeout must be greater than 0");
        }

        if self.max_parallel_jobs == 0 {
            anyhow::bail!("max_parallel_jobs must be greater than 0");
        }

        if self.worker_kind == WorkerKind::Http && self.inference_url.is_none() {
            anyhow::bail!("INFERENCE_URL is required when WORKER_KIND=http");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(
            format!("runner-{}", uuid::Uuid::new_v4()),
            "http://localhost:8080".to_string(),
        )
    }
}
