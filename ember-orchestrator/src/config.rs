//! Orchestrator configuration
//!
//! Every setting comes from an environment variable with a default, so a
//! bare `ember-orchestrator` starts a worker-pool service on port 8080.

use std::time::Duration;

use ember_client::WorkerKind;

use crate::backend::{AdmissionPolicy, BackendKind, BackendSettings, QueueSettings};

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to
    pub bind_addr: String,

    /// Name reported by `GET /health`
    pub service_name: String,

    /// Execution strategy
    pub backend: BackendKind,

    /// Jobs executing at once (pool and cooperative backends)
    pub worker_slots: usize,

    /// Accepted jobs allowed to wait for a slot
    pub queue_depth: usize,

    /// Behaviour when every slot and backlog entry is taken
    pub admission: AdmissionPolicy,

    /// Maximum time one job may run
    pub job_timeout: Duration,

    /// Longest accepted input, in characters
    pub max_input_chars: usize,

    /// How long finished jobs stay queryable; `None` keeps them forever
    pub job_retention: Option<Duration>,

    /// How often the retention loop runs
    pub housekeeping_interval: Duration,

    /// Worker implementation for in-process backends
    pub worker_kind: WorkerKind,

    /// Inference service endpoint for the http worker
    pub inference_url: Option<String>,

    /// PostgreSQL URL for the durable broker; in-memory broker when unset
    pub database_url: Option<String>,

    /// Lease duration for distributed deliveries
    pub visibility_timeout: Duration,

    /// Leases allowed per delivery before the job is failed
    pub max_delivery_attempts: u32,

    /// Queued deliveries allowed before submissions are refused
    pub max_backlog: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            service_name: "ember-orchestrator".to_string(),
            backend: BackendKind::WorkerPool,
            worker_slots: 4,
            queue_depth: 32,
            admission: AdmissionPolicy::Reject,
            job_timeout: Duration::from_secs(300), // 5 minutes
            max_input_chars: 10_000,
            job_retention: Some(Duration::from_secs(3600)),
            housekeeping_interval: Duration::from_secs(60),
            worker_kind: WorkerKind::Echo,
            inference_url: None,
            database_url: None,
            visibility_timeout: Duration::from_secs(60),
            max_delivery_attempts: 3,
            max_backlog: 1000,
        }
    }
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - BIND_ADDR (default: 0.0.0.0:8080)
    /// - SERVICE_NAME (default: ember-orchestrator)
    /// - EXECUTION_BACKEND: pool | cooperative | distributed (default: pool)
    /// - WORKER_SLOTS (default: 4)
    /// - QUEUE_DEPTH (default: 32)
    /// - ADMISSION_POLICY: reject | block (default: reject)
    /// - ADMISSION_TIMEOUT_MS (default: 1000, block policy only)
    /// - JOB_TIMEOUT_SECS (default: 300)
    /// - MAX_INPUT_CHARS (default: 10000)
    /// - JOB_RETENTION_SECS (default: 3600, 0 disables eviction)
    /// - HOUSEKEEPING_INTERVAL_SECS (default: 60)
    /// - WORKER_KIND: echo | http (default: echo)
    /// - INFERENCE_URL
    /// - DATABASE_URL
    /// - VISIBILITY_TIMEOUT_SECS (default: 60)
    /// - MAX_DELIVERY_ATTEMPTS (default: 3)
    /// - MAX_BACKLOG (default: 1000)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from any key/value source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let number = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());
        let secs = |key: &str, default: Duration| {
            number(key).map(Duration::from_secs).unwrap_or(default)
        };

        let backend = match lookup("EXECUTION_BACKEND") {
            Some(s) => s.parse().map_err(anyhow::Error::msg)?,
            None => defaults.backend,
        };

        let worker_kind = match lookup("WORKER_KIND") {
            Some(s) => s.parse().map_err(anyhow::Error::msg)?,
            None => defaults.worker_kind,
        };

        let admission = match lookup("ADMISSION_POLICY").as_deref().map(str::trim) {
            None | Some("reject") => AdmissionPolicy::Reject,
            Some("block") => AdmissionPolicy::Block {
                timeout: number("ADMISSION_TIMEOUT_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(Duration::from_millis(1000)),
            },
            Some(other) => anyhow::bail!("unknown admission policy: {}", other),
        };

        let job_retention = match number("JOB_RETENTION_SECS") {
            Some(0) => None,
            Some(s) => Some(Duration::from_secs(s)),
            None => defaults.job_retention,
        };

        Ok(Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or(defaults.bind_addr),
            service_name: lookup("SERVICE_NAME").unwrap_or(defaults.service_name),
            backend,
            worker_slots: number("WORKER_SLOTS")
                .map(|n| n as usize)
                .unwrap_or(defaults.worker_slots),
            queue_depth: number("QUEUE_DEPTH")
                .map(|n| n as usize)
                .unwrap_or(defaults.queue_depth),
            admission,
            job_timeout: secs("JOB_TIMEOUT_SECS", defaults.job_timeout),
            max_input_chars: number("MAX_INPUT_CHARS")
                .map(|n| n as usize)
                .unwrap_or(defaults.max_input_chars),
            job_retention,
            housekeeping_interval: secs(
                "HOUSEKEEPING_INTERVAL_SECS",
                defaults.housekeeping_interval,
            ),
            worker_kind,
            inference_url: lookup("INFERENCE_URL").filter(|s| !s.is_empty()),
            database_url: lookup("DATABASE_URL").filter(|s| !s.is_empty()),
            visibility_timeout: secs("VISIBILITY_TIMEOUT_SECS", defaults.visibility_timeout),
            max_delivery_attempts: number("MAX_DELIVERY_ATTEMPTS")
                .map(|n| n as u32)
                .unwrap_or(defaults.max_delivery_attempts),
            max_backlog: number("MAX_BACKLOG")
                .map(|n| n as usize)
                .unwrap_or(defaults.max_backlog),
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if self.job_timeout.is_zero() {
            anyhow::bail!("job_timeout must be greater than 0");
        }

        if self.max_input_chars == 0 {
            anyhow::bail!("max_input_chars must be greater than 0");
        }

        if self.housekeeping_interval.is_zero() {
            anyhow::bail!("housekeeping_interval must be greater than 0");
        }

        match self.backend {
            BackendKind::WorkerPool | BackendKind::Cooperative => {
                if self.worker_slots == 0 {
                    anyhow::bail!("worker_slots must be greater than 0");
                }

                if self.worker_kind == WorkerKind::Http && self.inference_url.is_none() {
                    anyhow::bail!("INFERENCE_URL is required when WORKER_KIND=http");
                }
            }
            BackendKind::Distributed => {
                if self.visibility_timeout.is_zero() {
                    anyhow::bail!("visibility_timeout must be greater than 0");
                }

                if self.max_delivery_attempts == 0 {
                    anyhow::bail!("max_delivery_attempts must be greater than 0");
                }

                if self.max_backlog == 0 {
                    anyhow::bail!("max_backlog must be greater than 0");
                }
            }
        }

        Ok(())
    }

    pub fn backend_settings(&self) -> BackendSettings {
        BackendSettings {
            slots: self.worker_slots,
            queue_depth: self.queue_depth,
            admission: self.admission,
            job_timeout: self.job_timeout,
        }
    }

    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            visibility_timeout: self.visibility_timeout,
            max_attempts: self.max_delivery_attempts,
            max_backlog: self.max_backlog,
            job_timeout: self.job_timeout,
        }
    }

    /// Sweep often enough to notice an expired lease within half its length
    pub fn sweep_interval(&self) -> Duration {
        (self.visibility_timeout / 2).max(Duration::from_secs(1))
    }
}
