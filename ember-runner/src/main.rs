//! Ember Runner
//!
//! A stateless worker process for the distributed execution backend.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Worker: The inference capability, built once at startup
//! - Scheduler: Delivery leasing, execution and outcome reporting
//!
//! The runner leases deliveries from the orchestrator, runs the worker
//! function on its blocking pool, and reports each outcome back. It never
//! touches job state directly.

mod config;
mod scheduler;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::scheduler::JobPoller;
use ember_client::OrchestratorClient;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ember_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Ember Runner");

    // Load configuration
    let config = load_config()?;
    info!(
        "Loaded configuration: runner_id={}, orchestrator_url={}",
        config.runner_id, config.orchestrator_url
    );

    // Initialize orchestrator client
    let client = Arc::new(OrchestratorClient::new(config.orchestrator_url.clone()));

    // Build the worker once; every job shares it
    let worker = ember_client::build_worker(
        config.worker_kind,
        config.inference_url.as_deref(),
        config.job_timeout,
        tokio::runtime::Handle::current(),
    )
    .context("Failed to build worker")?;

    info!("Worker '{}' ready", worker.name());

    // Wait for the orchestrator (with retry logic)
    wait_for_orchestrator(&client).await?;

    // Create job poller
    let poller = JobPoller::new(config.clone(), client, worker);

    info!(
        "Runner initialized successfully (poll interval: {:?})",
        config.poll_interval
    );

    // Start polling loop
    if let Err(e) = poller.run(shutdown_signal()).await {
        error!("Poller error: {}", e);
        return Err(e);
    }

    info!("Runner stopped");
    Ok(())
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    match Config::from_env() {
        Ok(config) => {
            config.validate()?;
            Ok(config)
        }
        Err(e) => {
            info!("Failed to load config from environment ({}), using defaults", e);
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}

/// Wait for the orchestrator to report healthy, with exponential backoff
///
/// This handles the case where the orchestrator may not be ready yet when
/// the runner starts (common in container environments).
async fn wait_for_orchestrator(client: &OrchestratorClient) -> Result<()> {
    const MAX_RETRIES: u32 = 10;
    const INITIAL_DELAY_MS: u64 = 500;
    const MAX_DELAY_MS: u64 = 30_000;

    let mut attempt = 0;
    let mut delay_ms = INITIAL_DELAY_MS;

    loop {
        attempt += 1;

        match client.health().await {
            Ok(health) => {
                if health.backend != "distributed" {
                    warn!(
                        "Orchestrator '{}' runs the {} backend; no deliveries will arrive",
                        health.service, health.backend
                    );
                }
                if attempt > 1 {
                    info!(
                        "Orchestrator reachable after {} attempt(s)",
                        attempt
                    );
                }
                return Ok(());
            }
            Err(e) => {
                if attempt >= MAX_RETRIES {
                    error!(
                        "Orchestrator unreachable after {} attempts",
                        MAX_RETRIES
                    );
                    return Err(anyhow::anyhow!("Orchestrator is not reachable: {}", e));
                }

                warn!(
                    "Orchestrator not ready (attempt {}/{}): {}",
                    attempt, MAX_RETRIES, e
                );
                warn!("Retrying in {} ms...", delay_ms);

                tokio::time::sleep(Duration::from_millis(delay_ms)).await;

                // Exponential backoff with cap
                delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
            }
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
