use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod backend;
pub mod config;
pub mod db;
pub mod repository;
pub mod service;

use crate::api::AppState;
use crate::backend::{
    BackendKind, CooperativeBackend, DistributedBackend, ExecutionBackend, WorkerPoolBackend,
};
use crate::config::Config;
use crate::repository::{Broker, InMemoryBroker, JobStore, PgBroker};
use crate::service::{Dispatcher, StatusQuery, housekeeping};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ember_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    tracing::info!(
        "Starting Ember Orchestrator ({} backend)...",
        config.backend
    );

    let store = Arc::new(JobStore::new());
    let mut queue = None;

    let backend: Arc<dyn ExecutionBackend> = match config.backend {
        BackendKind::WorkerPool => {
            let worker = ember_client::build_worker(
                config.worker_kind,
                config.inference_url.as_deref(),
                config.job_timeout,
                tokio::runtime::Handle::current(),
            )
            .context("Failed to build worker")?;

            Arc::new(WorkerPoolBackend::spawn(
                Arc::clone(&store),
                worker,
                config.backend_settings(),
            ))
        }
        BackendKind::Cooperative => {
            let worker = ember_client::build_worker(
                config.worker_kind,
                config.inference_url.as_deref(),
                config.job_timeout,
                tokio::runtime::Handle::current(),
            )
            .context("Failed to build worker")?;

            Arc::new(
                CooperativeBackend::start(
                    Arc::clone(&store),
                    worker,
                    config.backend_settings(),
                )
                .context("Failed to start cooperative scheduler")?,
            )
        }
        BackendKind::Distributed => {
            let broker = connect_broker(&config).await?;
            let distributed = Arc::new(DistributedBackend::new(
                Arc::clone(&store),
                broker,
                config.queue_settings(),
            ));

            housekeeping::spawn_sweeper(Arc::clone(&distributed), config.sweep_interval());
            queue = Some(Arc::clone(&distributed));
            distributed
        }
    };

    if let Some(retention) = config.job_retention {
        housekeeping::spawn_retention(
            Arc::clone(&store),
            retention,
            config.housekeeping_interval,
        );
    }

    let state = AppState {
        dispatcher: Arc::new(Dispatcher::new(
            Arc::clone(&store),
            backend,
            config.max_input_chars,
        )),
        status: StatusQuery::new(Arc::clone(&store)),
        queue,
        service_name: Arc::from(config.service_name.as_str()),
    };

    // Build router with all API endpoints
    let app = api::create_router(state);

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Orchestrator stopped");
    Ok(())
}

/// Durable broker when a database is configured, in-memory otherwise
async fn connect_broker(config: &Config) -> anyhow::Result<Arc<dyn Broker>> {
    let Some(database_url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set, queued jobs will not survive a restart");
        return Ok(Arc::new(InMemoryBroker::new()));
    };

    tracing::info!("Connecting to database...");

    let pool = db::create_pool(database_url)
        .await
        .context("Failed to create database pool")?;

    tracing::info!("Database connection pool created");

    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    Ok(Arc::new(PgBroker::new(pool)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
