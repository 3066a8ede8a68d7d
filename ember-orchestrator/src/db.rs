//! Database setup for the durable delivery broker

use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Deliveries waiting for, or leased by, the worker fleet
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_deliveries (
            delivery_id UUID PRIMARY KEY,
            job_id UUID NOT NULL,
            payload JSONB NOT NULL,
            attempt INTEGER NOT NULL DEFAULT 0,
            enqueued_at TIMESTAMPTZ NOT NULL,
            leased_by VARCHAR(255),
            lease_expires_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_job_deliveries_ready ON job_deliveries(enqueued_at) WHERE lease_expires_at IS NULL",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_job_deliveries_lease ON job_deliveries(lease_expires_at)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
