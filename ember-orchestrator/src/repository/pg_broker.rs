//! PostgreSQL Broker
//!
//! Durable delivery queue on the `job_deliveries` table. Leasing uses
//! `FOR UPDATE SKIP LOCKED` so concurrent lease requests never hand one
//! delivery to two runners.
//!
//! Job records live in the orchestrator's memory, so a table belongs to
//! exactly one orchestrator process. Deliveries left over from a previous
//! process are discarded when leased because their jobs are unknown.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ember_core::domain::delivery::Delivery;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use super::broker::{Broker, BrokerError};

/// Broker backed by a PostgreSQL table
#[derive(Debug, Clone)]
pub struct PgBroker {
    pool: PgPool,
}

impl PgBroker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Broker for PgBroker {
    async fn publish(&self, delivery: Delivery) -> Result<(), BrokerError> {
        let payload = serde_json::to_value(&delivery.payload).map_err(|e| BrokerError::Corrupt {
            id: delivery.delivery_id,
            reason: e.to_string(),
        })?;

        sqlx::query(
            r#"
            INSERT INTO job_deliveries (delivery_id, job_id, payload, attempt, enqueued_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(delivery.delivery_id)
        .bind(delivery.job_id)
        .bind(payload)
        .bind(delivery.attempt as i32)
        .bind(delivery.enqueued_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn lease(
        &self,
        runner_id: &str,
        visibility: Duration,
    ) -> Result<Option<Delivery>, BrokerError> {
        let row = sqlx::query_as::<_, DeliveryRow>(
            r#"
            UPDATE job_deliveries
            SET attempt = attempt + 1,
                leased_by = $1,
                lease_expires_at = NOW() + make_interval(secs => $2)
            WHERE delivery_id = (
                SELECT delivery_id
                FROM job_deliveries
                WHERE lease_expires_at IS NULL
                ORDER BY enqueued_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING delivery_id, job_id, payload, attempt, enqueued_at
            "#,
        )
        .bind(runner_id)
        .bind(visibility.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Delivery::try_from).transpose()
    }

    async fn ack(&self, delivery_id: Uuid) -> Result<bool, BrokerError> {
        let result = sqlx::query("DELETE FROM job_deliveries WHERE delivery_id = $1")
            .bind(delivery_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn reclaim_expired(&self, max_attempts: u32) -> Result<Vec<Delivery>, BrokerError> {
        let mut tx = self.pool.begin().await?;

        let exhausted = sqlx::query_as::<_, DeliveryRow>(
            r#"
            DELETE FROM job_deliveries
            WHERE lease_expires_at < NOW() AND attempt >= $1
            RETURNING delivery_id, job_id, payload, attempt, enqueued_at
            "#,
        )
        .bind(max_attempts as i32)
        .fetch_all(&mut *tx)
        .await?;

        let requeued = sqlx::query(
            r#"
            UPDATE job_deliveries
            SET leased_by = NULL, lease_expires_at = NULL
            WHERE lease_expires_at < NOW()
            "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        if requeued.rows_affected() > 0 {
            warn!(
                "Requeued {} deliveries with expired leases",
                requeued.rows_affected()
            );
        }

        exhausted.into_iter().map(Delivery::try_from).collect()
    }

    async fn depth(&self) -> Result<usize, BrokerError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM job_deliveries")
            .fetch_one(&self.pool)
            .await?;

        Ok(count.max(0) as usize)
    }

    async fn job_of(&self, delivery_id: Uuid) -> Result<Option<Uuid>, BrokerError> {
        let job_id: Option<Uuid> =
            sqlx::query_scalar("SELECT job_id FROM job_deliveries WHERE delivery_id = $1")
                .bind(delivery_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(job_id)
    }

    async fn queued_jobs(&self) -> Result<HashSet<Uuid>, BrokerError> {
        let job_ids: Vec<Uuid> = sqlx::query_scalar("SELECT job_id FROM job_deliveries")
            .fetch_all(&self.pool)
            .await?;

        Ok(job_ids.into_iter().collect())
    }
}

// ============================================================================
// Database Row Mapping
// ============================================================================

#[derive(sqlx::FromRow)]
struct DeliveryRow {
    delivery_id: Uuid,
    job_id: Uuid,
    payload: serde_json::Value,
    attempt: i32,
    enqueued_at: DateTime<Utc>,
}

impl TryFrom<DeliveryRow> for Delivery {
    type Error = BrokerError;

    fn try_from(row: DeliveryRow) -> Result<Self, Self::Error> {
        let payload = serde_json::from_value(row.payload).map_err(|e| BrokerError::Corrupt {
            id: row.delivery_id,
            reason: e.to_string(),
        })?;

        Ok(Delivery {
            delivery_id: row.delivery_id,
            job_id: row.job_id,
            payload,
            attempt: row.attempt.max(0) as u32,
            enqueued_at: row.enqueued_at,
        })
    }
}
