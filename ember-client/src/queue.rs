//! Queue endpoints used by runners

use crate::OrchestratorClient;
use crate::error::Result;
use ember_core::domain::delivery::Delivery;
use ember_core::domain::job::JobOutcome;
use ember_core::dto::queue::{CompleteDelivery, LeaseRequest};
use reqwest::StatusCode;
use uuid::Uuid;

impl OrchestratorClient {
    // =============================================================================
    // Leasing & Reporting
    // =============================================================================

    /// Lease the next ready delivery
    ///
    /// Returns `None` when the queue is empty.
    pub async fn lease_delivery(&self, runner_id: &str) -> Result<Option<Delivery>> {
        let url = format!("{}/queue/lease", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&LeaseRequest {
                runner_id: runner_id.to_string(),
            })
            .send()
            .await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        self.handle_response(response).await.map(Some)
    }

    /// Report the outcome of a leased delivery
    ///
    /// The orchestrator acknowledges duplicates without applying them, so
    /// reporting twice is harmless.
    pub async fn complete_delivery(
        &self,
        delivery_id: Uuid,
        job_id: Uuid,
        outcome: JobOutcome,
    ) -> Result<()> {
        let url = format!("{}/queue/{}/complete", self.base_url, delivery_id);
        let response = self
            .client
            .post(&url)
            .json(&CompleteDelivery { job_id, outcome })
            .send()
            .await?;

        self.handle_empty_response(response).await
    }
}
