//! Job-related API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use ember_core::domain::job::JobStatus;
use ember_core::dto::health::HealthStatus;
use ember_core::dto::job::{JobView, SubmitAccepted, SubmitJob};
use uuid::Uuid;

impl OrchestratorClient {
    // =============================================================================
    // Job Submission & Polling
    // =============================================================================

    /// Submit a job
    ///
    /// Returns as soon as the orchestrator has accepted the job; the result
    /// has to be polled with [`OrchestratorClient::get_status`].
    ///
    /// # Example
    /// ```no_run
    /// # use ember_client::OrchestratorClient;
    /// # use ember_core::dto::job::SubmitJob;
    /// # async fn example() -> anyhow::Result<()> {
    /// let client = OrchestratorClient::new("http://localhost:8080");
    /// let req = SubmitJob::new("Le chat est sur la table");
    /// let accepted = client.submit(&req).await?;
    /// println!("queued as {}", accepted.job_id);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn submit(&self, req: &SubmitJob) -> Result<SubmitAccepted> {
        let url = format!("{}/submit", self.base_url);
        let response = self.client.post(&url).json(req).send().await?;

        self.handle_response(response).await
    }

    /// Get the current status of a job
    pub async fn get_status(&self, job_id: Uuid) -> Result<JobView> {
        let url = format!("{}/status/{}", self.base_url, job_id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// List recent jobs, newest first
    ///
    /// # Arguments
    /// * `status` - Only return jobs in this status
    /// * `limit` - Maximum number of jobs to return
    pub async fn list_jobs(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<JobView>> {
        let url = format!("{}/jobs", self.base_url);
        let mut query = vec![("limit", limit.to_string())];
        if let Some(status) = status {
            query.push(("status", status.to_string()));
        }

        let response = self.client.get(&url).query(&query).send().await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Health
    // =============================================================================

    /// Check that the orchestrator is up
    pub async fn health(&self) -> Result<HealthStatus> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }
}
