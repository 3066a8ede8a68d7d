//! Inference service worker
//!
//! Worker implementation that forwards each payload to an external model
//! server over HTTP, plus the factory used by the orchestrator and runner
//! to build their process-wide worker at startup.

use std::sync::Arc;
use std::time::Duration;

use ember_core::domain::payload::Payload;
use ember_core::{EchoWorker, Worker, WorkerError};
use reqwest::Client;
use serde::Deserialize;
use tokio::runtime::Handle;
use tracing::debug;

use crate::error::{ClientError, Result};

/// Worker that calls `POST <endpoint>` with the payload as JSON
///
/// [`Worker::process`] is synchronous and runs on a blocking thread, so the
/// request is driven on the runtime behind `runtime`. Every request is
/// bounded by `timeout`, so a hung inference server cannot pin the thread.
#[derive(Debug, Clone)]
pub struct HttpInferenceWorker {
    endpoint: String,
    client: Client,
    runtime: Handle,
}

#[derive(Debug, Deserialize)]
struct InferenceResponse {
    #[serde(default, alias = "result", alias = "translated_text", alias = "summary_text")]
    output: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl InferenceResponse {
    fn into_output(self) -> std::result::Result<String, WorkerError> {
        match (self.output, self.error) {
            (_, Some(error)) => Err(WorkerError::Failed(error)),
            (Some(output), None) => Ok(output),
            (None, None) => Err(WorkerError::Failed(
                "inference response carried no output".to_string(),
            )),
        }
    }
}

impl HttpInferenceWorker {
    pub fn new(endpoint: impl Into<String>, timeout: Duration, runtime: Handle) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5).min(timeout))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            endpoint: endpoint.into(),
            client,
            runtime,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn infer(&self, payload: &Payload) -> std::result::Result<String, WorkerError> {
        debug!("Forwarding payload to {}", self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .json(payload)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WorkerError::Failed(format!(
                "inference service returned {}: {}",
                status, body
            )));
        }

        response
            .json::<InferenceResponse>()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    request_error(e)
                } else {
                    WorkerError::Failed(format!("invalid inference response: {}", e))
                }
            })?
            .into_output()
    }
}

fn request_error(e: reqwest::Error) -> WorkerError {
    if e.is_timeout() {
        WorkerError::Failed(format!("inference request timed out: {}", e))
    } else {
        WorkerError::Unavailable(e.to_string())
    }
}

impl Worker for HttpInferenceWorker {
    fn name(&self) -> &str {
        "http-inference"
    }

    fn process(&self, payload: &Payload) -> std::result::Result<String, WorkerError> {
        self.runtime.block_on(self.infer(payload))
    }
}

// =============================================================================
// Worker Factory
// =============================================================================

/// Worker implementation selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    /// Returns the input unchanged; for development and smoke tests
    Echo,
    /// Forwards to an inference service
    Http,
}

impl std::fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Echo => "echo",
            Self::Http => "http",
        })
    }
}

impl std::str::FromStr for WorkerKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "echo" => Ok(Self::Echo),
            "http" | "inference" => Ok(Self::Http),
            other => Err(format!("unknown worker kind: {}", other)),
        }
    }
}

/// Build the process-wide worker
///
/// `timeout` bounds each call to the inference service and should match
/// the job timeout of the caller.
pub fn build_worker(
    kind: WorkerKind,
    inference_url: Option<&str>,
    timeout: Duration,
    runtime: Handle,
) -> Result<Arc<dyn Worker>> {
    match kind {
        WorkerKind::Echo => Ok(Arc::new(EchoWorker)),
        WorkerKind::Http => {
            let url = inference_url.ok_or_else(|| {
                ClientError::InvalidRequest("INFERENCE_URL is required for the http worker".into())
            })?;
            Ok(Arc::new(HttpInferenceWorker::new(url, timeout, runtime)?))
        }
    }
}
