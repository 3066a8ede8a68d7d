//! Execution helper shared by every backend and the runner
//!
//! Runs the worker function on the blocking thread pool of the current
//! runtime, bounded by a timeout, and turns every way it can end (value,
//! error, panic, timeout) into an [`ExecutionResult`].

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::domain::job::JobOutcome;
use crate::domain::payload::Payload;
use crate::worker::Worker;

/// Result of one worker invocation
///
/// Only exists at runtime; it is folded into a [`JobOutcome`] before being
/// stored or sent over the network.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    Success { output: String },
    Failure { error: String },
    Panicked { message: String },
    Timeout { after: Duration },
}

impl ExecutionResult {
    /// Convert into the terminal outcome recorded on the job
    pub fn into_outcome(self) -> JobOutcome {
        match self {
            ExecutionResult::Success { output } => JobOutcome::completed(output),
            ExecutionResult::Failure { error } => JobOutcome::failed(error),
            ExecutionResult::Panicked { message } => {
                JobOutcome::failed(format!("worker panicked: {}", message))
            }
            ExecutionResult::Timeout { after } => JobOutcome::failed(format!(
                "execution timed out after {}s",
                after.as_secs_f64()
            )),
        }
    }
}

/// Run `worker.process(payload)` off the async threads
///
/// `guard` is moved into the blocking closure and dropped only when the
/// call really returns. Backends pass their capacity permit here so a
/// timed-out call keeps its slot until the thread is free again.
pub async fn run_blocking<G>(
    worker: Arc<dyn Worker>,
    payload: Payload,
    timeout: Duration,
    guard: G,
) -> ExecutionResult
where
    G: Send + 'static,
{
    let task = tokio::task::spawn_blocking(move || {
        let _guard = guard;
        worker.process(&payload)
    });

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(Ok(output))) => ExecutionResult::Success { output },
        Ok(Ok(Err(e))) => ExecutionResult::Failure {
            error: e.to_string(),
        },
        Ok(Err(join_error)) => {
            let message = if join_error.is_panic() {
                panic_message(join_error.into_panic())
            } else {
                "worker task was cancelled".to_string()
            };
            ExecutionResult::Panicked { message }
        }
        Err(_) => {
            warn!("Worker call exceeded {:?}, abandoning it", timeout);
            ExecutionResult::Timeout { after: timeout }
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
