//! Job command handlers
//!
//! Submitting, inspecting, waiting on and listing jobs.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use colored::*;
use ember_client::OrchestratorClient;
use ember_core::domain::job::JobStatus;
use ember_core::dto::job::{JobView, SubmitJob};
use tokio::time::{self, Instant};
use uuid::Uuid;

use crate::id_resolver::resolve_job_id;
use crate::types::{IdOrPrefix, Parameter};

/// Submit a job, optionally waiting for its result
pub async fn submit(
    client: &OrchestratorClient,
    input: String,
    params: Vec<Parameter>,
    wait_interval: Option<Duration>,
) -> Result<()> {
    let mut req = SubmitJob::new(input);
    for param in params {
        req.parameters.insert(param.key, param.value);
    }

    let accepted = match client.submit(&req).await {
        Ok(accepted) => accepted,
        Err(e) if e.is_capacity_error() => {
            bail!("Orchestrator is at capacity, try again later ({})", e)
        }
        Err(e) => return Err(e).context("Failed to submit job"),
    };

    println!(
        "{} Job {} accepted ({})",
        "✓".green(),
        accepted.job_id.to_string().cyan(),
        colorize_status(accepted.status)
    );

    match wait_interval {
        Some(interval) => wait_for(client, accepted.job_id, interval, None).await,
        None => Ok(()),
    }
}

/// Get and display a single job
pub async fn status(client: &OrchestratorClient, id: &str) -> Result<()> {
    let job_id = resolve_job_id(client, &IdOrPrefix::parse(id)).await?;
    let job = fetch(client, job_id).await?;

    print_job_details(&job);

    Ok(())
}

/// Resolve an identifier and poll it until it finishes
pub async fn wait(
    client: &OrchestratorClient,
    id: &str,
    interval: Duration,
    timeout: Option<Duration>,
) -> Result<()> {
    let job_id = resolve_job_id(client, &IdOrPrefix::parse(id)).await?;
    wait_for(client, job_id, interval, timeout).await
}

/// List recent jobs
pub async fn list(
    client: &OrchestratorClient,
    status: Option<JobStatus>,
    limit: usize,
) -> Result<()> {
    let jobs = client.list_jobs(status, limit).await?;

    if jobs.is_empty() {
        println!("{}", "No jobs found.".yellow());
    } else {
        println!("{}", format!("Found {} job(s):", jobs.len()).bold());
        println!();
        for job in jobs {
            print_job_summary(&job);
        }
    }

    Ok(())
}

async fn wait_for(
    client: &OrchestratorClient,
    job_id: Uuid,
    interval: Duration,
    timeout: Option<Duration>,
) -> Result<()> {
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut last_status = None;

    loop {
        let job = fetch(client, job_id).await?;

        if last_status != Some(job.status) {
            println!("  {} {}", "▸".cyan(), colorize_status(job.status));
            last_status = Some(job.status);
        }

        if job.status.is_terminal() {
            println!();
            print_job_details(&job);
            if job.status == JobStatus::Failed {
                bail!("Job {} failed", job_id);
            }
            return Ok(());
        }

        if deadline.is_some_and(|d| Instant::now() >= d) {
            bail!("Timed out waiting for job {} (still {})", job_id, job.status);
        }

        time::sleep(interval).await;
    }
}

async fn fetch(client: &OrchestratorClient, job_id: Uuid) -> Result<JobView> {
    match client.get_status(job_id).await {
        Ok(job) => Ok(job),
        Err(e) if e.is_not_found() => bail!("Job {} not found", job_id),
        Err(e) => Err(e).context("Failed to fetch job status"),
    }
}

/// Print a one-entry summary for job listings
fn print_job_summary(job: &JobView) {
    println!("  {} Job {}", "▸".cyan(), job.job_id.to_string().dimmed());
    println!("    Status:   {}", colorize_status(job.status));
    println!(
        "    Created:  {}",
        job.created_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();
}

/// Print detailed job information
fn print_job_details(job: &JobView) {
    println!("{}", "Job Details:".bold());
    println!("  ID:          {}", job.job_id.to_string().cyan());
    println!("  Status:      {}", colorize_status(job.status));
    println!(
        "  Created:     {}",
        job.created_at.format("%Y-%m-%d %H:%M:%S")
    );

    if let Some(started) = job.started_at {
        println!("  Started:     {}", started.format("%Y-%m-%d %H:%M:%S"));
    }

    if let Some(completed) = job.completed_at {
        println!("  Completed:   {}", completed.format("%Y-%m-%d %H:%M:%S"));

        let since = job.started_at.unwrap_or(job.created_at);
        let millis = completed.signed_duration_since(since).num_milliseconds();
        println!("  Duration:    {:.2}s", millis as f64 / 1000.0);
    }

    if let Some(result) = &job.result {
        println!("\n{}", "Result:".bold());
        println!("{}", result);
    }

    if let Some(error) = &job.error {
        println!("\n{}", "Error:".bold());
        println!("{}", error.red());
    }
}

/// Colorize job status for display
fn colorize_status(status: JobStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        JobStatus::Pending => label.yellow(),
        JobStatus::Processing => label.cyan(),
        JobStatus::Completed => label.green(),
        JobStatus::Failed => label.red(),
    }
}
