//! ID resolver module
//!
//! Resolves job ID prefixes to full UUIDs by listing recent jobs, so users
//! can type the first few characters of an identifier.

use anyhow::{Context, Result, anyhow};
use ember_client::OrchestratorClient;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// How many recent jobs are searched for a prefix match
const RESOLVE_WINDOW: usize = 500;

/// Resolve a job ID or prefix to a full UUID
///
/// If the input is already a full UUID, returns it immediately without
/// contacting the orchestrator.
///
/// # Errors
/// Returns an error if:
/// - No recent job matches the prefix
/// - Multiple jobs match the prefix (ambiguous)
/// - API call fails
pub async fn resolve_job_id(client: &OrchestratorClient, id_or_prefix: &IdOrPrefix) -> Result<Uuid> {
    let prefix = match id_or_prefix {
        IdOrPrefix::Full(uuid) => return Ok(*uuid),
        IdOrPrefix::Prefix(prefix) => prefix,
    };

    let jobs = client
        .list_jobs(None, RESOLVE_WINDOW)
        .await
        .context("Failed to fetch jobs for ID resolution")?;

    match_prefix(jobs.iter().map(|j| j.job_id), prefix)
}

fn match_prefix(ids: impl Iterator<Item = Uuid>, prefix: &str) -> Result<Uuid> {
    let matches: Vec<Uuid> = ids
        .filter(|id| id.to_string().starts_with(prefix))
        .collect();

    match matches.as_slice() {
        [] => Err(anyhow!("No job found with ID starting with '{}'", prefix)),
        [id] => Ok(*id),
        _ => {
            let ids: Vec<String> = matches.iter().map(Uuid::to_string).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple jobs: {}",
                prefix,
                ids.join(", ")
            ))
        }
    }
}
