//! Health command handler

use anyhow::{Context, Result};
use colored::*;
use ember_client::OrchestratorClient;

pub async fn check(client: &OrchestratorClient) -> Result<()> {
    let health = client
        .health()
        .await
        .with_context(|| format!("Orchestrator at {} is not reachable", client.base_url()))?;

    println!(
        "{} {} is {}",
        "✓".green(),
        health.service.bold(),
        health.status.green()
    );
    println!("  Backend:   {}", health.backend.cyan());
    println!(
        "  Timestamp: {}",
        health
            .timestamp
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );

    Ok(())
}
