//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod health;
mod job;

use std::time::Duration;

use anyhow::Result;
use clap::Subcommand;
use ember_core::domain::job::JobStatus;

use crate::config::Config;
use crate::types::Parameter;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Submit a job and print its identifier
    Submit {
        /// Input text handed to the worker
        input: String,

        /// Extra worker parameter, repeatable (e.g. -p style=formal)
        #[arg(short, long = "param", value_name = "KEY=VALUE")]
        params: Vec<Parameter>,

        /// Wait for the job to finish and print the result
        #[arg(short, long)]
        wait: bool,

        /// Poll interval in milliseconds when waiting
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
    },
    /// Show the current status of a job
    Status {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// Poll a job until it completes or fails
    Wait {
        /// Job ID or unambiguous prefix
        id: String,

        /// Poll interval in milliseconds
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,

        /// Give up after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// List recent jobs
    List {
        /// Only show jobs in this status
        #[arg(short, long)]
        status: Option<JobStatus>,

        /// Maximum number of jobs to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Check that the orchestrator is up
    Health,
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        Commands::Submit {
            input,
            params,
            wait,
            interval_ms,
        } => {
            let interval = wait.then(|| Duration::from_millis(interval_ms));
            job::submit(&client, input, params, interval).await
        }
        Commands::Status { id } => job::status(&client, &id).await,
        Commands::Wait {
            id,
            interval_ms,
            timeout_secs,
        } => {
            job::wait(
                &client,
                &id,
                Duration::from_millis(interval_ms),
                timeout_secs.map(Duration::from_secs),
            )
            .await
        }
        Commands::List { status, limit } => job::list(&client, status, limit).await,
        Commands::Health => health::check(&client).await,
    }
}
