//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services sit between the HTTP handlers and the job store / execution
//! backend, and own the submission rules.

pub mod dispatcher;
pub mod housekeeping;
pub mod status;

// Re-export for convenience
pub use dispatcher::{Dispatcher, JobError};
pub use status::StatusQuery;
