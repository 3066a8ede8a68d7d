//! Validation errors shared by every service boundary

use thiserror::Error;

/// Submission rejected before any job is created
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("No input provided")]
    MissingInput,

    #[error("Input cannot be empty")]
    EmptyInput,

    #[error("Input is too long ({len} characters, max {max})")]
    InputTooLong { len: usize, max: usize },

    #[error("Malformed request: {0}")]
    Malformed(String),
}
