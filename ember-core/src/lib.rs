//! Ember Core
//!
//! Core types and abstractions for the Ember background job service.
//!
//! This crate contains:
//! - Domain types: Job records, payloads, outcomes and queue deliveries
//! - DTOs: Request/response bodies shared by the orchestrator, runner and CLI
//! - The `Worker` capability and the helper that runs it off the async threads

pub mod domain;
pub mod dto;
pub mod error;
pub mod execution;
pub mod worker;

pub use error::ValidationError;
pub use worker::{EchoWorker, Exclusive, FnWorker, Worker, WorkerError};
