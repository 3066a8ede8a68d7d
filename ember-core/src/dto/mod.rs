//! Data Transfer Objects for inter-service communication
//!
//! Request and response bodies exchanged between the orchestrator, runners
//! and the CLI. Domain types stay independent of the HTTP wire format.

pub mod health;
pub mod job;
pub mod queue;
