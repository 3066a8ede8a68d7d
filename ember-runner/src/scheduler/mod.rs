//! Scheduler layer for the runner
//!
//! This layer handles leasing deliveries from the orchestrator and
//! coordinating their execution, from lease to reported outcome.

pub mod poller;

pub use poller::JobPoller;
