//! Repository Module
//!
//! Data access layer for the orchestrator.
//! The job store is the single source of truth for job state; brokers hold
//! deliveries waiting for the worker fleet.

pub mod broker;
pub mod job;
pub mod pg_broker;

// Re-export for convenience
pub use broker::{Broker, BrokerError, InMemoryBroker};
pub use job::{JobStore, StoreError};
pub use pg_broker::PgBroker;
