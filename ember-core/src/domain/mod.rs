//! Core domain types
//!
//! This module contains the core domain structures used across Ember services.
//! They are shared between the orchestrator (which owns the job table) and
//! runners (which execute deliveries and report outcomes).

pub mod delivery;
pub mod job;
pub mod payload;
