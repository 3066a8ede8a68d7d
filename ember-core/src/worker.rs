//! Worker capability
//!
//! The worker function is the external capability (an inference model in
//! production) that turns a payload into a result. It is created once at
//! process startup and shared by every execution slot.
//!
//! Calls are synchronous and may be slow or CPU bound; backends never call
//! [`Worker::process`] on an async thread, see [`crate::execution`].

use std::sync::{Mutex, PoisonError};

use thiserror::Error;

use crate::domain::payload::Payload;

/// Errors a worker function may report for one payload
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    #[error("{0}")]
    Failed(String),

    #[error("inference backend unavailable: {0}")]
    Unavailable(String),

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },
}

/// Opaque `process(payload) -> result | error` capability
///
/// Implementations must tolerate concurrent calls from several execution
/// slots. Capabilities that cannot should be wrapped in [`Exclusive`].
pub trait Worker: Send + Sync {
    /// Short name used in logs and health output
    fn name(&self) -> &str;

    /// Transform the payload into its result
    fn process(&self, payload: &Payload) -> Result<String, WorkerError>;
}

/// Worker backed by a plain function or closure
pub struct FnWorker<F> {
    name: String,
    func: F,
}

impl<F> FnWorker<F>
where
    F: Fn(&Payload) -> Result<String, WorkerError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Worker for FnWorker<F>
where
    F: Fn(&Payload) -> Result<String, WorkerError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, payload: &Payload) -> Result<String, WorkerError> {
        (self.func)(payload)
    }
}

/// Serializes access to a capability that is not safe to call concurrently
///
/// Only one call runs at a time; other slots wait on the mutex. A panic in
/// a previous call does not poison later ones.
pub struct Exclusive<F> {
    name: String,
    inner: Mutex<F>,
}

impl<F> Exclusive<F>
where
    F: FnMut(&Payload) -> Result<String, WorkerError> + Send,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(func),
        }
    }
}

impl<F> Worker for Exclusive<F>
where
    F: FnMut(&Payload) -> Result<String, WorkerError> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, payload: &Payload) -> Result<String, WorkerError> {
        let mut func = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        (*func)(payload)
    }
}

/// Development stand-in for a real model: returns the trimmed input
#[derive(Debug, Default, Clone)]
pub struct EchoWorker;

impl Worker for EchoWorker {
    fn name(&self) -> &str {
        "echo"
    }

    fn process(&self, payload: &Payload) -> Result<String, WorkerError> {
        Ok(payload.input.trim().to_string())
    }
}
