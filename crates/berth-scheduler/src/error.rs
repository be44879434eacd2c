//! Scheduler error types.

use thiserror::Error;

use berth_state::StateError;

use crate::queue::QueueFault;

/// Errors surfaced by the engine's public operations.
///
/// Capacity exhaustion is not an error: an over-sized deployment is
/// persisted as `Rejected` and returned as a normal admission outcome.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// A backing store was unreachable or failed mid-operation. Retryable.
    #[error("transient store fault: {0}")]
    TransientStoreFault(String),
}

impl SchedulerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SchedulerError::TransientStoreFault(_))
    }
}

impl From<StateError> for SchedulerError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::NotFound(what) => SchedulerError::NotFound(what),
            other => SchedulerError::TransientStoreFault(other.to_string()),
        }
    }
}

impl From<QueueFault> for SchedulerError {
    fn from(err: QueueFault) -> Self {
        SchedulerError::TransientStoreFault(err.to_string())
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
