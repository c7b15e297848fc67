//! Error types for pool operations

use crate::unit::{InvokeError, UnitError};

/// Errors surfaced by [`WorkerPoolManager`](crate::WorkerPoolManager)
///
/// Failures coming from the collaborator boundary are carried unmodified:
/// [`PoolError::Invocation`] holds the exact [`InvokeError`] the remote
/// proxy produced and [`PoolError::Materialization`] the factory's error.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Configuration rejected at construction time
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),

    /// The execution-unit factory failed while materializing a slot
    #[error("failed to materialize execution unit: {0}")]
    Materialization(#[source] UnitError),

    /// The remote invocation failed
    #[error("invocation failed: {0}")]
    Invocation(#[source] InvokeError),

    /// The slot was destroyed before the call could be forwarded
    #[error("task was abandoned before invocation (slot {slot_id} destroyed)")]
    Abandoned { slot_id: usize },
}

impl PoolError {
    /// Returns the remote failure, if this error wraps one
    pub fn as_invoke_error(&self) -> Option<&InvokeError> {
        match self {
            Self::Invocation(err) => Some(err),
            _ => None,
        }
    }
}
