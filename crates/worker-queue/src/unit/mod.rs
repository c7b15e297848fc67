//! Execution units and the collaborator boundary
//!
//! The pool does not know how an isolated execution unit is created or how
//! calls reach it. It talks to three traits:
//! - [`ExecutionUnitFactory`] - creates units
//! - [`ExecutionUnit`] - the owned handle; adapts itself into a proxy and is
//!   terminated on retirement
//! - [`RemoteProxy`] - forwards named calls to the unit
//!
//! [`LocalUnitFactory`] is an in-process backend where every unit is a
//! dedicated Tokio task reached over a channel.

mod local;
mod proxy;

use std::sync::Arc;

use async_trait::async_trait;

pub use local::{LocalUnitFactory, MethodHandler};
pub use proxy::{CallOptions, InvokeError, RemoteProxy, DEFAULT_CALL_NAME};

/// Errors raised while creating an execution unit
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnitError {
    /// The unit could not be created
    #[error("execution unit creation failed: {0}")]
    Create(String),

    /// The backend is shutting down and refuses new units
    #[error("execution backend is shut down")]
    Shutdown,
}

/// Live handle to one isolated execution unit
///
/// The pool never holds its internal lock while calling into a unit, so
/// `connect` and `terminate` may block briefly or query the pool.
pub trait ExecutionUnit: Send + Sync {
    /// Bind a remote proxy to this unit
    fn connect(&self) -> Arc<dyn RemoteProxy>;

    /// Stop the unit and release its resources
    ///
    /// Must be idempotent. Calls still in flight through the unit's proxy
    /// may fail or complete; the pool does not wait for either.
    fn terminate(&self);
}

/// Creates execution units
#[async_trait]
pub trait ExecutionUnitFactory: Send + Sync + 'static {
    /// Create one isolated execution unit
    async fn create(&self) -> Result<Arc<dyn ExecutionUnit>, UnitError>;
}
