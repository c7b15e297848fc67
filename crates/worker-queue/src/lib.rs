//! # Worker Queue
//!
//! A bounded pool manager that dispatches work to a fixed set of isolated,
//! stateful execution units and governs how many of them may be busy at once,
//! per pool and across every pool in the process.
//!
//! ## Features
//!
//! - **Lazy or eager materialization**: execution units are created on first use or up front
//! - **Idle retirement**: units that sit idle for the destroy timer are terminated
//! - **Targeted teardown**: tear down the unit serving a given correlation id
//! - **Global admission cap**: independent pools share a process-wide busy-slot limit
//! - **Priority bypass**: latency-sensitive pools or tasks can skip the shared cap
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   AdmissionRegistry                          │
//! │  (process-wide busy counts per pool, mutable global cap)    │
//! └─────────────────────────────────────────────────────────────┘
//!                 ▲                              ▲
//!                 │ try_admit / update           │
//! ┌───────────────┴──────────────┐ ┌─────────────┴──────────────┐
//! │      WorkerPoolManager       │ │     WorkerPoolManager      │
//! │  [Slot 1] [Slot 2] ... [N]   │ │  [Slot 1] ... [M]          │
//! └───────────────┬──────────────┘ └─────────────┬──────────────┘
//!                 │ create / connect / invoke    │
//!                 ▼                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │          ExecutionUnitFactory / ExecutionUnit / RemoteProxy │
//! │  (isolated workers reached through an RPC-style proxy)      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use worker_queue::prelude::*;
//!
//! let factory = LocalUnitFactory::new()
//!     .with_method("exec", |payload| async move {
//!         Ok(json!({ "echo": payload }))
//!     });
//!
//! let pool = WorkerPoolManager::new(
//!     Arc::new(factory),
//!     WorkerPoolConfig::new(4).with_destroy_timer(Duration::from_secs(120)),
//! )?;
//!
//! let result = pool
//!     .submit(json!({"n": 1}), CallOptions::new().with_correlation_id("job-1"))
//!     .await?;
//!
//! // Limit every pool in the process to 8 busy units
//! set_global_cap(8);
//! ```

pub mod admission;
pub mod error;
pub mod pool;
pub mod unit;

/// Prelude for common imports
pub mod prelude {
    pub use crate::admission::{set_global_cap, AdmissionRegistry, InstanceKey};
    pub use crate::error::PoolError;
    pub use crate::pool::{
        CreationMode, PoolStatus, RetirementPolicy, SlotState, WorkerPoolConfig,
        WorkerPoolManager,
    };
    pub use crate::unit::{
        CallOptions, ExecutionUnit, ExecutionUnitFactory, InvokeError, LocalUnitFactory,
        RemoteProxy, UnitError,
    };
    pub use serde_json::{json, Value};
    pub use std::sync::Arc;
    pub use std::time::Duration;
}

// Re-export key types at crate root
pub use admission::{set_global_cap, AdmissionRegistry, InstanceKey};
pub use error::PoolError;
pub use pool::{
    CreationMode, PoolStatus, RetirementPolicy, SlotId, SlotState, WorkerPoolConfig,
    WorkerPoolManager,
};
pub use unit::{
    CallOptions, ExecutionUnit, ExecutionUnitFactory, InvokeError, LocalUnitFactory, RemoteProxy,
    UnitError,
};
