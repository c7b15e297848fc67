//! Worker pool
//!
//! This module provides:
//! - [`WorkerPoolManager`] - slot table, admission and lifecycle protocol
//! - [`WorkerPoolConfig`] - capacity, retirement and creation settings
//!
//! # Slot lifecycle
//!
//! ```text
//!            first dispatch / warm-up
//!   ┌───────┐ ─────────────────────────► ┌───────────┐   bind    ┌──────┐
//!   │ Empty │                            │ Warm-Idle │ ────────► │ Busy │
//!   └───────┘ ◄───────────────────────── └───────────┘ ◄──────── └──────┘
//!       ▲       retirement timer fires                   release     │
//!       │                                                            │
//!       └─────────────── destroy() / destroy_task(id) ───────────────┘
//! ```
//!
//! Binding a slot always cancels its pending retirement, so a countdown
//! armed for an earlier idle period can never terminate a unit that is
//! serving a newer task.

mod config;
mod manager;
mod slot;

pub use config::{
    default_thread_count, CreationMode, RetirementPolicy, WorkerPoolConfig, MIN_DESTROY_TIMER,
};
pub use manager::{PoolStatus, WorkerPoolManager};
pub use slot::{SlotId, SlotState};
