//! Cross-pool admission control
//!
//! Every pool registers its busy-slot count with an [`AdmissionRegistry`].
//! A pool may only bind a new task while the registry's total is below the
//! cap, unless the pool (or the task) carries the priority flag.

mod registry;

pub use registry::{
    default_global_cap, set_global_cap, AdmissionRegistry, InstanceKey, GLOBAL_CAP_ENV,
};
