//! Slot bookkeeping
//!
//! A slot is one addressable unit of pool capacity. It may own a live
//! execution unit and its proxy, a pending retirement countdown, and the
//! binding of the task currently occupying it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::unit::{ExecutionUnit, RemoteProxy};

/// Slot identifier, unique and stable within a pool (1-based)
pub type SlotId = usize;

/// Observable slot state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    /// No execution unit
    Empty,
    /// Live execution unit waiting for work
    WarmIdle,
    /// Bound to a task
    Busy,
}

impl std::fmt::Display for SlotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty"),
            Self::WarmIdle => write!(f, "warm_idle"),
            Self::Busy => write!(f, "busy"),
        }
    }
}

/// The task currently occupying a slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Binding {
    /// Unique per bind; stale releases carry an older number
    pub lease: u64,
    pub correlation_id: Option<String>,
}

pub(crate) struct Slot {
    id: SlotId,
    unit: Option<Arc<dyn ExecutionUnit>>,
    proxy: Option<Arc<dyn RemoteProxy>>,
    retire_timer: Option<CancellationToken>,
    binding: Option<Binding>,
}

impl Slot {
    pub fn new(id: SlotId) -> Self {
        Self {
            id,
            unit: None,
            proxy: None,
            retire_timer: None,
            binding: None,
        }
    }

    pub fn id(&self) -> SlotId {
        self.id
    }

    pub fn state(&self) -> SlotState {
        match (&self.binding, &self.unit) {
            (Some(_), _) => SlotState::Busy,
            (None, Some(_)) => SlotState::WarmIdle,
            (None, None) => SlotState::Empty,
        }
    }

    pub fn is_materialized(&self) -> bool {
        self.unit.is_some()
    }

    pub fn proxy(&self) -> Option<Arc<dyn RemoteProxy>> {
        self.proxy.clone()
    }

    pub fn is_bound_to(&self, lease: u64) -> bool {
        self.binding.as_ref().is_some_and(|b| b.lease == lease)
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.binding.as_ref()?.correlation_id.as_deref()
    }

    /// Bind a task, canceling any pending retirement first
    pub fn bind(&mut self, lease: u64, correlation_id: Option<String>) {
        self.cancel_retirement();
        self.binding = Some(Binding {
            lease,
            correlation_id,
        });
    }

    /// Clear the binding if `lease` still owns the slot
    ///
    /// Returns false for a stale or repeated release.
    pub fn release(&mut self, lease: u64) -> bool {
        if !self.is_bound_to(lease) {
            return false;
        }
        self.binding = None;
        true
    }

    /// Install a freshly created unit and its proxy
    ///
    /// Skipped if a unit is already present; the rejected unit is handed
    /// back so the caller can terminate it.
    pub fn install(
        &mut self,
        unit: Arc<dyn ExecutionUnit>,
        proxy: Arc<dyn RemoteProxy>,
    ) -> Result<(), Arc<dyn ExecutionUnit>> {
        if self.unit.is_some() {
            return Err(unit);
        }
        self.proxy = Some(proxy);
        self.unit = Some(unit);
        Ok(())
    }

    /// Replace the retirement countdown
    pub fn arm_retirement(&mut self, token: CancellationToken) {
        self.cancel_retirement();
        self.retire_timer = Some(token);
    }

    pub fn cancel_retirement(&mut self) {
        if let Some(token) = self.retire_timer.take() {
            token.cancel();
        }
    }

    /// Detach the unit if `token` is still the armed countdown and the slot
    /// is idle
    ///
    /// The caller terminates the returned unit once the pool lock is gone.
    pub fn retire(&mut self, token: &CancellationToken) -> Option<Arc<dyn ExecutionUnit>> {
        if token.is_cancelled() || self.binding.is_some() {
            return None;
        }
        self.retire_timer = None;
        self.take_unit()
    }

    /// Detach the unit and forget the binding
    pub fn teardown(&mut self) -> Option<Arc<dyn ExecutionUnit>> {
        self.cancel_retirement();
        self.binding = None;
        self.take_unit()
    }

    fn take_unit(&mut self) -> Option<Arc<dyn ExecutionUnit>> {
        self.proxy = None;
        self.unit.take()
    }
}
