//! Process-wide admission registry
//!
//! Tracks the busy-slot count of every registered pool and gates new work
//! against a shared, mutable cap.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::{debug, info};
use uuid::Uuid;

/// Environment variable overriding the process-wide cap
pub const GLOBAL_CAP_ENV: &str = "WORKER_POOL_GLOBAL_CAP";

/// Minimum default cap, regardless of the hardware hint
const MIN_DEFAULT_CAP: usize = 4;

/// Default global cap derived from the host's parallelism (floor 4)
pub fn default_global_cap() -> usize {
    num_cpus::get().max(MIN_DEFAULT_CAP)
}

/// Opaque key a pool registers under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceKey(Uuid);

impl InstanceKey {
    /// Generate a fresh key
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for InstanceKey {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cross-instance admission governor
///
/// Independent pools share one registry to keep the total number of busy
/// slots in the process under a soft cap. Pools never reference each other;
/// they only upsert their own busy count and ask for admission.
///
/// Registries are explicit values. [`AdmissionRegistry::global`] returns the
/// process-wide instance that pools use by default; tests and embedders can
/// build isolated registries with [`AdmissionRegistry::new`].
///
/// # Example
///
/// ```
/// use worker_queue::admission::{AdmissionRegistry, InstanceKey};
///
/// let registry = AdmissionRegistry::new(2);
/// let (a, b) = (InstanceKey::new(), InstanceKey::new());
///
/// registry.update(a, 1);
/// assert!(registry.admit());
///
/// registry.update(b, 1);
/// assert!(!registry.admit());
///
/// registry.set_cap(3);
/// assert!(registry.admit());
/// ```
pub struct AdmissionRegistry {
    busy: Mutex<HashMap<InstanceKey, usize>>,
    cap: AtomicUsize,
    changed: Notify,
}

impl std::fmt::Debug for AdmissionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionRegistry")
            .field("cap", &self.cap())
            .field("total_busy", &self.total_busy())
            .finish()
    }
}

impl Default for AdmissionRegistry {
    fn default() -> Self {
        Self::new(default_global_cap())
    }
}

impl AdmissionRegistry {
    /// Create a registry with the given cap (floored at 1)
    pub fn new(cap: usize) -> Self {
        Self {
            busy: Mutex::new(HashMap::new()),
            cap: AtomicUsize::new(cap.max(1)),
            changed: Notify::new(),
        }
    }

    /// Create a registry whose cap is read from [`GLOBAL_CAP_ENV`]
    ///
    /// Falls back to [`default_global_cap`] when unset or unparsable.
    pub fn from_env() -> Self {
        let cap = std::env::var(GLOBAL_CAP_ENV)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_global_cap);
        Self::new(cap)
    }

    /// The process-wide registry shared by pools that were not given one
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<AdmissionRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::from_env())))
    }

    /// Upsert a pool's busy count
    pub fn update(&self, key: InstanceKey, busy: usize) {
        let previous = self.busy.lock().insert(key, busy).unwrap_or(0);
        if busy < previous {
            self.changed.notify_waiters();
        }
    }

    /// Remove a pool from the registry
    pub fn deregister(&self, key: InstanceKey) {
        let removed = self.busy.lock().remove(&key);
        if removed.is_some_and(|busy| busy > 0) {
            self.changed.notify_waiters();
        }
        debug!(instance = %key, "Deregistered pool from admission registry");
    }

    /// Whether the total busy count is currently below the cap
    pub fn admit(&self) -> bool {
        let busy = self.busy.lock();
        busy.values().sum::<usize>() < self.cap()
    }

    /// Admit and record a new busy count in one step
    ///
    /// The check and the upsert happen under the same lock, so two pools
    /// racing for the last unit of headroom cannot both pass. With `bypass`
    /// set the cap is ignored but the count is still recorded.
    pub fn try_admit(&self, key: InstanceKey, busy_after: usize, bypass: bool) -> bool {
        let mut busy = self.busy.lock();
        if !bypass && busy.values().sum::<usize>() >= self.cap() {
            return false;
        }
        busy.insert(key, busy_after);
        true
    }

    /// Replace the cap (floored at 1)
    ///
    /// Applies to subsequent admission checks only; slots that are already
    /// busy stay busy.
    pub fn set_cap(&self, cap: usize) {
        let cap = cap.max(1);
        let previous = self.cap.swap(cap, Ordering::AcqRel);
        info!(previous, cap, "Global admission cap changed");
        self.changed.notify_waiters();
    }

    /// Current cap
    pub fn cap(&self) -> usize {
        self.cap.load(Ordering::Acquire)
    }

    /// Sum of busy counts across all registered pools
    pub fn total_busy(&self) -> usize {
        self.busy.lock().values().sum()
    }

    /// Busy count recorded for one pool
    pub fn busy_for(&self, key: InstanceKey) -> Option<usize> {
        self.busy.lock().get(&key).copied()
    }

    /// Number of registered pools
    pub fn registered(&self) -> usize {
        self.busy.lock().len()
    }

    /// Future resolving on the next capacity change
    ///
    /// Fires when a busy count drops, a pool deregisters, or the cap changes.
    /// Callers must `enable` the future before re-checking admission to
    /// avoid missing a wake-up.
    pub fn changed(&self) -> Notified<'_> {
        self.changed.notified()
    }
}

/// Replace the cap of the process-wide registry
pub fn set_global_cap(cap: usize) {
    AdmissionRegistry::global().set_cap(cap);
}
