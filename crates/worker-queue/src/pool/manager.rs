//! Worker pool manager
//!
//! Owns the slot table and drives admission, binding, release, retirement
//! and teardown.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use super::config::{CreationMode, RetirementPolicy, WorkerPoolConfig};
use super::slot::{Slot, SlotId, SlotState};
use crate::admission::{AdmissionRegistry, InstanceKey};
use crate::error::PoolError;
use crate::unit::{CallOptions, ExecutionUnit, ExecutionUnitFactory, RemoteProxy};

/// Point-in-time view of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    /// Configured slot count
    pub capacity: usize,
    /// Slots in the free set
    pub idle: usize,
    /// Slots bound to a task
    pub busy: usize,
    /// Slots holding a live execution unit
    pub materialized: usize,
    /// Whether eager materialization is in progress
    pub initializing: bool,
}

/// Bounded pool of isolated execution units
///
/// Tasks submitted with [`submit`](Self::submit) wait until a slot is free
/// and the shared [`AdmissionRegistry`] admits them, then run on that slot's
/// execution unit. Units are created on first use (or eagerly), retired
/// after sitting idle for the configured destroy timer, and can be torn down
/// pool-wide or per correlation id.
///
/// Cloning yields another handle to the same pool. When the last handle and
/// the last in-flight task are gone, every unit is terminated and the pool
/// deregisters from the registry.
///
/// # Example
///
/// ```ignore
/// use worker_queue::prelude::*;
///
/// let factory = LocalUnitFactory::new()
///     .with_method("exec", |payload| async move { Ok(payload) });
///
/// let pool = WorkerPoolManager::new(Arc::new(factory), WorkerPoolConfig::new(4))?;
///
/// let result = pool.submit(json!({"n": 1}), CallOptions::default()).await?;
///
/// // Tear down the unit running a specific task
/// pool.destroy_task("upload-42");
///
/// // Tear down everything
/// pool.destroy();
/// ```
#[derive(Clone)]
pub struct WorkerPoolManager {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    key: InstanceKey,
    config: WorkerPoolConfig,
    retire_after: Option<Duration>,
    factory: Arc<dyn ExecutionUnitFactory>,
    registry: Arc<AdmissionRegistry>,
    state: Mutex<PoolState>,
    released: Notify,
}

struct PoolState {
    slots: BTreeMap<SlotId, Slot>,
    free: BTreeSet<SlotId>,
    initializing: bool,
    next_lease: u64,
    pool_timer: Option<CancellationToken>,
}

impl PoolState {
    fn busy(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    fn cancel_pool_timer(&mut self) {
        if let Some(token) = self.pool_timer.take() {
            token.cancel();
        }
    }
}

impl WorkerPoolManager {
    /// Create a pool registered with the process-wide admission registry
    pub fn new(
        factory: Arc<dyn ExecutionUnitFactory>,
        config: WorkerPoolConfig,
    ) -> Result<Self, PoolError> {
        Self::with_registry(factory, config, AdmissionRegistry::global())
    }

    /// Create a pool registered with a specific admission registry
    ///
    /// With [`CreationMode::Eager`] the units are materialized by a task
    /// spawned on the current Tokio runtime; admission is refused until it
    /// finishes. Outside a runtime the pool falls back to lazy creation.
    pub fn with_registry(
        factory: Arc<dyn ExecutionUnitFactory>,
        config: WorkerPoolConfig,
        registry: Arc<AdmissionRegistry>,
    ) -> Result<Self, PoolError> {
        config.validate()?;

        let slots = (1..=config.thread_count)
            .map(|id| (id, Slot::new(id)))
            .collect::<BTreeMap<_, _>>();
        let free = slots.keys().copied().collect();

        let key = InstanceKey::new();
        registry.update(key, 0);

        let pool = Self {
            inner: Arc::new(PoolInner {
                key,
                retire_after: config.retire_after(),
                config: config.clone(),
                factory,
                registry,
                state: Mutex::new(PoolState {
                    slots,
                    free,
                    initializing: false,
                    next_lease: 0,
                    pool_timer: None,
                }),
                released: Notify::new(),
            }),
        };

        info!(
            pool = %key,
            thread_count = config.thread_count,
            destroy_timer_ms = config.destroy_timer.as_millis() as u64,
            creation_mode = ?config.creation_mode,
            priority = config.priority,
            "Created worker pool"
        );

        if config.creation_mode == CreationMode::Eager {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    if let Some(guard) = pool.inner.begin_initializing() {
                        let warm = pool.clone();
                        runtime.spawn(async move {
                            if let Err(e) = warm.populate(guard).await {
                                warn!(
                                    pool = %warm.inner.key,
                                    error = %e,
                                    "Eager materialization incomplete"
                                );
                            }
                        });
                    }
                }
                Err(_) => {
                    warn!(pool = %key, "No Tokio runtime; falling back to lazy creation");
                }
            }
        }

        Ok(pool)
    }

    /// Run a task on the next admitted slot
    ///
    /// Waits, without a timeout, until a slot is free, the pool is not
    /// initializing, and the admission registry admits the task (or the task
    /// has priority). The slot is released before this returns, on success
    /// and failure alike, and also if the returned future is dropped.
    ///
    /// # Errors
    ///
    /// - [`PoolError::Materialization`] if the slot's unit could not be created
    /// - [`PoolError::Invocation`] with the remote failure, unmodified
    /// - [`PoolError::Abandoned`] if the slot was destroyed before the call
    ///   was forwarded
    #[instrument(
        skip(self, payload, options),
        fields(
            pool = %self.inner.key,
            call = %options.call_name,
            correlation_id = ?options.correlation_id
        )
    )]
    pub async fn submit(&self, payload: Value, options: CallOptions) -> Result<Value, PoolError> {
        let priority = options.priority.unwrap_or(self.inner.config.priority);
        let lease = self
            .inner
            .acquire(priority, options.correlation_id.as_deref())
            .await;

        let proxy = self.inner.materialize(&lease).await?;

        debug!(slot_id = lease.slot_id, "Dispatching task");
        let result = proxy.invoke(&options.call_name, payload, &options).await;

        drop(lease);
        result.map_err(PoolError::Invocation)
    }

    /// Materialize every empty idle slot
    ///
    /// Admission is refused while this runs. Returns the number of units
    /// created; a concurrent call returns `Ok(0)` immediately. A factory
    /// failure leaves only that slot empty: the remaining slots are still
    /// materialized and the first failure is returned afterwards. Under
    /// [`RetirementPolicy::WholePool`] an idle pool starts its countdown
    /// once warm-up ends.
    #[instrument(skip(self), fields(pool = %self.inner.key))]
    pub async fn warm_up(&self) -> Result<usize, PoolError> {
        match self.inner.begin_initializing() {
            Some(guard) => self.populate(guard).await,
            None => Ok(0),
        }
    }

    async fn populate(&self, guard: InitGuard) -> Result<usize, PoolError> {
        let targets: Vec<SlotId> = {
            let state = self.inner.state.lock();
            state
                .free
                .iter()
                .copied()
                .filter(|id| {
                    state
                        .slots
                        .get(id)
                        .is_some_and(|slot| !slot.is_materialized())
                })
                .collect()
        };

        let mut created = 0;
        let mut failures = 0;
        let mut first_error = None;
        for slot_id in targets {
            let unit = match self.inner.factory.create().await {
                Ok(unit) => unit,
                Err(e) => {
                    warn!(
                        pool = %self.inner.key,
                        slot_id,
                        error = %e,
                        "Execution unit creation failed"
                    );
                    failures += 1;
                    first_error.get_or_insert(e);
                    continue;
                }
            };
            let proxy = unit.connect();

            let rejected = {
                let mut guard_state = self.inner.state.lock();
                let state = &mut *guard_state;
                let is_free = state.free.contains(&slot_id);
                match state.slots.get_mut(&slot_id) {
                    Some(slot) if is_free => match slot.install(unit, proxy) {
                        Ok(()) => {
                            self.inner.arm_retirement(slot);
                            created += 1;
                            None
                        }
                        Err(unit) => Some(unit),
                    },
                    _ => Some(unit),
                }
            };
            if let Some(unit) = rejected {
                unit.terminate();
            }
        }

        {
            let mut state = self.inner.state.lock();
            self.inner.arm_pool_timer(&mut state);
        }
        drop(guard);
        debug!(pool = %self.inner.key, created, failures, "Warm-up complete");

        match first_error {
            Some(e) => Err(PoolError::Materialization(e)),
            None => Ok(created),
        }
    }

    /// Terminate every execution unit in the pool
    ///
    /// All slots return to the free set as empty slots and the pool's busy
    /// count drops to zero. Tasks still in flight are abandoned: their remote
    /// calls may still finish, but their slots are no longer theirs. Later
    /// submissions rebuild units on demand.
    #[instrument(skip(self), fields(pool = %self.inner.key))]
    pub fn destroy(&self) -> usize {
        let units = {
            let mut state = self.inner.state.lock();
            self.inner.destroy_locked(&mut state)
        };
        let terminated = terminate_all(units);
        self.inner.released.notify_waiters();
        info!(pool = %self.inner.key, terminated, "Destroyed worker pool units");
        terminated
    }

    /// Terminate only the slots bound to `correlation_id`
    ///
    /// Matching slots are freed immediately as empty slots; all other slots
    /// and their in-flight tasks are untouched. Returns the number of slots
    /// torn down.
    #[instrument(skip(self), fields(pool = %self.inner.key))]
    pub fn destroy_task(&self, correlation_id: &str) -> usize {
        let (freed, units) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;

            let mut freed = Vec::new();
            let mut units = Vec::new();
            for slot in state.slots.values_mut() {
                if slot.correlation_id() == Some(correlation_id) {
                    freed.push(slot.id());
                    units.extend(slot.teardown());
                }
            }

            if !freed.is_empty() {
                state.free.extend(freed.iter().copied());
                self.inner.publish_busy(state);
            }
            (freed, units)
        };
        terminate_all(units);

        if !freed.is_empty() {
            self.inner.released.notify_waiters();
        }
        info!(pool = %self.inner.key, correlation_id, slots = ?freed, "Destroyed task slots");
        freed.len()
    }

    /// Snapshot of slot usage
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            capacity: state.slots.len(),
            idle: state.free.len(),
            busy: state.busy(),
            materialized: state.slots.values().filter(|s| s.is_materialized()).count(),
            initializing: state.initializing,
        }
    }

    /// State of every slot, ordered by slot id
    pub fn slot_states(&self) -> Vec<(SlotId, SlotState)> {
        let state = self.inner.state.lock();
        state
            .slots
            .values()
            .map(|slot| (slot.id(), slot.state()))
            .collect()
    }

    /// Key this pool registers under
    pub fn instance_key(&self) -> InstanceKey {
        self.inner.key
    }

    /// Pool configuration
    pub fn config(&self) -> &WorkerPoolConfig {
        &self.inner.config
    }

    /// Registry governing this pool's admission
    pub fn registry(&self) -> &Arc<AdmissionRegistry> {
        &self.inner.registry
    }
}

impl PoolInner {
    /// Wait until a slot is admitted and bind it
    async fn acquire(self: &Arc<Self>, priority: bool, correlation_id: Option<&str>) -> SlotLease {
        let mut waiting = false;
        loop {
            let released = self.released.notified();
            let admission = self.registry.changed();
            tokio::pin!(released, admission);
            released.as_mut().enable();
            admission.as_mut().enable();

            if let Some((slot_id, lease)) = self.try_acquire(priority, correlation_id) {
                trace!(pool = %self.key, slot_id, lease, "Slot admitted");
                return SlotLease {
                    pool: Arc::clone(self),
                    slot_id,
                    lease,
                };
            }

            if !waiting {
                trace!(pool = %self.key, "No slot admitted, waiting");
                waiting = true;
            }

            tokio::select! {
                _ = released => {}
                _ = admission => {}
            }
        }
    }

    fn try_acquire(&self, priority: bool, correlation_id: Option<&str>) -> Option<(SlotId, u64)> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if state.initializing {
            return None;
        }
        let slot_id = state.free.first().copied()?;

        if !self.registry.try_admit(self.key, state.busy() + 1, priority) {
            return None;
        }

        let slot = state.slots.get_mut(&slot_id)?;
        state.free.remove(&slot_id);
        state.next_lease += 1;
        let lease = state.next_lease;
        slot.bind(lease, correlation_id.map(str::to_string));
        state.cancel_pool_timer();

        Some((slot_id, lease))
    }

    /// Resolve the proxy for a bound slot, creating its unit if needed
    async fn materialize(&self, lease: &SlotLease) -> Result<Arc<dyn RemoteProxy>, PoolError> {
        let abandoned = PoolError::Abandoned {
            slot_id: lease.slot_id,
        };

        {
            let state = self.state.lock();
            let slot = match state.slots.get(&lease.slot_id) {
                Some(slot) if slot.is_bound_to(lease.lease) => slot,
                _ => return Err(abandoned),
            };
            if let Some(proxy) = slot.proxy() {
                return Ok(proxy);
            }
        }

        debug!(pool = %self.key, slot_id = lease.slot_id, "Materializing execution unit");
        let unit = self.factory.create().await.map_err(|e| {
            warn!(
                pool = %self.key,
                slot_id = lease.slot_id,
                error = %e,
                "Execution unit creation failed"
            );
            PoolError::Materialization(e)
        })?;
        let proxy = unit.connect();

        let rejected = {
            let mut state = self.state.lock();
            match state.slots.get_mut(&lease.slot_id) {
                Some(slot) if slot.is_bound_to(lease.lease) => match slot.install(unit, proxy) {
                    Ok(()) => return slot.proxy().ok_or(abandoned),
                    Err(unit) => unit,
                },
                _ => unit,
            }
        };

        // Slot destroyed or already materialized while the unit was created
        rejected.terminate();
        let state = self.state.lock();
        match state.slots.get(&lease.slot_id) {
            Some(slot) if slot.is_bound_to(lease.lease) => slot.proxy().ok_or(abandoned),
            _ => Err(abandoned),
        }
    }

    fn release(self: &Arc<Self>, slot_id: SlotId, lease: u64) {
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            let Some(slot) = state.slots.get_mut(&slot_id) else {
                return;
            };
            if !slot.release(lease) {
                trace!(pool = %self.key, slot_id, lease, "Ignoring stale release");
                return;
            }
            self.arm_retirement(slot);
            state.free.insert(slot_id);
            self.publish_busy(state);
        }

        trace!(pool = %self.key, slot_id, "Slot released");
        self.released.notify_waiters();
    }

    /// Push the busy count to the registry and manage the whole-pool timer
    fn publish_busy(self: &Arc<Self>, state: &mut PoolState) {
        self.registry.update(self.key, state.busy());
        self.arm_pool_timer(state);
    }

    /// Restart the whole-pool countdown if nothing is busy
    fn arm_pool_timer(self: &Arc<Self>, state: &mut PoolState) {
        if state.busy() > 0 || self.config.retirement != RetirementPolicy::WholePool {
            return;
        }
        if let Some(after) = self.retire_after {
            let token = CancellationToken::new();
            state.cancel_pool_timer();
            state.pool_timer = Some(token.clone());
            self.spawn_countdown(after, token, None);
        }
    }

    fn arm_retirement(self: &Arc<Self>, slot: &mut Slot) {
        if self.config.retirement != RetirementPolicy::PerSlot || !slot.is_materialized() {
            return;
        }
        if let Some(after) = self.retire_after {
            let token = CancellationToken::new();
            slot.arm_retirement(token.clone());
            self.spawn_countdown(after, token, Some(slot.id()));
        }
    }

    /// Spawn a retirement countdown for one slot, or for the whole pool
    fn spawn_countdown(
        self: &Arc<Self>,
        after: Duration,
        token: CancellationToken,
        slot_id: Option<SlotId>,
    ) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(pool = %self.key, "No Tokio runtime; retirement countdown skipped");
            return;
        };

        let pool: Weak<Self> = Arc::downgrade(self);
        runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(after) => {}
            }
            if let Some(pool) = pool.upgrade() {
                match slot_id {
                    Some(slot_id) => pool.retire_slot(slot_id, &token),
                    None => pool.expire(&token),
                }
            }
        });
    }

    fn retire_slot(&self, slot_id: SlotId, token: &CancellationToken) {
        let retired = self
            .state
            .lock()
            .slots
            .get_mut(&slot_id)
            .and_then(|slot| slot.retire(token));

        if let Some(unit) = retired {
            unit.terminate();
            debug!(pool = %self.key, slot_id, "Retired idle execution unit");
        }
    }

    fn expire(&self, token: &CancellationToken) {
        let units = {
            let mut state = self.state.lock();
            if token.is_cancelled() || state.busy() > 0 {
                return;
            }
            self.destroy_locked(&mut state)
        };
        let terminated = terminate_all(units);
        info!(pool = %self.key, terminated, "Idle pool expired");
    }

    /// Detach every unit and free every slot; the caller terminates the units
    fn destroy_locked(&self, state: &mut PoolState) -> Vec<Arc<dyn ExecutionUnit>> {
        state.cancel_pool_timer();
        let units = state
            .slots
            .values_mut()
            .filter_map(|slot| slot.teardown())
            .collect();
        state.free = state.slots.keys().copied().collect();
        self.registry.update(self.key, 0);
        units
    }

    fn begin_initializing(self: &Arc<Self>) -> Option<InitGuard> {
        let mut state = self.state.lock();
        if state.initializing {
            return None;
        }
        state.initializing = true;
        Some(InitGuard {
            pool: Arc::clone(self),
        })
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.cancel_pool_timer();
        let units: Vec<_> = state.slots.values_mut().filter_map(Slot::teardown).collect();
        terminate_all(units);
        self.registry.deregister(self.key);
        debug!(pool = %self.key, "Worker pool dropped");
    }
}

fn terminate_all(units: Vec<Arc<dyn ExecutionUnit>>) -> usize {
    let count = units.len();
    for unit in units {
        unit.terminate();
    }
    count
}

/// Binding of one task to one slot; releases the slot when dropped
struct SlotLease {
    pool: Arc<PoolInner>,
    slot_id: SlotId,
    lease: u64,
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        self.pool.release(self.slot_id, self.lease);
    }
}

/// Clears the initializing flag when warm-up ends, even if it is cancelled
struct InitGuard {
    pool: Arc<PoolInner>,
}

impl Drop for InitGuard {
    fn drop(&mut self) {
        self.pool.state.lock().initializing = false;
        self.pool.released.notify_waiters();
    }
}
