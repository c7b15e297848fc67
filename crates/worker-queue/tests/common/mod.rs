//! Shared fixtures for pool scenario tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Semaphore;

use worker_queue::{
    AdmissionRegistry, CallOptions, ExecutionUnit, ExecutionUnitFactory, InvokeError,
    RemoteProxy, UnitError, WorkerPoolConfig, WorkerPoolManager,
};

/// Counters shared by every unit a [`GatedFactory`] creates
#[derive(Default)]
pub struct Counters {
    pub created: AtomicUsize,
    pub terminated: AtomicUsize,
    pub running: AtomicUsize,
    pub max_running: AtomicUsize,
    pub calls: AtomicUsize,
}

impl Counters {
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn terminated(&self) -> usize {
        self.terminated.load(Ordering::SeqCst)
    }
}

/// Factory whose units block every call until the test opens the gate
///
/// Terminating a unit is recorded but does not interrupt calls already in
/// flight, like a remote worker that keeps running after being detached.
#[derive(Clone)]
pub struct GatedFactory {
    pub counters: Arc<Counters>,
    pub gate: Arc<Semaphore>,
    failures_left: Arc<AtomicUsize>,
    gate_creates: Arc<AtomicBool>,
    create_gate: Arc<Semaphore>,
}

impl GatedFactory {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            gate: Arc::new(Semaphore::new(0)),
            failures_left: Arc::new(AtomicUsize::new(0)),
            gate_creates: Arc::new(AtomicBool::new(false)),
            create_gate: Arc::new(Semaphore::new(0)),
        }
    }

    /// Share counters and gate with another factory
    pub fn sharing(other: &GatedFactory) -> Self {
        Self {
            counters: Arc::clone(&other.counters),
            gate: Arc::clone(&other.gate),
            failures_left: Arc::new(AtomicUsize::new(0)),
            gate_creates: Arc::new(AtomicBool::new(false)),
            create_gate: Arc::new(Semaphore::new(0)),
        }
    }

    /// Make the next `n` unit creations fail
    pub fn fail_next_creates(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Let `n` blocked calls finish
    pub fn open(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Block every unit creation until [`open_creates`](Self::open_creates)
    pub fn hold_creates(&self) {
        self.gate_creates.store(true, Ordering::SeqCst);
    }

    /// Let `n` blocked creations finish
    pub fn open_creates(&self, n: usize) {
        self.create_gate.add_permits(n);
    }
}

#[async_trait]
impl ExecutionUnitFactory for GatedFactory {
    async fn create(&self) -> Result<Arc<dyn ExecutionUnit>, UnitError> {
        if self.gate_creates.load(Ordering::SeqCst) {
            let permit = self
                .create_gate
                .acquire()
                .await
                .map_err(|_| UnitError::Shutdown)?;
            permit.forget();
        }

        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(UnitError::Create("worker script failed to load".into()));
        }

        self.counters.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(GatedUnit {
            counters: Arc::clone(&self.counters),
            gate: Arc::clone(&self.gate),
        }))
    }
}

struct GatedUnit {
    counters: Arc<Counters>,
    gate: Arc<Semaphore>,
}

impl ExecutionUnit for GatedUnit {
    fn connect(&self) -> Arc<dyn RemoteProxy> {
        Arc::new(GatedProxy {
            counters: Arc::clone(&self.counters),
            gate: Arc::clone(&self.gate),
        })
    }

    fn terminate(&self) {
        self.counters.terminated.fetch_add(1, Ordering::SeqCst);
    }
}

struct GatedProxy {
    counters: Arc<Counters>,
    gate: Arc<Semaphore>,
}

#[async_trait]
impl RemoteProxy for GatedProxy {
    async fn invoke(
        &self,
        method: &str,
        payload: Value,
        _options: &CallOptions,
    ) -> Result<Value, InvokeError> {
        self.counters.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.counters.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_running.fetch_max(running, Ordering::SeqCst);

        if method == "hold" {
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| InvokeError::terminated())?;
            permit.forget();
        }

        self.counters.running.fetch_sub(1, Ordering::SeqCst);

        match method {
            "fail" => Err(InvokeError::new("task failed").with_kind("TaskError")),
            _ => Ok(payload),
        }
    }
}

/// Pool on a private registry
pub fn pool(
    factory: &GatedFactory,
    config: WorkerPoolConfig,
    registry: &Arc<AdmissionRegistry>,
) -> WorkerPoolManager {
    WorkerPoolManager::with_registry(Arc::new(factory.clone()), config, Arc::clone(registry))
        .expect("valid pool configuration")
}

pub fn hold() -> CallOptions {
    CallOptions::new().with_call_name("hold")
}

/// Let spawned tasks run until they block
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}
