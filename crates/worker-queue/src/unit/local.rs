//! In-process execution units backed by Tokio tasks
//!
//! Each unit owns a bounded mailbox and serves one request at a time, so a
//! unit behaves like an isolated worker: separate units run concurrently,
//! calls on the same unit are serialized.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::{CallOptions, ExecutionUnit, ExecutionUnitFactory, InvokeError, RemoteProxy, UnitError};

/// Named method exposed by every local execution unit
pub type MethodHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, InvokeError>> + Send + Sync>;

/// Factory for in-process execution units
///
/// # Example
///
/// ```
/// use worker_queue::LocalUnitFactory;
/// use serde_json::json;
///
/// let factory = LocalUnitFactory::new()
///     .with_method("exec", |payload| async move {
///         let n = payload["n"].as_i64().unwrap_or(0);
///         Ok(json!({ "double": n * 2 }))
///     });
///
/// assert_eq!(factory.units_created(), 0);
/// ```
#[derive(Clone)]
pub struct LocalUnitFactory {
    methods: Arc<HashMap<String, MethodHandler>>,
    mailbox_capacity: usize,
    created: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl Default for LocalUnitFactory {
    fn default() -> Self {
        Self {
            methods: Arc::new(HashMap::new()),
            mailbox_capacity: 16,
            created: Arc::new(AtomicUsize::new(0)),
            live: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl LocalUnitFactory {
    /// Create a factory with no methods registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named method
    ///
    /// Registering the same name twice replaces the earlier handler.
    pub fn with_method<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, InvokeError>> + Send + 'static,
    {
        let handler: MethodHandler = Arc::new(move |payload| Box::pin(handler(payload)));
        Arc::make_mut(&mut self.methods).insert(name.into(), handler);
        self
    }

    /// Set the per-unit mailbox capacity
    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity.max(1);
        self
    }

    /// Total units created over the factory's lifetime
    pub fn units_created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// Units created and not yet terminated
    pub fn live_units(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    /// Refuse to create further units
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

#[async_trait]
impl ExecutionUnitFactory for LocalUnitFactory {
    async fn create(&self) -> Result<Arc<dyn ExecutionUnit>, UnitError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(UnitError::Shutdown);
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| UnitError::Create(e.to_string()))?;

        let unit_id = self.created.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::channel(self.mailbox_capacity);
        let task = runtime.spawn(unit_loop(unit_id, rx, Arc::clone(&self.methods)));
        self.live.fetch_add(1, Ordering::Relaxed);

        debug!(unit_id, "Created local execution unit");

        Ok(Arc::new(LocalUnit {
            unit_id,
            tx,
            task,
            terminated: AtomicBool::new(false),
            live: Arc::clone(&self.live),
        }))
    }
}

struct UnitRequest {
    method: String,
    payload: Value,
    reply: oneshot::Sender<Result<Value, InvokeError>>,
}

async fn unit_loop(
    unit_id: usize,
    mut rx: mpsc::Receiver<UnitRequest>,
    methods: Arc<HashMap<String, MethodHandler>>,
) {
    trace!(unit_id, "Execution unit started");

    while let Some(request) = rx.recv().await {
        let result = match methods.get(&request.method) {
            Some(handler) => handler(request.payload).await,
            None => Err(InvokeError::unknown_method(&request.method)),
        };

        if request.reply.send(result).is_err() {
            trace!(unit_id, method = %request.method, "Caller dropped before reply");
        }
    }

    trace!(unit_id, "Execution unit stopped");
}

struct LocalUnit {
    unit_id: usize,
    tx: mpsc::Sender<UnitRequest>,
    task: JoinHandle<()>,
    terminated: AtomicBool,
    live: Arc<AtomicUsize>,
}

impl ExecutionUnit for LocalUnit {
    fn connect(&self) -> Arc<dyn RemoteProxy> {
        Arc::new(LocalProxy {
            tx: self.tx.clone(),
        })
    }

    fn terminate(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        self.task.abort();
        self.live.fetch_sub(1, Ordering::Relaxed);
        debug!(unit_id = self.unit_id, "Terminated local execution unit");
    }
}

impl Drop for LocalUnit {
    fn drop(&mut self) {
        self.terminate();
    }
}

struct LocalProxy {
    tx: mpsc::Sender<UnitRequest>,
}

#[async_trait]
impl RemoteProxy for LocalProxy {
    async fn invoke(
        &self,
        method: &str,
        payload: Value,
        _options: &CallOptions,
    ) -> Result<Value, InvokeError> {
        let (reply, response) = oneshot::channel();
        let request = UnitRequest {
            method: method.to_string(),
            payload,
            reply,
        };

        self.tx
            .send(request)
            .await
            .map_err(|_| InvokeError::terminated())?;

        response.await.map_err(|_| InvokeError::terminated())?
    }
}
