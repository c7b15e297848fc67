//! Remote proxy interface and call options

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Method invoked when a caller does not name one
pub const DEFAULT_CALL_NAME: &str = "exec";

/// Error produced by a remote invocation
///
/// The pool never interprets or rewrites this value; it reaches the caller
/// exactly as the execution unit produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvokeError {
    /// Error message
    pub message: String,

    /// Error kind for programmatic handling
    pub kind: Option<String>,

    /// Additional error details
    pub details: Option<Value>,
}

impl InvokeError {
    /// Kind used when a call targets a terminated execution unit
    pub const TERMINATED: &'static str = "terminated";

    /// Kind used when the unit exposes no method with the requested name
    pub const UNKNOWN_METHOD: &'static str = "unknown_method";

    /// Create a new error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: None,
            details: None,
        }
    }

    /// The execution unit went away before answering
    pub fn terminated() -> Self {
        Self::new("execution unit terminated").with_kind(Self::TERMINATED)
    }

    /// The execution unit has no such method
    pub fn unknown_method(method: &str) -> Self {
        Self::new(format!("no method named `{method}`")).with_kind(Self::UNKNOWN_METHOD)
    }

    /// Set the error kind
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Add error details
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Whether the error reports a terminated execution unit
    pub fn is_terminated(&self) -> bool {
        self.kind.as_deref() == Some(Self::TERMINATED)
    }
}

impl std::fmt::Display for InvokeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for InvokeError {}

impl From<String> for InvokeError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for InvokeError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Per-call options
///
/// # Example
///
/// ```
/// use worker_queue::CallOptions;
///
/// let options = CallOptions::new()
///     .with_call_name("resize")
///     .with_correlation_id("upload-42")
///     .with_priority(true);
///
/// assert_eq!(options.call_name, "resize");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallOptions {
    /// Method to invoke on the execution unit
    pub call_name: String,

    /// Caller-supplied id used to target this task with a scoped destroy
    pub correlation_id: Option<String>,

    /// Overrides the pool's priority flag for this task
    pub priority: Option<bool>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            call_name: DEFAULT_CALL_NAME.to_string(),
            correlation_id: None,
            priority: None,
        }
    }
}

impl CallOptions {
    /// Options targeting the default `exec` method
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the method name
    pub fn with_call_name(mut self, name: impl Into<String>) -> Self {
        self.call_name = name.into();
        self
    }

    /// Set the correlation id
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Bypass (or explicitly honor) the global admission cap
    pub fn with_priority(mut self, priority: bool) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Callable interface bound to one execution unit
///
/// Calls resolve asynchronously with the unit's result or failure.
#[async_trait]
pub trait RemoteProxy: Send + Sync {
    /// Invoke a named method on the execution unit
    async fn invoke(
        &self,
        method: &str,
        payload: Value,
        options: &CallOptions,
    ) -> Result<Value, InvokeError>;
}
