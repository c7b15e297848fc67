//! Pool configuration

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PoolError;

/// Smallest nonzero destroy timer; shorter values are raised to this
pub const MIN_DESTROY_TIMER: Duration = Duration::from_secs(60);

/// Minimum default thread count, regardless of the hardware hint
const MIN_DEFAULT_THREADS: usize = 4;

/// Default slot count: half the host's parallelism, floor 4
pub fn default_thread_count() -> usize {
    (num_cpus::get() / 2).max(MIN_DEFAULT_THREADS)
}

/// When execution units are created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationMode {
    /// Materialize a slot's unit on the first dispatch that reaches it
    #[default]
    Lazy,
    /// Materialize every slot when the pool is constructed
    Eager,
}

impl std::str::FromStr for CreationMode {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lazy" => Ok(Self::Lazy),
            "eager" => Ok(Self::Eager),
            other => Err(PoolError::InvalidConfig(format!(
                "unknown creation mode: {other}"
            ))),
        }
    }
}

/// How idle execution units are retired once the destroy timer elapses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetirementPolicy {
    /// Each slot retires its own unit after sitting idle for the timer
    #[default]
    PerSlot,
    /// The whole pool is destroyed once it has been fully idle for the timer
    WholePool,
}

/// Worker pool configuration
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use worker_queue::{CreationMode, WorkerPoolConfig};
///
/// let config = WorkerPoolConfig::new(8)
///     .with_destroy_timer(Duration::from_secs(120))
///     .with_creation_mode(CreationMode::Eager);
///
/// assert_eq!(config.thread_count, 8);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Number of slots (execution units) the pool governs
    pub thread_count: usize,

    /// Idle time before retirement; zero disables retirement
    #[serde(with = "duration_millis")]
    pub destroy_timer: Duration,

    /// Eager or lazy materialization
    pub creation_mode: CreationMode,

    /// Per-slot or whole-pool retirement
    pub retirement: RetirementPolicy,

    /// Bypass the global admission cap for every task of this pool
    pub priority: bool,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            thread_count: default_thread_count(),
            destroy_timer: Duration::ZERO,
            creation_mode: CreationMode::default(),
            retirement: RetirementPolicy::default(),
            priority: false,
        }
    }
}

impl WorkerPoolConfig {
    /// Create a configuration with the given slot count
    pub fn new(thread_count: usize) -> Self {
        Self {
            thread_count,
            ..Default::default()
        }
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `WORKER_POOL_THREAD_COUNT`: slot count (default: half the CPUs, floor 4)
    /// - `WORKER_POOL_DESTROY_TIMER_MS`: idle retirement in milliseconds (default: 0)
    /// - `WORKER_POOL_CREATION_MODE`: `lazy` or `eager` (default: lazy)
    /// - `WORKER_POOL_PRIORITY`: bypass the global cap (default: false)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let thread_count = env::var("WORKER_POOL_THREAD_COUNT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.thread_count);

        let destroy_timer = env::var("WORKER_POOL_DESTROY_TIMER_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.destroy_timer);

        let creation_mode = env::var("WORKER_POOL_CREATION_MODE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.creation_mode);

        let priority = env::var("WORKER_POOL_PRIORITY")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(defaults.priority);

        Self::new(thread_count)
            .with_destroy_timer(destroy_timer)
            .with_creation_mode(creation_mode)
            .with_priority(priority)
    }

    /// Set the slot count
    pub fn with_thread_count(mut self, count: usize) -> Self {
        self.thread_count = count;
        self
    }

    /// Set the destroy timer
    ///
    /// Zero disables retirement; nonzero values below [`MIN_DESTROY_TIMER`]
    /// are raised to it.
    pub fn with_destroy_timer(mut self, timer: Duration) -> Self {
        self.destroy_timer = clamp_destroy_timer(timer);
        self
    }

    /// Set the creation mode
    pub fn with_creation_mode(mut self, mode: CreationMode) -> Self {
        self.creation_mode = mode;
        self
    }

    /// Set the retirement policy
    pub fn with_retirement(mut self, policy: RetirementPolicy) -> Self {
        self.retirement = policy;
        self
    }

    /// Set the priority flag
    pub fn with_priority(mut self, priority: bool) -> Self {
        self.priority = priority;
        self
    }

    /// Destroy timer after clamping, or `None` when retirement is disabled
    pub fn retire_after(&self) -> Option<Duration> {
        if self.destroy_timer.is_zero() {
            None
        } else {
            Some(clamp_destroy_timer(self.destroy_timer))
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.thread_count == 0 {
            return Err(PoolError::InvalidConfig(
                "thread_count must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn clamp_destroy_timer(timer: Duration) -> Duration {
    if timer.is_zero() {
        timer
    } else {
        timer.max(MIN_DESTROY_TIMER)
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
