//! Registry types.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use cronpatch_core::ResourceKey;

/// Default upper bound on how long the timer sleeps between checks.
const DEFAULT_MAX_TICK_SECS: u64 = 60;

/// Opaque identifier of a registered job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobHandle(pub(crate) u64);

impl JobHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job#{}", self.0)
    }
}

/// Jobs registered for one resource, by patch name.
pub type ResourceJobSet = BTreeMap<String, JobHandle>;

/// Future returned by a job callback.
pub type JobFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;

/// Callback invoked when a job fires, with the resource key and patch name.
pub type JobCallback = Arc<dyn Fn(ResourceKey, String) -> JobFuture + Send + Sync>;

/// Registry timer settings.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Longest the timer sleeps before re-checking for due jobs.
    pub max_tick: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_tick: Duration::from_secs(DEFAULT_MAX_TICK_SECS),
        }
    }
}
