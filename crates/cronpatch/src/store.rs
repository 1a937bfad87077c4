//! Seams to the outside world: where resources and targets live, and where
//! user-facing events go.

use std::fmt;

use async_trait::async_trait;
use tracing::info;

use cronpatch_core::{ResourceKey, ScalingTarget};

use crate::{CronPatchResource, ResourceStatus, StoreError};

/// Persistent storage for resources and their targets.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Keys of every resource, including ones pending deletion.
    async fn list_resources(&self) -> Result<Vec<ResourceKey>, StoreError>;

    /// Fetch a resource. `None` when it does not exist.
    async fn get_resource(&self, key: &ResourceKey)
    -> Result<Option<CronPatchResource>, StoreError>;

    /// Replace a resource's status.
    async fn update_status(
        &self,
        key: &ResourceKey,
        status: &ResourceStatus,
    ) -> Result<(), StoreError>;

    /// Replace a resource's finalizers.
    ///
    /// A resource pending deletion disappears once its finalizers are empty.
    async fn update_finalizers(
        &self,
        key: &ResourceKey,
        finalizers: &[String],
    ) -> Result<(), StoreError>;

    /// Fetch the target derived from a resource.
    async fn get_target(&self, key: &ResourceKey) -> Result<Option<ScalingTarget>, StoreError>;

    async fn create_target(&self, target: &ScalingTarget) -> Result<(), StoreError>;

    async fn update_target(&self, target: &ScalingTarget) -> Result<(), StoreError>;
}

/// Kind of user-facing event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventReason {
    Created,
    Updated,
    Skipped,
    Scheduled,
    Unscheduled,
}

impl fmt::Display for EventReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "Created",
            Self::Updated => "Updated",
            Self::Skipped => "Skipped",
            Self::Scheduled => "Scheduled",
            Self::Unscheduled => "Unscheduled",
        };
        f.write_str(s)
    }
}

/// A recorded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub key: ResourceKey,
    pub reason: EventReason,
    pub message: String,
}

/// Sink for user-facing events.
pub trait EventRecorder: Send + Sync {
    fn record(&self, key: &ResourceKey, reason: EventReason, message: &str);
}

/// Emits events as log records.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRecorder;

impl EventRecorder for TracingRecorder {
    fn record(&self, key: &ResourceKey, reason: EventReason, message: &str) {
        info!(resource = %key, %reason, "{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(EventReason::Created, "Created")]
    #[test_case(EventReason::Updated, "Updated")]
    #[test_case(EventReason::Skipped, "Skipped")]
    #[test_case(EventReason::Scheduled, "Scheduled")]
    #[test_case(EventReason::Unscheduled, "Unscheduled")]
    fn test_event_reason_display(reason: EventReason, expected: &str) {
        assert_eq!(reason.to_string(), expected);
    }
}
