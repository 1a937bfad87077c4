//! In-memory store and event recorder.
//!
//! Backs tests and embedded use. Writes can be made to fail on demand to
//! exercise retry paths.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::trace;

use cronpatch_core::{ResourceKey, ScalingTarget};

use crate::{
    CronPatchResource, CronPatchSpec, Event, EventReason, EventRecorder, ResourceStatus,
    ResourceStore, StoreError,
};

/// DashMap-backed [`ResourceStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    resources: DashMap<ResourceKey, CronPatchResource>,
    targets: DashMap<ResourceKey, ScalingTarget>,
    failing_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a resource as-is.
    pub fn insert_resource(&self, resource: CronPatchResource) {
        self.resources.insert(resource.key.clone(), resource);
    }

    pub fn resource(&self, key: &ResourceKey) -> Option<CronPatchResource> {
        self.resources.get(key).map(|r| r.clone())
    }

    /// Replace a resource's spec, bumping its generation.
    pub fn update_spec(&self, key: &ResourceKey, spec: CronPatchSpec) -> Result<(), StoreError> {
        let mut resource = self
            .resources
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        resource.spec = spec;
        resource.generation += 1;
        Ok(())
    }

    /// Ask for a resource to be deleted.
    ///
    /// Without finalizers it goes immediately; otherwise it lingers, marked,
    /// until they are removed.
    pub fn request_deletion(&self, key: &ResourceKey) {
        let remove = match self.resources.get_mut(key) {
            Some(mut resource) => {
                resource.deletion_requested = true;
                resource.finalizers.is_empty()
            }
            None => false,
        };
        if remove {
            self.resources.remove(key);
        }
    }

    /// Drop a resource regardless of finalizers.
    pub fn remove_resource(&self, key: &ResourceKey) {
        self.resources.remove(key);
    }

    pub fn target(&self, key: &ResourceKey) -> Option<ScalingTarget> {
        self.targets.get(key).map(|t| t.clone())
    }

    /// Insert or replace a target as-is, e.g. one edited by hand.
    pub fn insert_target(&self, target: ScalingTarget) {
        self.targets.insert(target.key.clone(), target);
    }

    /// Make the next `count` writes fail with [`StoreError::Unavailable`].
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    fn check_write(&self) -> Result<(), StoreError> {
        let failed = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            trace!("injected write failure");
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn list_resources(&self) -> Result<Vec<ResourceKey>, StoreError> {
        let mut keys: Vec<_> = self.resources.iter().map(|r| r.key().clone()).collect();
        keys.sort();
        Ok(keys)
    }

    async fn get_resource(
        &self,
        key: &ResourceKey,
    ) -> Result<Option<CronPatchResource>, StoreError> {
        Ok(self.resource(key))
    }

    async fn update_status(
        &self,
        key: &ResourceKey,
        status: &ResourceStatus,
    ) -> Result<(), StoreError> {
        self.check_write()?;
        let mut resource = self
            .resources
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        resource.status = status.clone();
        Ok(())
    }

    async fn update_finalizers(
        &self,
        key: &ResourceKey,
        finalizers: &[String],
    ) -> Result<(), StoreError> {
        self.check_write()?;
        let release = {
            let mut resource = self
                .resources
                .get_mut(key)
                .ok_or_else(|| StoreError::NotFound(key.clone()))?;
            resource.finalizers = finalizers.to_vec();
            resource.deletion_requested && finalizers.is_empty()
        };
        if release {
            self.resources.remove(key);
        }
        Ok(())
    }

    async fn get_target(&self, key: &ResourceKey) -> Result<Option<ScalingTarget>, StoreError> {
        Ok(self.target(key))
    }

    async fn create_target(&self, target: &ScalingTarget) -> Result<(), StoreError> {
        self.check_write()?;
        match self.targets.entry(target.key.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(target.key.clone())),
            Entry::Vacant(slot) => {
                slot.insert(target.clone());
                Ok(())
            }
        }
    }

    async fn update_target(&self, target: &ScalingTarget) -> Result<(), StoreError> {
        self.check_write()?;
        let mut current = self
            .targets
            .get_mut(&target.key)
            .ok_or_else(|| StoreError::NotFound(target.key.clone()))?;
        *current = target.clone();
        Ok(())
    }
}

/// [`EventRecorder`] that keeps every event for inspection.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    events: Mutex<Vec<Event>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Messages recorded for `key` with `reason`, oldest first.
    pub fn messages(&self, key: &ResourceKey, reason: EventReason) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.key == *key && e.reason == reason)
            .map(|e| e.message)
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl EventRecorder for MemoryRecorder {
    fn record(&self, key: &ResourceKey, reason: EventReason, message: &str) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Event {
                key: key.clone(),
                reason,
                message: message.to_string(),
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cronpatch_core::{ScalingSpec, TargetRef, TargetTemplate};

    fn spec() -> CronPatchSpec {
        CronPatchSpec {
            template: TargetTemplate {
                metadata: None,
                spec: ScalingSpec {
                    scale_target_ref: TargetRef {
                        api_version: "apps/v1".to_string(),
                        kind: "Deployment".to_string(),
                        name: "web".to_string(),
                    },
                    min_replicas: None,
                    max_replicas: 3,
                    metrics: Vec::new(),
                },
            },
            scheduled_patches: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_injected_failures_run_out() {
        let store = MemoryStore::new();
        let key = ResourceKey::new("ns", "web");
        store.insert_resource(CronPatchResource::new(key.clone(), spec()));

        store.fail_next_writes(2);
        let status = ResourceStatus::default();
        assert!(store.update_status(&key, &status).await.is_err());
        assert!(store.update_status(&key, &status).await.is_err());
        assert!(store.update_status(&key, &status).await.is_ok());
    }

    #[tokio::test]
    async fn test_deletion_waits_for_finalizers() {
        let store = MemoryStore::new();
        let key = ResourceKey::new("ns", "web");
        let mut resource = CronPatchResource::new(key.clone(), spec());
        resource.add_finalizer();
        store.insert_resource(resource);

        store.request_deletion(&key);
        assert!(store.resource(&key).unwrap().deletion_requested);

        store.update_finalizers(&key, &[]).await.unwrap();
        assert!(store.resource(&key).is_none());
    }

    #[tokio::test]
    async fn test_deletion_without_finalizers_is_immediate() {
        let store = MemoryStore::new();
        let key = ResourceKey::new("ns", "web");
        store.insert_resource(CronPatchResource::new(key.clone(), spec()));
        store.request_deletion(&key);
        assert!(store.resource(&key).is_none());
    }

    #[tokio::test]
    async fn test_update_spec_bumps_generation() {
        let store = MemoryStore::new();
        let key = ResourceKey::new("ns", "web");
        store.insert_resource(CronPatchResource::new(key.clone(), spec()));
        store.update_spec(&key, spec()).unwrap();
        assert_eq!(store.resource(&key).unwrap().generation, 2);
    }

    #[test]
    fn test_recorder_filters_by_reason() {
        let recorder = MemoryRecorder::new();
        let key = ResourceKey::new("ns", "web");
        recorder.record(&key, EventReason::Created, "Created target web");
        recorder.record(&key, EventReason::Scheduled, "Scheduled: a");
        assert_eq!(
            recorder.messages(&key, EventReason::Scheduled),
            vec!["Scheduled: a".to_string()]
        );
        recorder.clear();
        assert!(recorder.events().is_empty());
    }
}
