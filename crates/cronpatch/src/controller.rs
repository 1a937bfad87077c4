//! Reconciler and fired-job handler.

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use cronpatch_core::{
    ApplyAction, Clock, PatchResolver, ResourceKey, ScalingTarget, SkipReason, build_target,
    decide,
};
use cronpatch_scheduler::{CronRegistry, JobCallback, JobFuture};

use crate::{
    ControllerConfig, ControllerError, CronPatchResource, EventReason, EventRecorder,
    ResourceStatus, ResourceStore,
};

/// Result of one reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The resource no longer exists; its jobs were dropped.
    NotFound,
    /// The resource is being deleted; its jobs were dropped.
    Deleted,
    /// The target was brought up to date.
    Reconciled {
        applied: ApplyOutcome,
        /// Whether the resource's jobs were re-registered.
        rescheduled: bool,
    },
}

/// Result of applying a patch to the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub action: ApplyAction,
    /// Empty when the bare template was applied.
    pub patch_name: String,
    /// Whether the resolution was committed to the status.
    pub anchor_advanced: bool,
}

/// Keeps each resource's target and cron jobs in line with its spec.
pub struct Controller {
    pub(crate) store: Arc<dyn ResourceStore>,
    recorder: Arc<dyn EventRecorder>,
    clock: Arc<dyn Clock>,
    registry: CronRegistry,
    resolver: PatchResolver,
    pub(crate) config: ControllerConfig,
    self_ref: Weak<Controller>,
}

impl Controller {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        recorder: Arc<dyn EventRecorder>,
        clock: Arc<dyn Clock>,
        config: ControllerConfig,
    ) -> Arc<Self> {
        let registry = CronRegistry::with_clock(Arc::clone(&clock), config.registry_config());
        let resolver = config.resolver();
        Arc::new_cyclic(|self_ref| Self {
            store,
            recorder,
            clock,
            registry,
            resolver,
            config,
            self_ref: self_ref.clone(),
        })
    }

    pub fn registry(&self) -> &CronRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Bring one resource's target, status, and jobs up to date.
    #[tracing::instrument(skip(self, key), fields(resource = %key))]
    pub async fn reconcile(&self, key: &ResourceKey) -> Result<ReconcileOutcome, ControllerError> {
        let now = self.clock.now();

        let Some(mut resource) = self.store.get_resource(key).await? else {
            let removed = self.registry.clear(key).await;
            debug!(removed, "resource gone, dropped its jobs");
            return Ok(ReconcileOutcome::NotFound);
        };

        if resource.deletion_requested {
            if resource.has_finalizer() {
                self.registry.clear(key).await;
                self.recorder
                    .record(key, EventReason::Unscheduled, "Unscheduled");
                resource.remove_finalizer();
                self.store
                    .update_finalizers(key, &resource.finalizers)
                    .await?;
                info!("cleared schedules and released finalizer");
            }
            return Ok(ReconcileOutcome::Deleted);
        }

        if resource.add_finalizer() {
            self.store
                .update_finalizers(key, &resource.finalizers)
                .await?;
            debug!("added finalizer");
        }

        let before = resource.status.clone();
        let resolved = self.resolver.resolve(
            &resource.spec.scheduled_patches,
            &resource.status.resolution_state(),
            now,
        )?;
        let applied = self.apply(&mut resource, resolved.name(), now).await?;

        let synced = self.sync_jobs(&resource).await;
        if let Ok(true) = synced {
            resource.status.observed_generation = Some(resource.generation);
        }
        self.persist_status(&resource, &before).await?;

        Ok(ReconcileOutcome::Reconciled {
            applied,
            rescheduled: synced?,
        })
    }

    /// Create, update, or leave the target for `patch_name`.
    ///
    /// Commits the resolution into `resource.status` when the action calls for
    /// it; persisting the status is up to the caller.
    pub async fn apply(
        &self,
        resource: &mut CronPatchResource,
        patch_name: &str,
        now: DateTime<Utc>,
    ) -> Result<ApplyOutcome, ControllerError> {
        let key = &resource.key;
        let desired = build_target(
            key,
            &resource.spec.template,
            &resource.spec.scheduled_patches,
            patch_name,
        )?;
        let current = self.store.get_target(key).await?;
        let action = decide(current.as_ref(), &desired, &self.config.skip_annotation);

        let suffix = if patch_name.is_empty() {
            String::new()
        } else {
            format!(" with {patch_name}")
        };

        match action {
            ApplyAction::Create => {
                self.store.create_target(&desired).await?;
                info!(resource = %key, patch = patch_name, "created target");
                self.recorder.record(
                    key,
                    EventReason::Created,
                    &format!("Created target {}{suffix}", key.name),
                );
            }
            ApplyAction::Update => {
                let target = match current {
                    Some(current) => merge_metadata(desired, current),
                    None => desired,
                };
                self.store.update_target(&target).await?;
                info!(resource = %key, patch = patch_name, "updated target");
                self.recorder.record(
                    key,
                    EventReason::Updated,
                    &format!("Updated target {}{suffix}", key.name),
                );
            }
            ApplyAction::Skip(reason) => {
                debug!(resource = %key, patch = patch_name, %reason, "left target untouched");
                self.recorder.record(
                    key,
                    EventReason::Skipped,
                    &format!("Skipped target {} ({reason}){suffix}", key.name),
                );
            }
        }

        // The first resolution is always committed so later ones have an
        // anchor to search from.
        let first_resolution = resource.status.last_cron_timestamp.is_none()
            && action == ApplyAction::Skip(SkipReason::NoChange);
        let anchor_advanced =
            first_resolution || action.advances_anchor(self.config.advance_anchor_on_skip_marker);
        if anchor_advanced {
            resource.status.record_resolution(now, patch_name);
        }

        Ok(ApplyOutcome {
            action,
            patch_name: patch_name.to_string(),
            anchor_advanced,
        })
    }

    /// Body of a fired job.
    ///
    /// Works from the resource as stored now, never from what was true when
    /// the job was registered. The fired patch competes with every other
    /// schedule that fired since the anchor, so jobs firing at the same
    /// instant settle on the patch declared first whatever order they run in.
    #[tracing::instrument(skip(self, key, patch_name), fields(resource = %key, patch = patch_name))]
    pub async fn on_fire(
        &self,
        key: &ResourceKey,
        patch_name: &str,
    ) -> Result<(), ControllerError> {
        let now = self.clock.now();

        let Some(mut resource) = self.store.get_resource(key).await? else {
            let removed = self.registry.clear(key).await;
            info!(removed, "resource gone, dropped its jobs");
            return Ok(());
        };
        if resource.deletion_requested {
            debug!("resource is being deleted, ignoring");
            return Ok(());
        }
        if !resource
            .spec
            .scheduled_patches
            .iter()
            .any(|p| p.name == patch_name)
        {
            warn!("patch no longer declared, ignoring");
            return Ok(());
        }

        let state = resource.status.resolution_state();
        let active = if state.last_anchor.is_some() {
            self.resolver
                .resolve(&resource.spec.scheduled_patches, &state, now)?
                .name()
                .to_string()
        } else {
            patch_name.to_string()
        };
        if active != patch_name {
            debug!(active = %active, "another patch takes precedence");
        }

        let before = resource.status.clone();
        self.apply(&mut resource, &active, now).await?;
        self.persist_status(&resource, &before).await
    }

    /// Re-register the resource's jobs if they are stale.
    ///
    /// Returns whether anything was re-registered.
    async fn sync_jobs(&self, resource: &CronPatchResource) -> Result<bool, ControllerError> {
        let key = &resource.key;
        let declared = resource.spec.patch_names();
        let registered = self.registry.list(key).await;

        let generation_seen = resource.status.observed_generation == Some(resource.generation);
        let names_match = registered
            .keys()
            .map(String::as_str)
            .eq(declared.iter().copied());
        if generation_seen && names_match {
            return Ok(false);
        }

        self.registry.clear(key).await;
        for patch in &resource.spec.scheduled_patches {
            let added = self
                .registry
                .add(
                    key,
                    &patch.name,
                    &patch.schedule,
                    patch.timezone.as_deref(),
                    self.job_callback(),
                )
                .await;
            if let Err(e) = added {
                self.registry.clear(key).await;
                warn!(resource = %key, patch = %patch.name, error = %e, "failed to schedule");
                return Err(e.into());
            }
        }

        let names: Vec<&str> = resource
            .spec
            .scheduled_patches
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        info!(resource = %key, patches = ?names, "scheduled patches");
        self.recorder.record(
            key,
            EventReason::Scheduled,
            &format!("Scheduled: {}", names.join(",")),
        );
        Ok(true)
    }

    async fn persist_status(
        &self,
        resource: &CronPatchResource,
        before: &ResourceStatus,
    ) -> Result<(), ControllerError> {
        if resource.status != *before {
            self.store
                .update_status(&resource.key, &resource.status)
                .await?;
        }
        Ok(())
    }

    /// Callback handed to the registry. Holds only a weak reference back.
    fn job_callback(&self) -> JobCallback {
        let controller = self.self_ref.clone();
        Arc::new(move |key: ResourceKey, patch_name: String| -> JobFuture {
            let controller = controller.clone();
            Box::pin(async move {
                let Some(controller) = controller.upgrade() else {
                    return Ok(());
                };
                controller
                    .on_fire(&key, &patch_name)
                    .await
                    .map_err(|e| e.to_string())
            })
        })
    }
}

/// Desired target with metadata from the live one folded in.
///
/// Labels and annotations the controller does not set are left alone.
fn merge_metadata(mut desired: ScalingTarget, current: ScalingTarget) -> ScalingTarget {
    for (k, v) in current.labels {
        desired.labels.entry(k).or_insert(v);
    }
    for (k, v) in current.annotations {
        desired.annotations.entry(k).or_insert(v);
    }
    desired
}
