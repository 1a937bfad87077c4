//! The managed resource: declared schedules plus recorded status.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cronpatch_core::{ResolutionState, ResourceKey, ScheduledPatch, TargetTemplate};

/// Finalizer that keeps a resource around until its jobs are cleared.
pub const FINALIZER: &str = "cronpatch.dev/finalizer";

/// What the owner declares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronPatchSpec {
    pub template: TargetTemplate,
    #[serde(default)]
    pub scheduled_patches: Vec<ScheduledPatch>,
}

impl CronPatchSpec {
    /// Declared patch names, deduplicated and sorted.
    pub fn patch_names(&self) -> BTreeSet<&str> {
        self.scheduled_patches
            .iter()
            .map(|p| p.name.as_str())
            .collect()
    }
}

/// What the controller records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_cron_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scheduled_patch_name: Option<String>,
    /// Generation whose schedules are registered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl ResourceStatus {
    pub fn resolution_state(&self) -> ResolutionState {
        ResolutionState::new(
            self.last_cron_timestamp,
            self.last_scheduled_patch_name.as_deref(),
        )
    }

    /// Commit `patch_name` as resolved at `now`.
    ///
    /// The anchor never moves backwards.
    pub fn record_resolution(&mut self, now: DateTime<Utc>, patch_name: &str) {
        let anchor = self.last_cron_timestamp.map_or(now, |prev| prev.max(now));
        self.last_cron_timestamp = Some(anchor);
        self.last_scheduled_patch_name = (!patch_name.is_empty()).then(|| patch_name.to_string());
    }
}

/// A resource as read from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronPatchResource {
    pub key: ResourceKey,
    /// Bumped on every spec change.
    pub generation: i64,
    #[serde(default)]
    pub deletion_requested: bool,
    #[serde(default)]
    pub finalizers: Vec<String>,
    pub spec: CronPatchSpec,
    #[serde(default)]
    pub status: ResourceStatus,
}

impl CronPatchResource {
    pub fn new(key: ResourceKey, spec: CronPatchSpec) -> Self {
        Self {
            key,
            generation: 1,
            deletion_requested: false,
            finalizers: Vec::new(),
            spec,
            status: ResourceStatus::default(),
        }
    }

    pub fn has_finalizer(&self) -> bool {
        self.finalizers.iter().any(|f| f == FINALIZER)
    }

    /// Add the controller finalizer. Returns whether it was missing.
    pub fn add_finalizer(&mut self) -> bool {
        if self.has_finalizer() {
            return false;
        }
        self.finalizers.push(FINALIZER.to_string());
        true
    }

    /// Remove the controller finalizer. Returns whether it was present.
    pub fn remove_finalizer(&mut self) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != FINALIZER);
        self.finalizers.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use cronpatch_core::{ScalingSpec, TargetRef};
    use pretty_assertions::assert_eq;

    fn resource() -> CronPatchResource {
        let spec = CronPatchSpec {
            template: TargetTemplate {
                metadata: None,
                spec: ScalingSpec {
                    scale_target_ref: TargetRef {
                        api_version: "apps/v1".to_string(),
                        kind: "Deployment".to_string(),
                        name: "web".to_string(),
                    },
                    min_replicas: Some(1),
                    max_replicas: 5,
                    metrics: Vec::new(),
                },
            },
            scheduled_patches: vec![
                ScheduledPatch::new("b", "0 * * * *"),
                ScheduledPatch::new("a", "0 * * * *"),
            ],
        };
        CronPatchResource::new(ResourceKey::new("ns", "web"), spec)
    }

    #[test]
    fn test_finalizer_roundtrip() {
        let mut r = resource();
        assert!(!r.has_finalizer());
        assert!(r.add_finalizer());
        assert!(!r.add_finalizer());
        assert_eq!(r.finalizers, vec![FINALIZER.to_string()]);
        assert!(r.remove_finalizer());
        assert!(!r.remove_finalizer());
    }

    #[test]
    fn test_remove_finalizer_keeps_others() {
        let mut r = resource();
        r.finalizers = vec!["other/finalizer".to_string(), FINALIZER.to_string()];
        r.remove_finalizer();
        assert_eq!(r.finalizers, vec!["other/finalizer".to_string()]);
    }

    #[test]
    fn test_patch_names_sorted() {
        let r = resource();
        let names: Vec<_> = r.spec.patch_names().into_iter().collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_record_resolution_never_moves_anchor_back() {
        let t = Utc.with_ymd_and_hms(2021, 9, 4, 0, 0, 0).unwrap();
        let mut status = ResourceStatus::default();

        status.record_resolution(t, "weekday");
        assert_eq!(status.last_cron_timestamp, Some(t));
        assert_eq!(status.last_scheduled_patch_name.as_deref(), Some("weekday"));

        status.record_resolution(t - Duration::hours(1), "");
        assert_eq!(status.last_cron_timestamp, Some(t));
        assert_eq!(status.last_scheduled_patch_name, None);
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let t = Utc.with_ymd_and_hms(2021, 9, 4, 0, 0, 0).unwrap();
        let mut status = ResourceStatus::default();
        status.record_resolution(t, "weekend");
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "lastCronTimestamp": "2021-09-04T00:00:00Z",
                "lastScheduledPatchName": "weekend",
            })
        );
    }

    // === Property-Based Tests ===

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn anchor_is_monotonic(offsets in prop::collection::vec(-10_000i64..10_000, 1..20)) {
                let base = Utc.with_ymd_and_hms(2021, 9, 4, 0, 0, 0).unwrap();
                let mut status = ResourceStatus::default();
                let mut latest = None;

                for offset in offsets {
                    let now = base + Duration::minutes(offset);
                    status.record_resolution(now, "p");
                    latest = latest.max(Some(now));
                    prop_assert_eq!(status.last_cron_timestamp, latest);
                }
            }
        }
    }
}
