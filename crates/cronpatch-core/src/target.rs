//! Target object model: the template, the patches, and the derived object.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{PatchError, ResourceKey, ScheduledPatch};

/// Reference to the workload being scaled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
}

/// Source of a scaling metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricKind {
    Resource,
    Pods,
    Object,
    External,
}

/// Target value for a metric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "PascalCase")]
pub enum MetricTarget {
    #[serde(rename_all = "camelCase")]
    Utilization { average_utilization: i32 },
    #[serde(rename_all = "camelCase")]
    AverageValue { average_value: String },
    Value { value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSpec {
    #[serde(rename = "type")]
    pub kind: MetricKind,
    pub name: String,
    pub target: MetricTarget,
}

impl MetricSpec {
    /// CPU utilization target, the most common metric.
    pub fn cpu_utilization(percent: i32) -> Self {
        Self {
            kind: MetricKind::Resource,
            name: "cpu".to_string(),
            target: MetricTarget::Utilization {
                average_utilization: percent,
            },
        }
    }
}

/// Desired scaling behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingSpec {
    pub scale_target_ref: TargetRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<i32>,
    pub max_replicas: i32,
    #[serde(default)]
    pub metrics: Vec<MetricSpec>,
}

/// Partial override of a [`ScalingSpec`]. Unset fields keep the template value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<i32>,
    /// Replaces the template's metric list wholesale when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Vec<MetricSpec>>,
}

impl ScalingSpec {
    /// Override the fields `patch` declares.
    pub fn apply_patch(&mut self, patch: &ScalingPatch) {
        if let Some(min) = patch.min_replicas {
            self.min_replicas = Some(min);
        }
        if let Some(max) = patch.max_replicas {
            self.max_replicas = max;
        }
        if let Some(metrics) = &patch.metrics {
            self.metrics = metrics.clone();
        }
    }
}

/// Labels and annotations copied onto the target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateMetadata {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Base shape of the target before any patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TemplateMetadata>,
    pub spec: ScalingSpec,
}

/// The object produced for a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingTarget {
    pub key: ResourceKey,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub spec: ScalingSpec,
}

/// Build the target for `key` from the template plus the named patch.
///
/// An empty `patch_name` yields the bare template.
pub fn build_target(
    key: &ResourceKey,
    template: &TargetTemplate,
    patches: &[ScheduledPatch],
    patch_name: &str,
) -> Result<ScalingTarget, PatchError> {
    let metadata = template.metadata.clone().unwrap_or_default();
    let mut target = ScalingTarget {
        key: key.clone(),
        labels: metadata.labels,
        annotations: metadata.annotations,
        spec: template.spec.clone(),
    };

    if !patch_name.is_empty() {
        let scheduled = patches
            .iter()
            .find(|p| p.name == patch_name)
            .ok_or_else(|| PatchError::UnknownPatch(patch_name.to_string()))?;
        if let Some(patch) = &scheduled.patch {
            target.spec.apply_patch(patch);
        }
    }

    Ok(target)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    pub(crate) fn sample_template() -> TargetTemplate {
        TargetTemplate {
            metadata: Some(TemplateMetadata {
                labels: BTreeMap::from([("app".to_string(), "nginx".to_string())]),
                annotations: BTreeMap::new(),
            }),
            spec: ScalingSpec {
                scale_target_ref: TargetRef {
                    api_version: "apps/v1".to_string(),
                    kind: "Deployment".to_string(),
                    name: "nginx".to_string(),
                },
                min_replicas: Some(1),
                max_replicas: 10,
                metrics: vec![MetricSpec::cpu_utilization(50)],
            },
        }
    }

    fn sample_patches() -> Vec<ScheduledPatch> {
        vec![
            ScheduledPatch::new("one", "0,10,20,30,40,50 * * * *")
                .with_timezone("Asia/Tokyo")
                .with_patch(ScalingPatch {
                    min_replicas: Some(3),
                    max_replicas: Some(15),
                    metrics: Some(vec![MetricSpec::cpu_utilization(30)]),
                }),
            ScheduledPatch::new("max-only", "0 0 * * *").with_patch(ScalingPatch {
                max_replicas: Some(20),
                ..Default::default()
            }),
            ScheduledPatch::new("empty", "0 0 * * *"),
        ]
    }

    #[test]
    fn test_build_target_without_patch() {
        let key = ResourceKey::new("default", "sample");
        let target = build_target(&key, &sample_template(), &sample_patches(), "").unwrap();

        assert_eq!(target.key, key);
        assert_eq!(target.labels.get("app").map(String::as_str), Some("nginx"));
        assert_eq!(target.spec, sample_template().spec);
    }

    #[test]
    fn test_build_target_with_full_patch() {
        let key = ResourceKey::new("default", "sample");
        let target = build_target(&key, &sample_template(), &sample_patches(), "one").unwrap();

        assert_eq!(target.spec.min_replicas, Some(3));
        assert_eq!(target.spec.max_replicas, 15);
        assert_eq!(target.spec.metrics, vec![MetricSpec::cpu_utilization(30)]);
        assert_eq!(target.spec.scale_target_ref.name, "nginx");
    }

    #[test]
    fn test_partial_patch_keeps_template_defaults() {
        let key = ResourceKey::new("default", "sample");
        let target =
            build_target(&key, &sample_template(), &sample_patches(), "max-only").unwrap();

        assert_eq!(target.spec.max_replicas, 20);
        assert_eq!(target.spec.min_replicas, Some(1));
        assert_eq!(target.spec.metrics, vec![MetricSpec::cpu_utilization(50)]);
    }

    #[test]
    fn test_patch_without_body_is_template() {
        let key = ResourceKey::new("default", "sample");
        let target = build_target(&key, &sample_template(), &sample_patches(), "empty").unwrap();
        assert_eq!(target.spec, sample_template().spec);
    }

    #[test]
    fn test_unknown_patch_is_rejected() {
        let key = ResourceKey::new("default", "sample");
        let err = build_target(&key, &sample_template(), &sample_patches(), "missing").unwrap_err();
        assert_eq!(err, PatchError::UnknownPatch("missing".to_string()));
    }

    #[test]
    fn test_metric_target_wire_shape() {
        let json = serde_json::to_value(MetricSpec::cpu_utilization(30)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "Resource",
                "name": "cpu",
                "target": { "type": "Utilization", "averageUtilization": 30 }
            })
        );
    }
}
