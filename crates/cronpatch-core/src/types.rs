//! Shared types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::target::ScalingPatch;
use crate::{CronSchedule, PatchError};

/// Identity of a managed resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A named patch with the schedule at which it becomes active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledPatch {
    /// Name of this schedule, unique within its resource.
    pub name: String,
    /// Cron expression, e.g. `0 */2 * * *`.
    pub schedule: String,
    /// IANA timezone the schedule is evaluated in. UTC when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// Overrides applied on top of the template while this patch is active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<ScalingPatch>,
}

impl ScheduledPatch {
    pub fn new(name: impl Into<String>, schedule: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schedule: schedule.into(),
            timezone: None,
            patch: None,
        }
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    pub fn with_patch(mut self, patch: ScalingPatch) -> Self {
        self.patch = Some(patch);
        self
    }

    /// Parse this patch's cron expression in its timezone.
    pub fn cron_schedule(&self) -> Result<CronSchedule, PatchError> {
        CronSchedule::parse(&self.schedule, self.timezone.as_deref()).map_err(|source| {
            PatchError::InvalidSchedule {
                patch: self.name.clone(),
                source,
            }
        })
    }
}

/// What the resolver needs to remember between calls.
///
/// Owned and persisted by the caller; the resolver only reads it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionState {
    /// Last instant at which a resolution was committed.
    pub last_anchor: Option<DateTime<Utc>>,
    /// Patch that was active at `last_anchor`.
    pub last_patch_name: Option<String>,
}

impl ResolutionState {
    pub fn new(last_anchor: Option<DateTime<Utc>>, last_patch_name: Option<&str>) -> Self {
        Self {
            last_anchor,
            last_patch_name: last_patch_name
                .filter(|name| !name.is_empty())
                .map(str::to_string),
        }
    }
}

/// Outcome of a resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ResolvedPatch {
    /// The template applies unpatched.
    #[default]
    None,
    /// A named patch is in effect.
    Active {
        name: String,
        /// Fire time that selected the patch; `None` when carried forward
        /// from the previous resolution.
        matched_at: Option<DateTime<Utc>>,
    },
}

impl ResolvedPatch {
    /// Patch name, or the empty string when no patch is active.
    pub fn name(&self) -> &str {
        match self {
            Self::None => "",
            Self::Active { name, .. } => name,
        }
    }

    pub fn matched_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::None => None,
            Self::Active { matched_at, .. } => *matched_at,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }
}

impl fmt::Display for ResolvedPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("<none>"),
            Self::Active { name, .. } => f.write_str(name),
        }
    }
}
