//! Patch resolution.
//!
//! Given a resource's scheduled patches, its last resolution state, and the
//! current instant, find the patch that should be in effect. The search only
//! walks forward from the last anchor, so callers must never move the anchor
//! backwards.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{CronSchedule, PatchError, ResolutionState, ResolvedPatch, ScheduledPatch};

/// Upper bound on fire times walked per schedule in one resolution.
pub const DEFAULT_MAX_SCHEDULE_ITERATIONS: usize = 1_000_000;

/// Resolves the active patch for a resource.
#[derive(Debug, Clone, Copy)]
pub struct PatchResolver {
    max_iterations: usize,
}

impl Default for PatchResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl PatchResolver {
    pub fn new() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_SCHEDULE_ITERATIONS,
        }
    }

    pub fn with_max_iterations(max_iterations: usize) -> Self {
        Self { max_iterations }
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Resolve the patch active at `now`.
    ///
    /// - Without an anchor nothing is active yet.
    /// - Each schedule's latest fire time in `(anchor, now]` competes; the
    ///   latest wins and ties go to the patch declared first.
    /// - With no qualifying fire time, the previous patch stays active as
    ///   long as it is still declared.
    pub fn resolve(
        &self,
        patches: &[ScheduledPatch],
        state: &ResolutionState,
        now: DateTime<Utc>,
    ) -> Result<ResolvedPatch, PatchError> {
        let Some(anchor) = state.last_anchor else {
            debug!("no anchor timestamp, nothing active yet");
            return Ok(ResolvedPatch::None);
        };

        let mut resolved = state
            .last_patch_name
            .as_deref()
            .filter(|name| patches.iter().any(|p| p.name == *name))
            .map(|name| ResolvedPatch::Active {
                name: name.to_string(),
                matched_at: None,
            })
            .unwrap_or_default();

        let mut most_recent = anchor;
        for patch in patches {
            let schedule = patch.cron_schedule()?;
            let Some(fired) = self.latest_fire_time(&patch.name, &schedule, anchor, now)? else {
                continue;
            };
            if fired > most_recent {
                most_recent = fired;
                resolved = ResolvedPatch::Active {
                    name: patch.name.clone(),
                    matched_at: Some(fired),
                };
            }
        }

        debug!(patch = %resolved, %anchor, %now, "resolved active patch");
        Ok(resolved)
    }

    /// Latest fire time of `schedule` in `(anchor, now]`.
    fn latest_fire_time(
        &self,
        name: &str,
        schedule: &CronSchedule,
        anchor: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, PatchError> {
        let mut cursor = anchor;
        let mut latest = None;
        for _ in 0..self.max_iterations {
            match schedule.next_after(cursor) {
                Some(next) if next <= now => {
                    latest = Some(next);
                    cursor = next;
                }
                _ => return Ok(latest),
            }
        }
        Err(PatchError::ScheduleSearchExhausted {
            patch: name.to_string(),
            iterations: self.max_iterations,
        })
    }
}

/// Resolve with the default iteration bound.
pub fn resolve(
    patches: &[ScheduledPatch],
    state: &ResolutionState,
    now: DateTime<Utc>,
) -> Result<ResolvedPatch, PatchError> {
    PatchResolver::new().resolve(patches, state, now)
}
