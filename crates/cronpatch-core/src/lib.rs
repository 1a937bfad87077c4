//! Scheduled-patch resolution for cronpatch.
//!
//! This crate provides:
//! - Cron expression parsing with IANA timezones
//! - The patch resolver that decides which named patch is active at an instant
//! - The apply decision that picks create, update, or skip for the target object
//! - An injectable clock shared by the scheduler and the controller

pub mod apply;
pub mod clock;
mod error;
pub mod resolver;
pub mod schedule;
pub mod target;
mod types;

pub use apply::{ApplyAction, SkipReason, decide};
pub use clock::{Clock, FakeClock, SystemClock};
pub use error::{PatchError, ScheduleError};
pub use resolver::{DEFAULT_MAX_SCHEDULE_ITERATIONS, PatchResolver, resolve};
pub use schedule::CronSchedule;
pub use target::{
    MetricKind, MetricSpec, MetricTarget, ScalingPatch, ScalingSpec, ScalingTarget, TargetRef,
    TargetTemplate, TemplateMetadata, build_target,
};
pub use types::{ResolutionState, ResolvedPatch, ResourceKey, ScheduledPatch};
