//! Per-resource cron job registry for cronpatch.
//!
//! This crate provides a registry that:
//! - Tracks, per resource, one timed job for each scheduled patch name
//! - Replaces or clears a resource's jobs atomically under a single lock
//! - Owns the timer task that fires job callbacks at cron times
//! - Hands callbacks only the resource key and patch name

mod error;
mod registry;
mod types;

pub use error::SchedulerError;
pub use registry::CronRegistry;
pub use types::{JobCallback, JobFuture, JobHandle, RegistryConfig, ResourceJobSet};
