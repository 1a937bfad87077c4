//! Controller for cron-scheduled patches.
//!
//! A resource declares a target template and a set of named patches, each
//! with a cron schedule. This crate keeps the derived target object in line
//! with whichever patch is active:
//! - Periodic reconciliation resolves the active patch and applies it
//! - A cron job per patch applies it the moment its schedule fires
//! - Finalizers make sure jobs are dropped before a resource goes away
//! - Transient store failures are retried with exponential backoff

mod config;
mod controller;
mod daemon;
mod error;
mod memory;
mod resource;
mod store;
pub mod telemetry;

pub use config::{ControllerConfig, LogConfig};
pub use controller::{ApplyOutcome, Controller, ReconcileOutcome};
pub use daemon::ResyncSummary;
pub use error::{ConfigError, ControllerError, StoreError};
pub use memory::{MemoryRecorder, MemoryStore};
pub use resource::{CronPatchResource, CronPatchSpec, FINALIZER, ResourceStatus};
pub use store::{Event, EventReason, EventRecorder, ResourceStore, TracingRecorder};
