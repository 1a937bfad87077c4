//! Error types for the registry.

use thiserror::Error;

use cronpatch_core::ScheduleError;

/// Errors that can occur in registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// The cron expression or timezone does not parse.
    #[error(transparent)]
    InvalidSchedule(#[from] ScheduleError),
}
