//! Error types for patch resolution.

use thiserror::Error;

/// A cron expression or timezone that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid schedule {expression:?}: {reason}")]
pub struct ScheduleError {
    /// The expression as written by the resource owner.
    pub expression: String,
    /// Why it was rejected.
    pub reason: String,
}

impl ScheduleError {
    pub(crate) fn new(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            reason: reason.into(),
        }
    }
}

/// Errors that can occur while resolving or applying a scheduled patch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    /// A declared schedule does not parse.
    #[error("invalid schedule for patch {patch}: {source}")]
    InvalidSchedule {
        patch: String,
        #[source]
        source: ScheduleError,
    },

    /// The fire-time search for a schedule hit its iteration bound.
    #[error("cannot find the next schedule of {patch} within {iterations} iterations")]
    ScheduleSearchExhausted { patch: String, iterations: usize },

    /// The referenced patch is not declared by the resource.
    #[error("no scheduled patch named {0}")]
    UnknownPatch(String),
}
