//! Error types for the controller.

use thiserror::Error;

use cronpatch_core::{PatchError, ResourceKey, ScheduleError};
use cronpatch_scheduler::SchedulerError;

/// Failures reported by a [`ResourceStore`](crate::ResourceStore).
///
/// All of them are treated as transient.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The object to write does not exist.
    #[error("not found: {0}")]
    NotFound(ResourceKey),

    /// The object to create already exists.
    #[error("already exists: {0}")]
    AlreadyExists(ResourceKey),

    /// The backing store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors that can occur while reconciling a resource.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A declared schedule does not parse.
    #[error("invalid schedule for patch {patch}: {source}")]
    Schedule {
        patch: String,
        #[source]
        source: ScheduleError,
    },

    /// The fire-time search gave up.
    #[error("cannot find the next schedule of {patch} within {iterations} iterations")]
    SearchExhausted { patch: String, iterations: usize },

    /// The patch name is not declared by the resource.
    #[error("no scheduled patch named {0}")]
    UnknownPatch(String),

    /// Job registration failed.
    #[error("registry error: {0}")]
    Registry(#[from] SchedulerError),
}

impl ControllerError {
    /// Whether retrying the same operation later can succeed.
    ///
    /// Only store failures are transient; everything else needs the resource
    /// to change first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

impl From<PatchError> for ControllerError {
    fn from(err: PatchError) -> Self {
        match err {
            PatchError::InvalidSchedule { patch, source } => Self::Schedule { patch, source },
            PatchError::ScheduleSearchExhausted { patch, iterations } => {
                Self::SearchExhausted { patch, iterations }
            }
            PatchError::UnknownPatch(name) => Self::UnknownPatch(name),
        }
    }
}

/// Invalid controller configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable holds an unusable value.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    /// A configuration document failed to parse.
    #[error("invalid config document: {0}")]
    Json(#[from] serde_json::Error),

    /// A setting is out of range.
    #[error("invalid setting {field}: {reason}")]
    OutOfRange { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_store_errors_are_retryable() {
        let key = ResourceKey::new("ns", "foo");
        assert!(ControllerError::Store(StoreError::NotFound(key)).is_retryable());
        assert!(ControllerError::Store(StoreError::Unavailable("down".into())).is_retryable());
        assert!(!ControllerError::UnknownPatch("p".into()).is_retryable());
        assert!(
            !ControllerError::SearchExhausted {
                patch: "p".into(),
                iterations: 10
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_patch_errors_map_to_matching_variants() {
        let err: ControllerError = PatchError::UnknownPatch("gone".into()).into();
        assert!(matches!(err, ControllerError::UnknownPatch(name) if name == "gone"));

        let err: ControllerError = PatchError::ScheduleSearchExhausted {
            patch: "p".into(),
            iterations: 5,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "cannot find the next schedule of p within 5 iterations"
        );
    }
}
