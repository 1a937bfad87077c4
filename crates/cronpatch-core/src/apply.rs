//! Create/update/skip decision for the target object.

use std::fmt;

use crate::ScalingTarget;

/// Why an apply left the target untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// The live target carries the skip annotation.
    OverrideMarker,
    /// The live spec already equals the desired spec.
    NoChange,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OverrideMarker => f.write_str("override-marker"),
            Self::NoChange => f.write_str("no-change"),
        }
    }
}

/// What to do with the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApplyAction {
    Create,
    Update,
    Skip(SkipReason),
}

impl ApplyAction {
    /// Whether this action commits a new resolution anchor.
    ///
    /// "No change" never advances it, so a later resolution can still find the
    /// true transition time. The skip marker advances it only when configured.
    pub fn advances_anchor(&self, on_override_marker: bool) -> bool {
        match self {
            Self::Create | Self::Update => true,
            Self::Skip(SkipReason::OverrideMarker) => on_override_marker,
            Self::Skip(SkipReason::NoChange) => false,
        }
    }
}

/// Decide how to reconcile `current` towards `desired`.
///
/// `skip_annotation` names the annotation that, set to `true` on the live
/// target, freezes it.
pub fn decide(
    current: Option<&ScalingTarget>,
    desired: &ScalingTarget,
    skip_annotation: &str,
) -> ApplyAction {
    let Some(current) = current else {
        return ApplyAction::Create;
    };

    let skipped = current
        .annotations
        .get(skip_annotation)
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"));
    if skipped {
        return ApplyAction::Skip(SkipReason::OverrideMarker);
    }

    if current.spec == desired.spec {
        ApplyAction::Skip(SkipReason::NoChange)
    } else {
        ApplyAction::Update
    }
}
