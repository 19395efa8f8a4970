//! Lifecycle state machine
//!
//! Declarative transition table plus pinning guards. Validation is pure;
//! the manager consults it before any state write so that every row
//! update and its lifecycle event describe a legal walk.

use crate::types::{LifecycleState, TriggeredBy};

/// Outcome of validating a proposed transition
#[derive(Debug, Clone)]
pub struct TransitionVerdict {
    pub valid: bool,
    /// Same-state transitions are legal but write nothing
    pub no_op: bool,
    /// Human-readable explanation of the verdict
    pub reason: String,
}

impl TransitionVerdict {
    fn valid(no_op: bool, reason: String) -> Self {
        Self {
            valid: true,
            no_op,
            reason,
        }
    }

    fn invalid(reason: String) -> Self {
        Self {
            valid: false,
            no_op: false,
            reason,
        }
    }
}

/// Whether the base table (ignoring pin guards) allows `from -> to`
fn table_allows(from: LifecycleState, to: LifecycleState) -> bool {
    use LifecycleState::*;
    match from {
        Active => matches!(to, Active | Decaying | Archived | Pinned),
        Decaying => matches!(to, Active | Decaying | Archived | Pinned),
        Archived => matches!(to, Active | Archived | Expired | Pinned),
        Expired => matches!(to, Expired | Pinned),
        Pinned => true,
    }
}

/// Validate a proposed transition
///
/// Guards are evaluated in order:
/// 1. same-state is a valid no-op
/// 2. pinning is always valid
/// 3. the system may never move a pinned memory anywhere else
/// 4. a user may move a pinned memory anywhere
/// 5. otherwise the table decides
pub fn validate_transition(
    from: LifecycleState,
    to: LifecycleState,
    triggered_by: TriggeredBy,
) -> TransitionVerdict {
    if from == to {
        return TransitionVerdict::valid(true, format!("already {}", to));
    }

    if to == LifecycleState::Pinned {
        return TransitionVerdict::valid(false, default_reason(from, to, triggered_by));
    }

    if from == LifecycleState::Pinned {
        return match triggered_by {
            TriggeredBy::System => TransitionVerdict::invalid(
                "pinned memories are exempt from automatic transitions".to_string(),
            ),
            TriggeredBy::User => {
                TransitionVerdict::valid(false, default_reason(from, to, triggered_by))
            }
        };
    }

    if table_allows(from, to) {
        TransitionVerdict::valid(false, default_reason(from, to, triggered_by))
    } else {
        TransitionVerdict::invalid(format!("transition {} -> {} is not allowed", from, to))
    }
}

/// Generated reason for a transition when the caller supplies none
pub fn default_reason(from: LifecycleState, to: LifecycleState, triggered_by: TriggeredBy) -> String {
    use LifecycleState::*;
    match (from, to, triggered_by) {
        (_, Pinned, TriggeredBy::User) => "pinned by user".to_string(),
        (_, Pinned, TriggeredBy::System) => "pinned".to_string(),
        (Pinned, Active, TriggeredBy::User) => "unpinned by user".to_string(),
        (Active, Decaying, _) => "decay score fell below threshold".to_string(),
        (Decaying, Active, _) => "memory accessed again".to_string(),
        (Active | Decaying, Archived, _) => "effective TTL elapsed".to_string(),
        (Archived, Active, TriggeredBy::User) => "restored from archive by user".to_string(),
        (Archived, Active, TriggeredBy::System) => "restored from archive".to_string(),
        (Archived, Expired, _) => "archive retention elapsed".to_string(),
        (f, t, by) => format!("{} -> {} ({})", f, t, by),
    }
}
