//! Condition bookkeeping
//!
//! Conditions are keyed by type and unique per object. [`set_condition`] is
//! the single transition function: it merges a freshly evaluated condition
//! into the stored set and reports what changed, so callers can decide
//! whether an event is warranted without re-deriving it.

use crate::crd::Condition;

/// Outcome of merging a condition into a condition set
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionChange {
    /// Stored condition already matched the evaluation
    Unchanged,
    /// Only the message differed; stored value updated, no transition
    Updated,
    /// Condition was added, or its status or reason changed
    Transitioned,
}

impl ConditionChange {
    /// Whether this change warrants an observability event
    pub fn emits_event(self) -> bool {
        self == Self::Transitioned
    }

    /// Whether the stored condition set was modified
    pub fn is_modified(self) -> bool {
        self != Self::Unchanged
    }
}

/// Find a condition by type
pub fn find<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Returns true if the condition of the given type exists and is True
pub fn is_true(conditions: &[Condition], type_: &str) -> bool {
    find(conditions, type_).map(Condition::is_true).unwrap_or(false)
}

/// Merge `next` into `conditions`, last write wins per type.
///
/// `lastTransitionTime` only moves when the status changes; a reason change
/// with the same status keeps the previous timestamp but still counts as a
/// transition for event purposes.
pub fn set_condition(conditions: &mut Vec<Condition>, mut next: Condition) -> ConditionChange {
    let Some(existing) = conditions.iter_mut().find(|c| c.type_ == next.type_) else {
        conditions.push(next);
        return ConditionChange::Transitioned;
    };

    let status_changed = existing.status != next.status;
    let reason_changed = existing.reason != next.reason;

    if !status_changed && !reason_changed {
        if existing.message == next.message {
            return ConditionChange::Unchanged;
        }
        existing.message = next.message;
        return ConditionChange::Updated;
    }

    if !status_changed {
        next.last_transition_time = existing.last_transition_time;
    }
    *existing = next;
    ConditionChange::Transitioned
}
