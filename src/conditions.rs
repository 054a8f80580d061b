//! # Condition Set
//!
//! Aggregation of named tri-state conditions into one readiness verdict.
//!
//! Each resource kind declares its dependent condition types as data (see
//! [`TOPIC_CONDITIONS`]). Marking a dependent condition recomputes the
//! aggregate `Ready` condition: `True` iff every dependent is `True`, `False`
//! if any dependent is `False`, otherwise `Unknown`.
//!
//! Conditions are never removed, only transitioned. The last transition time
//! is bumped only when the status value actually changes, so re-marking a
//! condition `True` coalesces without touching the timestamp.

use crate::Condition;
use chrono::Utc;

pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_TOPIC_READY: &str = "TopicReady";
pub const CONDITION_PUBLISHER_READY: &str = "PublisherReady";

pub const STATUS_TRUE: &str = "True";
pub const STATUS_FALSE: &str = "False";
pub const STATUS_UNKNOWN: &str = "Unknown";

/// Condition set for the `Topic` kind: ready when the backing topic exists
/// and the publisher workload is serving.
pub static TOPIC_CONDITIONS: ConditionSet =
    ConditionSet::new(&[CONDITION_TOPIC_READY, CONDITION_PUBLISHER_READY]);

/// A statically declared dependency set of condition types, plus the
/// aggregate `Ready` condition they roll up into.
#[derive(Debug)]
pub struct ConditionSet {
    dependents: &'static [&'static str],
}

impl ConditionSet {
    #[must_use]
    pub const fn new(dependents: &'static [&'static str]) -> Self {
        Self { dependents }
    }

    /// Sets every unset condition (dependents plus `Ready`) to `Unknown`.
    /// Idempotent: conditions already present keep their value.
    pub fn initialize(&self, conditions: &mut Vec<Condition>) {
        for t in self.dependents.iter().chain([&CONDITION_READY]) {
            if get_condition(conditions, t).is_none() {
                set_condition(conditions, t, STATUS_UNKNOWN, None, None);
            }
        }
    }

    pub fn mark_true(&self, conditions: &mut Vec<Condition>, condition_type: &str) {
        set_condition(conditions, condition_type, STATUS_TRUE, None, None);
        self.recompute_ready(conditions, condition_type);
    }

    pub fn mark_false(
        &self,
        conditions: &mut Vec<Condition>,
        condition_type: &str,
        reason: &str,
        message: &str,
    ) {
        set_condition(
            conditions,
            condition_type,
            STATUS_FALSE,
            Some(reason),
            Some(message),
        );
        self.recompute_ready(conditions, condition_type);
    }

    pub fn mark_unknown(
        &self,
        conditions: &mut Vec<Condition>,
        condition_type: &str,
        reason: &str,
        message: &str,
    ) {
        set_condition(
            conditions,
            condition_type,
            STATUS_UNKNOWN,
            Some(reason),
            Some(message),
        );
        self.recompute_ready(conditions, condition_type);
    }

    /// Aggregate readiness: a pure function of the current dependent
    /// conditions, independent of any stored `Ready` condition.
    #[must_use]
    pub fn is_ready(&self, conditions: &[Condition]) -> bool {
        self.dependents
            .iter()
            .all(|t| matches!(get_condition(conditions, t), Some(c) if c.status == STATUS_TRUE))
    }

    fn recompute_ready(&self, conditions: &mut Vec<Condition>, changed: &str) {
        // Marking a non-dependent (e.g. Ready itself) never cascades.
        if !self.dependents.contains(&changed) {
            return;
        }

        // The aggregate carries the reason of the first non-True dependent so
        // users see why the resource is not ready.
        let mut aggregate = (STATUS_TRUE, None, None);
        for t in self.dependents {
            match get_condition(conditions, t) {
                Some(c) if c.status == STATUS_TRUE => {}
                Some(c) if c.status == STATUS_FALSE => {
                    aggregate = (STATUS_FALSE, c.reason.clone(), c.message.clone());
                    break;
                }
                Some(c) => {
                    aggregate = (STATUS_UNKNOWN, c.reason.clone(), c.message.clone());
                }
                None => {
                    aggregate = (STATUS_UNKNOWN, None, None);
                }
            }
        }
        let (status, reason, message) = aggregate;
        set_condition(
            conditions,
            CONDITION_READY,
            status,
            reason.as_deref(),
            message.as_deref(),
        );
    }
}

/// Returns the condition with the given type, if present.
#[must_use]
pub fn get_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

fn set_condition(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    status: &str,
    reason: Option<&str>,
    message: Option<&str>,
) {
    match conditions.iter_mut().find(|c| c.r#type == condition_type) {
        Some(existing) => {
            let status_changed = existing.status != status;
            let detail_changed =
                existing.reason.as_deref() != reason || existing.message.as_deref() != message;
            // Only a duplicate True coalesces silently; re-marking a non-True
            // status with a new reason or message is a visible transition.
            if status_changed || (status != STATUS_TRUE && detail_changed) {
                existing.last_transition_time = Some(Utc::now().to_rfc3339());
            }
            existing.status = status.to_string();
            existing.reason = reason.map(str::to_string);
            existing.message = message.map(str::to_string);
        }
        None => conditions.push(Condition {
            r#type: condition_type.to_string(),
            status: status.to_string(),
            last_transition_time: Some(Utc::now().to_rfc3339()),
            reason: reason.map(str::to_string),
            message: message.map(str::to_string),
        }),
    }
}
