use k8s_openapi::{
    apimachinery::pkg::apis::meta::v1::{Condition, Time},
    chrono::Utc,
};

use crate::Error;

const TYPE_READY: &str = "Ready";
const TYPE_SYNCED: &str = "Synced";

pub trait ConditionsExt {
    fn merge_from(&self, other: &Self) -> Self;
}

impl ConditionsExt for Vec<Condition> {
    /// Conditions in `other` replace conditions of the same type, keeping the
    /// existing transition time when nothing but the time changed.
    fn merge_from(&self, other: &Self) -> Self {
        let mut results: Vec<_> = self
            .iter()
            .map(|s| match other.iter().find(|o| s.type_ == o.type_) {
                Some(o) => {
                    if s.status == o.status && s.reason == o.reason && s.message == o.message {
                        s.clone()
                    } else {
                        o.clone()
                    }
                }
                None => s.clone(),
            })
            .collect();

        for o in other {
            if !results.iter().any(|s| s.type_ == o.type_) {
                results.push(o.clone());
            }
        }

        results
    }
}

fn condition(type_: &str, status: bool, reason: &str, message: String) -> Condition {
    Condition {
        last_transition_time: Time(Utc::now()),
        message,
        observed_generation: None,
        reason: reason.into(),
        status: if status { "True" } else { "False" }.into(),
        type_: type_.into(),
    }
}

/*
 * ============================================================================
 * Ready
 * ============================================================================
 */
#[must_use]
pub fn available() -> Condition {
    condition(TYPE_READY, true, "Available", String::new())
}

#[must_use]
pub fn creating() -> Condition {
    condition(TYPE_READY, false, "Creating", String::new())
}

#[must_use]
pub fn deleting() -> Condition {
    condition(TYPE_READY, false, "Deleting", String::new())
}

#[must_use]
pub fn in_use(users: usize) -> Condition {
    condition(
        TYPE_READY,
        true,
        "InUse",
        format!("ProviderConfig is used by {users} managed resource(s)."),
    )
}

#[must_use]
pub fn unused() -> Condition {
    condition(
        TYPE_READY,
        true,
        "Unused",
        "ProviderConfig is not used by any managed resource.".into(),
    )
}

/*
 * ============================================================================
 * Synced
 * ============================================================================
 */
#[must_use]
pub fn reconcile_error(error: &Error) -> Condition {
    condition(TYPE_SYNCED, false, "ReconcileError", error.to_string())
}

#[must_use]
pub fn reconcile_paused() -> Condition {
    condition(TYPE_SYNCED, false, "ReconcilePaused", String::new())
}

#[must_use]
pub fn reconcile_success() -> Condition {
    condition(TYPE_SYNCED, true, "ReconcileSuccess", String::new())
}
