use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

use crate::crd::JupyterKernelCondition;

pub const PENDING: &str = "Pending";
pub const RUNNING: &str = "Running";
pub const SUCCEEDED: &str = "Succeeded";
pub const FAILED: &str = "Failed";
pub const CULLED: &str = "Culled";

/// Tracks whether the kernel's catalog references resolved on the last pass.
pub const DEPENDENCY_RESOLVED: &str = "DependencyResolved";
/// Tracks whether the last attempt to apply the kernel workload went through.
pub const WORKLOAD_APPLIED: &str = "WorkloadApplied";

/// Merges `incoming` into the condition list.
///
/// A condition type appears at most once; types keep their first-seen order.
/// lastTransitionTime only moves when the status flips, lastUpdateTime moves
/// on every observation.
pub fn record_condition(
    conditions: &mut Vec<JupyterKernelCondition>,
    mut incoming: JupyterKernelCondition,
    now: &Time,
) {
    match conditions.iter_mut().find(|c| c.r#type == incoming.r#type) {
        Some(existing) => {
            if existing.status != incoming.status {
                existing.status = incoming.status;
                existing.last_transition_time = Some(now.clone());
            }
            existing.reason = incoming.reason;
            existing.message = incoming.message;
            existing.last_update_time = Some(now.clone());
        }
        None => {
            incoming.last_update_time = Some(now.clone());
            incoming.last_transition_time = Some(now.clone());
            conditions.push(incoming);
        }
    }
}

/// Moves the kernel to a new lifecycle state: any other lifecycle condition
/// still "True" is demoted first, then the new state is recorded "True".
pub fn set_lifecycle(
    conditions: &mut Vec<JupyterKernelCondition>,
    state: &str,
    reason: impl Into<String>,
    message: impl Into<String>,
    now: &Time,
) {
    let demote: Vec<String> = conditions
        .iter()
        .filter(|c| is_lifecycle(&c.r#type) && c.r#type != state && c.status == "True")
        .map(|c| c.r#type.clone())
        .collect();
    for r#type in demote {
        let superseded =
            JupyterKernelCondition::new(r#type, "False", "Superseded", format!("kernel moved to {state}"));
        record_condition(conditions, superseded, now);
    }
    record_condition(
        conditions,
        JupyterKernelCondition::new(state, "True", reason, message),
        now,
    );
}

fn is_lifecycle(r#type: &str) -> bool {
    matches!(r#type, PENDING | RUNNING | SUCCEEDED | FAILED | CULLED)
}

/// A kernel in Succeeded, Failed or Culled never runs again.
pub fn is_terminal(conditions: &[JupyterKernelCondition]) -> bool {
    conditions
        .iter()
        .any(|c| c.status == "True" && matches!(c.r#type.as_str(), SUCCEEDED | FAILED | CULLED))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn t(secs: i64) -> Time {
        Time(Utc.timestamp_opt(secs, 0).unwrap())
    }

    fn cond(r#type: &str, status: &str) -> JupyterKernelCondition {
        JupyterKernelCondition::new(r#type, status, "TestReason", "test message")
    }

    #[test]
    fn new_type_is_appended_with_both_timestamps() {
        let mut conditions = Vec::new();
        record_condition(&mut conditions, cond(PENDING, "True"), &t(100));

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_update_time, Some(t(100)));
        assert_eq!(conditions[0].last_transition_time, Some(t(100)));
    }

    #[test]
    fn same_status_only_advances_update_time() {
        let mut conditions = Vec::new();
        record_condition(&mut conditions, cond(RUNNING, "True"), &t(100));
        let refreshed = JupyterKernelCondition::new(RUNNING, "True", "StillRunning", "refreshed");
        record_condition(&mut conditions, refreshed, &t(200));

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, Some(t(100)));
        assert_eq!(conditions[0].last_update_time, Some(t(200)));
        assert_eq!(conditions[0].reason.as_deref(), Some("StillRunning"));
    }

    #[test]
    fn status_flip_advances_both_timestamps() {
        let mut conditions = Vec::new();
        record_condition(&mut conditions, cond(RUNNING, "True"), &t(100));
        record_condition(&mut conditions, cond(RUNNING, "False"), &t(200));

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, "False");
        assert_eq!(conditions[0].last_transition_time, Some(t(200)));
        assert_eq!(conditions[0].last_update_time, Some(t(200)));
    }

    #[test]
    fn types_keep_first_seen_order() {
        let mut conditions = Vec::new();
        record_condition(&mut conditions, cond(PENDING, "True"), &t(100));
        record_condition(&mut conditions, cond(RUNNING, "True"), &t(200));
        record_condition(&mut conditions, cond(PENDING, "False"), &t(300));

        let order: Vec<&str> = conditions.iter().map(|c| c.r#type.as_str()).collect();
        assert_eq!(order, vec![PENDING, RUNNING]);
    }

    #[test]
    fn set_lifecycle_demotes_previous_state() {
        let mut conditions = Vec::new();
        set_lifecycle(&mut conditions, PENDING, "PodPending", "waiting", &t(100));
        set_lifecycle(&mut conditions, RUNNING, "PodRunning", "up", &t(200));

        let pending = conditions.iter().find(|c| c.r#type == PENDING).unwrap();
        let running = conditions.iter().find(|c| c.r#type == RUNNING).unwrap();
        assert_eq!(pending.status, "False");
        assert_eq!(pending.last_transition_time, Some(t(200)));
        assert_eq!(running.status, "True");
        assert!(!is_terminal(&conditions));
    }

    #[test]
    fn culled_is_terminal() {
        let mut conditions = Vec::new();
        set_lifecycle(&mut conditions, RUNNING, "PodRunning", "up", &t(100));
        set_lifecycle(&mut conditions, CULLED, "IdleTimeoutExceeded", "culled", &t(200));

        assert!(is_terminal(&conditions));
        let running = conditions.iter().find(|c| c.r#type == RUNNING).unwrap();
        assert_eq!(running.status, "False");
    }

    #[test]
    fn non_lifecycle_types_are_not_demoted() {
        let mut conditions = Vec::new();
        record_condition(&mut conditions, cond(DEPENDENCY_RESOLVED, "True"), &t(100));
        set_lifecycle(&mut conditions, RUNNING, "PodRunning", "up", &t(200));

        let dep = conditions.iter().find(|c| c.r#type == DEPENDENCY_RESOLVED).unwrap();
        assert_eq!(dep.status, "True");
    }
}
