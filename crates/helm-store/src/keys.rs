//! Key layout shared by every worker

/// Prefix of every key this workspace writes
pub const KEY_PREFIX: &str = "helm";

/// Persisted orchestration state
#[must_use]
pub fn state_key(task_id: &str) -> String {
    format!("{KEY_PREFIX}:state:{task_id}")
}

/// Lock serializing decisions on one orchestration
#[must_use]
pub fn approval_lock_key(orchestration_id: &str) -> String {
    format!("{KEY_PREFIX}:lock:approval:{orchestration_id}")
}

pub(crate) fn approval_key(id: &str) -> String {
    format!("{KEY_PREFIX}:approval:{id}")
}

pub(crate) fn approval_claim_key(id: &str) -> String {
    format!("{KEY_PREFIX}:approval:{id}:decision")
}

pub(crate) fn approvals_pending_key() -> String {
    format!("{KEY_PREFIX}:approvals:pending")
}

pub(crate) fn approvals_all_key() -> String {
    format!("{KEY_PREFIX}:approvals:all")
}
