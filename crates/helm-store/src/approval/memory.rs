use super::{purgeable, ApprovalStore};
use crate::error::ApprovalError;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use helm_core::{Approval, ApprovalRequest, Decision};

/// In-process approval store
///
/// Lost on restart; for tests and development.
#[derive(Debug, Default)]
pub struct MemoryApprovalStore {
    approvals: DashMap<String, Approval>,
}

impl MemoryApprovalStore {
    /// Create empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApprovalStore for MemoryApprovalStore {
    async fn create(&self, request: ApprovalRequest) -> Result<Approval, ApprovalError> {
        let approval = Approval::from_request(request, Utc::now());
        self.approvals.insert(approval.id.clone(), approval.clone());
        tracing::debug!(approval_id = %approval.id, "approval created");
        Ok(approval)
    }

    async fn get(&self, id: &str) -> Result<Option<Approval>, ApprovalError> {
        Ok(self.approvals.get_mut(id).map(|mut entry| {
            entry.expire_if_overdue(Utc::now());
            entry.clone()
        }))
    }

    async fn decide(
        &self,
        id: &str,
        decision: Decision,
        decider: &str,
        reason: Option<&str>,
    ) -> Result<Approval, ApprovalError> {
        let mut entry = self
            .approvals
            .get_mut(id)
            .ok_or_else(|| ApprovalError::NotFound(id.to_string()))?;
        if !entry.decide(decision, decider, reason, Utc::now()) {
            tracing::debug!(approval_id = %id, status = entry.status.as_str(), "decision ignored");
        }
        Ok(entry.clone())
    }

    async fn list_pending(&self) -> Result<Vec<Approval>, ApprovalError> {
        let now = Utc::now();
        let mut pending: Vec<Approval> = self
            .approvals
            .iter_mut()
            .filter_map(|mut entry| {
                entry.expire_if_overdue(now);
                entry.is_pending().then(|| entry.clone())
            })
            .collect();
        pending.sort_by_key(|a| a.requested_at);
        Ok(pending)
    }

    async fn purge_decided(&self, age: Duration) -> Result<usize, ApprovalError> {
        let now = Utc::now();
        let cutoff = now - age;
        let before = self.approvals.len();
        self.approvals.retain(|_, approval| {
            approval.expire_if_overdue(now);
            !purgeable(approval, cutoff)
        });
        Ok(before - self.approvals.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::contract;

    #[tokio::test]
    async fn first_decision_wins() {
        contract::first_decision_wins(&MemoryApprovalStore::new()).await;
    }

    #[tokio::test]
    async fn overdue_expires_on_read() {
        contract::overdue_expires_on_read(&MemoryApprovalStore::new()).await;
    }

    #[tokio::test]
    async fn pending_listing_and_purge() {
        contract::pending_listing_and_purge(&MemoryApprovalStore::new()).await;
    }
}
