//! Approval store
//!
//! Every backend applies the same rules from [`helm_core::Approval`]:
//! - reads lazily expire overdue pending approvals
//! - the first decision wins; later ones return the record unchanged
//! - only `approved` validates

mod file;
mod memory;
mod redis_backend;

pub use self::file::FileApprovalStore;
pub use self::memory::MemoryApprovalStore;
pub use self::redis_backend::RedisApprovalStore;

use crate::error::ApprovalError;
use async_trait::async_trait;
use chrono::Duration;
use helm_core::{Approval, ApprovalRequest, ApprovalStatus, Decision};

/// Storage for human approvals
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    /// Create a pending approval
    async fn create(&self, request: ApprovalRequest) -> Result<Approval, ApprovalError>;

    /// Fetch an approval, expiring it when overdue
    async fn get(&self, id: &str) -> Result<Option<Approval>, ApprovalError>;

    /// Apply a decision
    ///
    /// Returns the stored record. When the approval was already decided or
    /// expired, that record is returned unchanged.
    async fn decide(
        &self,
        id: &str,
        decision: Decision,
        decider: &str,
        reason: Option<&str>,
    ) -> Result<Approval, ApprovalError>;

    /// Pending approvals, oldest first
    async fn list_pending(&self) -> Result<Vec<Approval>, ApprovalError>;

    /// Remove decided or expired approvals older than `age`
    ///
    /// Returns how many were removed.
    async fn purge_decided(&self, age: Duration) -> Result<usize, ApprovalError>;

    /// Grant an approval
    async fn approve(
        &self,
        id: &str,
        decider: &str,
        reason: Option<&str>,
    ) -> Result<Approval, ApprovalError> {
        self.decide(id, Decision::Approve, decider, reason).await
    }

    /// Refuse an approval
    async fn deny(
        &self,
        id: &str,
        decider: &str,
        reason: Option<&str>,
    ) -> Result<Approval, ApprovalError> {
        self.decide(id, Decision::Deny, decider, reason).await
    }

    /// Check that an approval grants the gated work
    async fn validate(&self, id: &str) -> Result<Approval, ApprovalError> {
        let approval = self
            .get(id)
            .await?
            .ok_or_else(|| ApprovalError::NotFound(id.to_string()))?;
        if approval.status == ApprovalStatus::Approved {
            Ok(approval)
        } else {
            Err(ApprovalError::NotApproved {
                id: approval.id.clone(),
                status: approval.status,
            })
        }
    }
}

/// Whether `purge_decided` may drop this record
pub(crate) fn purgeable(approval: &Approval, cutoff: chrono::DateTime<chrono::Utc>) -> bool {
    !approval.is_pending() && approval.decided_at.unwrap_or(approval.expires_at) <= cutoff
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every backend must show

    use super::*;
    use helm_core::RiskLevel;

    fn request() -> ApprovalRequest {
        ApprovalRequest::new("deploy fix", RiskLevel::High, "touches prod config", "dev@example.com")
            .for_orchestration("o1")
    }

    pub(crate) async fn first_decision_wins(store: &dyn ApprovalStore) {
        let created = store.create(request()).await.unwrap();
        assert_eq!(created.status, ApprovalStatus::Pending);
        assert_eq!(created.orchestration_id.as_deref(), Some("o1"));

        let approved = store.approve(&created.id, "alice", Some("looks safe")).await.unwrap();
        assert_eq!(approved.status, ApprovalStatus::Approved);

        let second = store.deny(&created.id, "bob", Some("changed my mind")).await.unwrap();
        assert_eq!(second.status, ApprovalStatus::Approved);
        assert_eq!(second.decided_by.as_deref(), Some("alice"));
        assert_eq!(second.decision_reason.as_deref(), Some("looks safe"));

        assert!(store.validate(&created.id).await.is_ok());
        assert!(store.list_pending().await.unwrap().is_empty());
    }

    pub(crate) async fn overdue_expires_on_read(store: &dyn ApprovalStore) {
        let created = store.create(request().with_ttl_secs(0)).await.unwrap();

        let read = store.get(&created.id).await.unwrap().unwrap();
        assert_eq!(read.status, ApprovalStatus::Expired);

        let decided = store.approve(&created.id, "alice", None).await.unwrap();
        assert_eq!(decided.status, ApprovalStatus::Expired);
        assert!(decided.decided_by.is_none());

        assert!(matches!(
            store.validate(&created.id).await,
            Err(ApprovalError::NotApproved {
                status: ApprovalStatus::Expired,
                ..
            })
        ));
    }

    pub(crate) async fn pending_listing_and_purge(store: &dyn ApprovalStore) {
        let a = store.create(request()).await.unwrap();
        let b = store.create(request()).await.unwrap();
        store.deny(&b.id, "carol", None).await.unwrap();

        let pending = store.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, a.id);

        assert_eq!(store.purge_decided(Duration::zero()).await.unwrap(), 1);
        assert!(store.get(&b.id).await.unwrap().is_none());
        assert!(store.get(&a.id).await.unwrap().is_some());

        assert!(matches!(
            store.validate("missing").await,
            Err(ApprovalError::NotFound(_))
        ));
        assert!(matches!(
            store.approve("missing", "alice", None).await,
            Err(ApprovalError::NotFound(_))
        ));
    }
}
