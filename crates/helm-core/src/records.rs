//! Approval and rollback records
//!
//! Both records are plain data; the decision and expiry rules live here so
//! every storage backend applies them identically.

use crate::types::RiskLevel;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Default approval window
pub const DEFAULT_APPROVAL_TTL_SECS: i64 = 24 * 60 * 60;

/// Approval status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    /// Awaiting a decision
    Pending,
    /// Granted
    Approved,
    /// Refused
    Denied,
    /// Window elapsed without a decision
    Expired,
}

impl ApprovalStatus {
    /// Wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Expired => "expired",
        }
    }
}

/// Decision applied to a pending approval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Grant
    Approve,
    /// Refuse
    Deny,
}

/// Parameters for a new approval
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    /// What is being approved
    pub intent: String,
    /// Risk of the gated work
    pub risk_level: RiskLevel,
    /// Why approval is required
    pub reason: String,
    /// Who asked
    pub requester: String,
    /// Override of the default window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<i64>,
    /// Orchestration this approval gates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orchestration_id: Option<String>,
}

impl ApprovalRequest {
    /// Create new request
    #[must_use]
    pub fn new(
        intent: impl Into<String>,
        risk_level: RiskLevel,
        reason: impl Into<String>,
        requester: impl Into<String>,
    ) -> Self {
        Self {
            intent: intent.into(),
            risk_level,
            reason: reason.into(),
            requester: requester.into(),
            ttl_secs: None,
            orchestration_id: None,
        }
    }

    /// With custom expiry window
    #[must_use]
    pub fn with_ttl_secs(mut self, secs: i64) -> Self {
        self.ttl_secs = Some(secs);
        self
    }

    /// Link to an orchestration
    #[must_use]
    pub fn for_orchestration(mut self, id: impl Into<String>) -> Self {
        self.orchestration_id = Some(id.into());
        self
    }
}

/// Human approval record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    /// Identifier
    pub id: String,
    /// What is being approved
    pub intent: String,
    /// Risk level
    pub risk_level: RiskLevel,
    /// Why approval is required
    pub reason: String,
    /// Who asked
    pub requester: String,
    /// Status
    pub status: ApprovalStatus,
    /// Creation time
    pub requested_at: DateTime<Utc>,
    /// Expiry time
    pub expires_at: DateTime<Utc>,
    /// Decision time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    /// Who decided
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    /// Decision rationale
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_reason: Option<String>,
    /// Gated orchestration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orchestration_id: Option<String>,
}

impl Approval {
    /// Build a pending approval from a request
    #[must_use]
    pub fn from_request(request: ApprovalRequest, now: DateTime<Utc>) -> Self {
        let ttl = request.ttl_secs.unwrap_or(DEFAULT_APPROVAL_TTL_SECS);
        Self {
            id: Uuid::new_v4().to_string(),
            intent: request.intent,
            risk_level: request.risk_level,
            reason: request.reason,
            requester: request.requester,
            status: ApprovalStatus::Pending,
            requested_at: now,
            expires_at: now + Duration::seconds(ttl),
            decided_at: None,
            decided_by: None,
            decision_reason: None,
            orchestration_id: request.orchestration_id,
        }
    }

    /// Still awaiting a decision
    #[inline]
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }

    /// Move an overdue pending approval to `expired`
    ///
    /// Returns true when the record changed.
    pub fn expire_if_overdue(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_pending() && now >= self.expires_at {
            self.status = ApprovalStatus::Expired;
            true
        } else {
            false
        }
    }

    /// Apply a decision; first decision wins
    ///
    /// Returns true when the decision was applied. A record that is no longer
    /// pending (including one that just expired) is left untouched.
    pub fn decide(
        &mut self,
        decision: Decision,
        decider: &str,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> bool {
        self.expire_if_overdue(now);
        if !self.is_pending() {
            return false;
        }
        self.status = match decision {
            Decision::Approve => ApprovalStatus::Approved,
            Decision::Deny => ApprovalStatus::Denied,
        };
        self.decided_at = Some(now);
        self.decided_by = Some(decider.to_string());
        self.decision_reason = reason.map(str::to_string);
        true
    }
}

/// Rollback record status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollbackStatus {
    /// Snapshot available
    Pending,
    /// Snapshot restored
    Completed,
    /// Snapshot discarded
    Expired,
}

/// A restorable repository snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackRecord {
    /// Identifier
    pub id: String,
    /// Live repository tree
    pub repo_path: PathBuf,
    /// Snapshot copy
    pub snapshot_path: PathBuf,
    /// Linked approval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<String>,
    /// Linked task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Status
    pub status: RollbackStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Who executed the rollback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_by: Option<String>,
    /// When the rollback was executed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
    /// Free-form metadata
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> Approval {
        Approval::from_request(
            ApprovalRequest::new("deploy", RiskLevel::High, "prod change", "alice"),
            Utc::now(),
        )
    }

    #[test]
    fn default_window_is_one_day() {
        let approval = pending();
        assert_eq!(
            approval.expires_at - approval.requested_at,
            Duration::seconds(DEFAULT_APPROVAL_TTL_SECS)
        );
    }

    #[test]
    fn first_decision_wins() {
        let mut approval = pending();
        assert!(approval.decide(Decision::Approve, "bob", Some("lgtm"), Utc::now()));
        assert!(!approval.decide(Decision::Deny, "mallory", Some("no"), Utc::now()));

        assert_eq!(approval.status, ApprovalStatus::Approved);
        assert_eq!(approval.decided_by.as_deref(), Some("bob"));
        assert_eq!(approval.decision_reason.as_deref(), Some("lgtm"));
    }

    #[test]
    fn overdue_approval_cannot_be_decided() {
        let mut approval = Approval::from_request(
            ApprovalRequest::new("x", RiskLevel::Low, "r", "a").with_ttl_secs(1),
            Utc::now() - Duration::seconds(10),
        );
        assert!(!approval.decide(Decision::Approve, "bob", None, Utc::now()));
        assert_eq!(approval.status, ApprovalStatus::Expired);
        assert!(approval.decided_by.is_none());
    }
}
