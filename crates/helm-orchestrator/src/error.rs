//! Error types for Helm Orchestrator
//!
//! Task-level failures never surface here; they are recorded in the task's
//! result. These errors cover planning and lifecycle problems only.

use crate::state::OrchestrationStatus;
use helm_core::AgentError;
use helm_store::ApprovalError;

/// Orchestration-level errors
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Planner failed or timed out
    #[error("planning failed: {0}")]
    Planning(#[source] AgentError),

    /// Plan has a dependency cycle and strict dependencies are enabled
    #[error("plan has a dependency cycle through: {}", ids.join(", "))]
    CyclicPlan {
        /// Tasks that would have been forced
        ids: Vec<String>,
    },

    /// Lifecycle table refused a status change
    #[error("illegal status transition: {from} -> {to}")]
    IllegalTransition {
        /// Current status
        from: OrchestrationStatus,
        /// Requested status
        to: OrchestrationStatus,
    },

    /// Operation needs a paused orchestration
    #[error("orchestration {id} is {status}, not awaiting approval")]
    NotAwaitingApproval {
        /// Orchestration id
        id: String,
        /// Current status
        status: OrchestrationStatus,
    },

    /// State has no plan to run
    #[error("orchestration {0} has no plan")]
    MissingPlan(String),

    /// Approval store rejected or could not validate the approval
    #[error("approval check failed: {0}")]
    Approval(#[from] ApprovalError),
}

impl OrchestratorError {
    /// Check if a retry may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Planning(e) => e.is_retryable(),
            Self::Approval(e) => e.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planner_timeouts_are_retryable() {
        let err = OrchestratorError::Planning(AgentError::Timeout {
            agent: "planner".into(),
            duration_secs: 5,
        });
        assert!(err.is_retryable());
        assert!(!OrchestratorError::MissingPlan("o1".into()).is_retryable());
    }

    #[test]
    fn cycle_message_names_tasks() {
        let err = OrchestratorError::CyclicPlan {
            ids: vec!["x".into(), "y".into()],
        };
        assert_eq!(err.to_string(), "plan has a dependency cycle through: x, y");
    }
}
