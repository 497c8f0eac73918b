//! Error types for Helm Worker
//!
//! [`WorkerError::is_retryable`] decides between another in-process attempt
//! and a permanent failure that is reported and dead-lettered.

use crate::config::ConfigError;
use helm_core::AgentError;
use helm_events::EventBusError;
use helm_orchestrator::OrchestratorError;
use helm_queue::QueueError;
use helm_rollback::RollbackError;
use helm_store::{ApprovalError, LockError, OpenError, StateStoreError};

/// Job and startup errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Message lacks a required field
    #[error("message is missing required field '{0}'")]
    MissingField(&'static str),

    /// Message field has the wrong shape
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        /// Field name
        field: &'static str,
        /// What was wrong
        reason: String,
    },

    /// `role` names nothing this worker handles
    #[error("unknown role: {0}")]
    UnknownRole(String),

    /// Approval job without an actor identity
    #[error("approve requires an actor")]
    ActorRequired,

    /// No persisted state for a paused orchestration
    #[error("no paused state for orchestration {0}")]
    StateNotFound(String),

    /// Direct agent job rejected by the run's execution policy
    #[error("rejected by policy: {0}")]
    PolicyRejected(String),

    /// A claimed orchestration failed after its paused state was consumed
    #[error("orchestration {orchestration_id} failed after resuming: {source}")]
    AfterResume {
        /// Orchestration id
        orchestration_id: String,
        /// Underlying failure
        source: Box<WorkerError>,
    },

    /// Worker built without a planner
    #[error("no planner configured; set agents.planner or HELM_PLANNER_CMD")]
    NoPlanner,

    /// Orchestration lifecycle failure
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    /// Direct agent call failed
    #[error(transparent)]
    Agent(#[from] AgentError),

    /// Approval store failure
    #[error(transparent)]
    Approval(#[from] ApprovalError),

    /// Lock contention or backend failure
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Paused state storage failure
    #[error(transparent)]
    State(#[from] StateStoreError),

    /// Queue failure
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Event bus failure
    #[error(transparent)]
    Events(#[from] EventBusError),

    /// Store backends could not be opened
    #[error(transparent)]
    Open(#[from] OpenError),

    /// Rollback manager could not be opened
    #[error(transparent)]
    Rollback(#[from] RollbackError),

    /// Bad configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// State or payload (de)serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WorkerError {
    /// Check if another attempt may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Orchestrator(e) => e.is_retryable(),
            Self::Agent(e) => e.is_retryable(),
            Self::Approval(e) => e.is_retryable(),
            Self::Lock(e) => e.is_retryable(),
            Self::Queue(e) => e.is_retryable(),
            Self::Events(e) => e.is_retryable(),
            Self::State(_) => true,
            _ => false,
        }
    }

    /// Lock held by another worker; the message belongs to that worker
    #[must_use]
    pub fn is_contention(&self) -> bool {
        matches!(self, Self::Lock(LockError::Contended { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(!WorkerError::ActorRequired.is_retryable());
        assert!(!WorkerError::MissingField("taskId").is_retryable());
        assert!(WorkerError::Agent(AgentError::Failed("x".into())).is_retryable());
        assert!(WorkerError::State(StateStoreError::Backend("down".into())).is_retryable());
        let after = WorkerError::AfterResume {
            orchestration_id: "o1".into(),
            source: Box::new(WorkerError::State(StateStoreError::Backend("down".into()))),
        };
        assert!(!after.is_retryable());

        let contended = WorkerError::Lock(LockError::Contended {
            key: "helm:lock:approval:o1".into(),
        });
        assert!(!contended.is_retryable());
        assert!(contended.is_contention());
        assert!(contended.to_string().contains("already being processed"));
    }
}
