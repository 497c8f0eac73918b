//! Typed progress events
//!
//! The orchestrator reports everything through one unbounded channel; the
//! worker fans it out to the event bus and the results stream.

use crate::state::{LogLevel, OrchestrationStatus};
use serde::Serialize;
use tokio::sync::mpsc;

/// Progress of one orchestration
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    /// Log line
    Log {
        /// Orchestration id
        orchestration_id: String,
        /// Severity
        level: LogLevel,
        /// Text
        message: String,
    },
    /// Lifecycle change
    StatusChanged {
        /// Orchestration id
        orchestration_id: String,
        /// Previous status
        from: OrchestrationStatus,
        /// New status
        to: OrchestrationStatus,
    },
    /// A wave is about to run
    WaveStarted {
        /// Orchestration id
        orchestration_id: String,
        /// Wave index
        wave: usize,
        /// Tasks that will run
        task_ids: Vec<String>,
    },
    /// Every task of a wave resolved
    WaveCompleted {
        /// Orchestration id
        orchestration_id: String,
        /// Wave index
        wave: usize,
    },
    /// A task was dispatched
    TaskStarted {
        /// Orchestration id
        orchestration_id: String,
        /// Subtask id
        task_id: String,
        /// Agent name
        agent: String,
    },
    /// A task completed
    TaskCompleted {
        /// Orchestration id
        orchestration_id: String,
        /// Subtask id
        task_id: String,
        /// Agent output
        output: serde_json::Value,
    },
    /// A task failed
    TaskFailed {
        /// Orchestration id
        orchestration_id: String,
        /// Subtask id
        task_id: String,
        /// Failure reason
        error: String,
    },
    /// Paused at an approval gate
    AwaitingApproval {
        /// Orchestration id
        orchestration_id: String,
        /// Linked approval, when a store is configured
        approval_id: Option<String>,
        /// Wave waiting for the decision
        wave: usize,
    },
    /// Reached a terminal status
    Finished {
        /// Orchestration id
        orchestration_id: String,
        /// Terminal status
        status: OrchestrationStatus,
        /// Rollback hint
        rollback_plan: Option<String>,
    },
}

impl OrchestratorEvent {
    /// Orchestration the event belongs to
    #[must_use]
    pub fn orchestration_id(&self) -> &str {
        match self {
            Self::Log { orchestration_id, .. }
            | Self::StatusChanged { orchestration_id, .. }
            | Self::WaveStarted { orchestration_id, .. }
            | Self::WaveCompleted { orchestration_id, .. }
            | Self::TaskStarted { orchestration_id, .. }
            | Self::TaskCompleted { orchestration_id, .. }
            | Self::TaskFailed { orchestration_id, .. }
            | Self::AwaitingApproval { orchestration_id, .. }
            | Self::Finished { orchestration_id, .. } => orchestration_id,
        }
    }

    /// Event type name used on the wire
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Log { .. } => "log",
            Self::StatusChanged { .. } => "status_changed",
            Self::WaveStarted { .. } => "wave_started",
            Self::WaveCompleted { .. } => "wave_completed",
            Self::TaskStarted { .. } => "task_started",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TaskFailed { .. } => "task_failed",
            Self::AwaitingApproval { .. } => "awaiting_approval",
            Self::Finished { .. } => "finished",
        }
    }

    /// JSON payload
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Sending half handed to the orchestrator
pub type EventSender = mpsc::UnboundedSender<OrchestratorEvent>;

/// Receiving half
pub type EventReceiver = mpsc::UnboundedReceiver<OrchestratorEvent>;

/// New event channel
#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_is_tagged() {
        let event = OrchestratorEvent::TaskFailed {
            orchestration_id: "o1".into(),
            task_id: "t1".into(),
            error: "boom".into(),
        };
        assert_eq!(event.event_type(), "task_failed");
        assert_eq!(event.orchestration_id(), "o1");
        assert_eq!(
            event.to_json(),
            json!({"kind": "task_failed", "orchestration_id": "o1", "task_id": "t1", "error": "boom"})
        );
    }
}
