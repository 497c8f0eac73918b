//! Orchestration aggregate and its lifecycle

use crate::context::RunContext;
use crate::error::OrchestratorError;
use chrono::{DateTime, Utc};
use helm_core::{Plan, ResultMap};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of an orchestration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrchestrationStatus {
    /// Calling the planner
    Planning,
    /// Building the incident twin
    TwinBuilding,
    /// Running waves
    Executing,
    /// Paused at an approval gate
    AwaitingApproval,
    /// Every wave ran
    Completed,
    /// Stopped by a critical failure or a denial
    Failed,
}

impl OrchestrationStatus {
    /// Wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::TwinBuilding => "twin-building",
            Self::Executing => "executing",
            Self::AwaitingApproval => "awaiting-approval",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Completed or failed
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for OrchestrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statuses reachable from `from`
#[must_use]
pub fn allowed_transitions(from: OrchestrationStatus) -> Vec<OrchestrationStatus> {
    use OrchestrationStatus::{
        AwaitingApproval, Completed, Executing, Failed, Planning, TwinBuilding,
    };
    match from {
        Planning => vec![TwinBuilding, Executing, Failed],
        TwinBuilding => vec![Executing, Failed],
        Executing => vec![AwaitingApproval, Completed, Failed],
        AwaitingApproval => vec![Executing, Failed],
        Completed | Failed => vec![],
    }
}

/// Check a status change against [`allowed_transitions`]
///
/// # Errors
/// `OrchestratorError::IllegalTransition` when the change is not listed.
pub fn validate_transition(
    from: OrchestrationStatus,
    to: OrchestrationStatus,
) -> Result<(), OrchestratorError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(OrchestratorError::IllegalTransition { from, to })
    }
}

/// Severity of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Progress
    Info,
    /// Degraded but continuing
    Warn,
    /// Failure
    Error,
}

/// One line of the orchestration log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Severity
    pub level: LogLevel,
    /// Text
    pub message: String,
    /// When it was written
    pub at: DateTime<Utc>,
}

/// The orchestration aggregate
///
/// Serialized as a whole while paused at an approval gate and restored on
/// resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationState {
    /// Orchestration id
    pub id: String,
    /// Request text
    pub request: String,
    /// Accepted plan
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    /// Results keyed by subtask id, in completion order
    #[serde(default)]
    pub results: ResultMap,
    /// Index of the next wave to run
    #[serde(default)]
    pub current_wave: usize,
    /// Lifecycle status
    pub status: OrchestrationStatus,
    /// Progress log
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    /// Twin output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twin: Option<serde_json::Value>,
    /// Run context
    #[serde(default)]
    pub context: RunContext,
    /// Linked approval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<String>,
    /// Whether the approval gate was passed
    #[serde(default)]
    pub approval_granted: bool,
    /// Subtask ids forced past a dependency cycle
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forced_tasks: Vec<String>,
    /// Human-readable rollback hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_plan: Option<String>,
    /// Why the orchestration failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

impl OrchestrationState {
    /// Fresh state in `planning`
    #[must_use]
    pub fn new(id: impl Into<String>, request: impl Into<String>, context: RunContext) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            request: request.into(),
            plan: None,
            results: ResultMap::new(),
            current_wave: 0,
            status: OrchestrationStatus::Planning,
            logs: Vec::new(),
            twin: None,
            context,
            approval_id: None,
            approval_granted: false,
            forced_tasks: Vec::new(),
            rollback_plan: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `to` if the lifecycle allows it
    ///
    /// # Errors
    /// `OrchestratorError::IllegalTransition`; the state is left unchanged.
    pub fn transition(&mut self, to: OrchestrationStatus) -> Result<(), OrchestratorError> {
        validate_transition(self.status, to)?;
        self.status = to;
        self.touch();
        Ok(())
    }

    /// Append a log line
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.logs.push(LogEntry {
            level,
            message: message.into(),
            at: Utc::now(),
        });
        self.touch();
    }

    /// Whether the orchestration can still change
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helm_core::TaskResult;
    use OrchestrationStatus::*;

    #[test]
    fn happy_path_is_allowed() {
        for (from, to) in [
            (Planning, TwinBuilding),
            (TwinBuilding, Executing),
            (Executing, AwaitingApproval),
            (AwaitingApproval, Executing),
            (Executing, Completed),
        ] {
            assert!(validate_transition(from, to).is_ok(), "{from} -> {to}");
        }
    }

    #[test]
    fn terminal_states_are_final() {
        assert!(allowed_transitions(Completed).is_empty());
        assert!(allowed_transitions(Failed).is_empty());
        assert!(matches!(
            validate_transition(Completed, Executing),
            Err(OrchestratorError::IllegalTransition { .. })
        ));
    }

    #[test]
    fn cannot_skip_execution() {
        assert!(validate_transition(Planning, AwaitingApproval).is_err());
        assert!(validate_transition(AwaitingApproval, Completed).is_err());
    }

    #[test]
    fn illegal_transition_leaves_state_unchanged() {
        let mut state = OrchestrationState::new("o1", "r", RunContext::default());
        assert!(state.transition(Completed).is_err());
        assert_eq!(state.status, Planning);
    }

    #[test]
    fn state_survives_serialization() {
        let mut state = OrchestrationState::new("o1", "rotate keys", RunContext::default());
        state.transition(Executing).unwrap();
        state.transition(AwaitingApproval).unwrap();
        state.current_wave = 1;
        state.results.insert(TaskResult::running("a", "advisor").complete(serde_json::json!("ok")));
        state.log(LogLevel::Info, "paused");

        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"awaiting-approval\""));
        let back: OrchestrationState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.status, AwaitingApproval);
        assert_eq!(back.current_wave, 1);
        assert!(back.results.contains("a"));
        assert_eq!(back.logs.len(), 1);
    }
}
