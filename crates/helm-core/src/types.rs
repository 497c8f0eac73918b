//! Plan and task types
//!
//! Defines the immutable planning model produced by the external planner:
//! - Plans and their risk classification
//! - SubTasks with dependencies, priority and sandbox phase
//! - Task results recorded by the orchestrator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Risk classification of a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Read-only or trivially reversible work
    Low,
    /// Localized changes
    Medium,
    /// Changes with production impact
    High,
    /// Changes that can cause outages or data loss
    Critical,
}

impl RiskLevel {
    /// Whether this level forces a human approval gate
    #[inline]
    #[must_use]
    pub fn forces_approval(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }

    /// Wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl Default for RiskLevel {
    fn default() -> Self {
        Self::Low
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SubTask priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Failure aborts the orchestration
    High,
    /// Default priority
    Medium,
    /// Best effort
    Low,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

/// Sandbox phase of an incident workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxPhase {
    /// Reproduce the defect before a fix is applied
    Pre,
    /// Verify the fix after it was applied
    Post,
}

/// A unit of work inside a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubTask {
    /// Identifier, unique within the plan
    pub id: String,
    /// Free-form task type supplied by the planner
    #[serde(default)]
    pub task_type: String,
    /// Human readable description
    pub description: String,
    /// Assigned agent name as produced by the planner
    pub agent: String,
    /// Ids of SubTasks that must resolve before this one starts
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Priority
    #[serde(default)]
    pub priority: Priority,
    /// Optional sandbox phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox_phase: Option<SandboxPhase>,
    /// Optional incident context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_context: Option<serde_json::Value>,
}

impl SubTask {
    /// Create new subtask
    #[inline]
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        agent: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            task_type: String::new(),
            description: description.into(),
            agent: agent.into(),
            dependencies: Vec::new(),
            priority: Priority::default(),
            sandbox_phase: None,
            incident_context: None,
        }
    }

    /// Add dependency
    #[inline]
    #[must_use]
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    /// With priority
    #[inline]
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// With task type
    #[inline]
    #[must_use]
    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = task_type.into();
        self
    }

    /// With sandbox phase
    #[inline]
    #[must_use]
    pub fn with_sandbox_phase(mut self, phase: SandboxPhase) -> Self {
        self.sandbox_phase = Some(phase);
        self
    }

    /// With incident context
    #[inline]
    #[must_use]
    pub fn with_incident_context(mut self, context: serde_json::Value) -> Self {
        self.incident_context = Some(context);
        self
    }
}

/// Immutable execution plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    /// Plan identifier
    pub id: String,
    /// Originating request text
    pub request: String,
    /// Human summary
    pub summary: String,
    /// Ordered subtasks
    pub subtasks: Vec<SubTask>,
    /// Risk classification
    pub risk_level: RiskLevel,
    /// Whether executor work needs a human decision first
    pub requires_approval: bool,
}

impl Plan {
    /// Create new plan
    ///
    /// Approval is forced for `high` and `critical` risk regardless of the
    /// flag passed in.
    #[must_use]
    pub fn new(
        request: impl Into<String>,
        summary: impl Into<String>,
        subtasks: Vec<SubTask>,
        risk_level: RiskLevel,
        requires_approval: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            request: request.into(),
            summary: summary.into(),
            subtasks,
            risk_level,
            requires_approval: requires_approval || risk_level.forces_approval(),
        }
    }

    /// Re-apply the risk rule to a plan that came over the wire
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.risk_level.forces_approval() {
            self.requires_approval = true;
        }
        self
    }

    /// Look up a subtask
    #[must_use]
    pub fn subtask(&self, id: &str) -> Option<&SubTask> {
        self.subtasks.iter().find(|t| t.id == id)
    }
}

/// Execution status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Not started
    Pending,
    /// In flight
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
}

impl TaskStatus {
    /// Completed or failed
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Result of one executed subtask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    /// SubTask id
    pub subtask_id: String,
    /// Status
    pub status: TaskStatus,
    /// Agent that handled the task
    pub agent: String,
    /// Agent specific payload
    #[serde(default)]
    pub output: serde_json::Value,
    /// Error message for failed tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// Completion time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskResult {
    /// Start a running result
    #[must_use]
    pub fn running(subtask_id: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            subtask_id: subtask_id.into(),
            status: TaskStatus::Running,
            agent: agent.into(),
            output: serde_json::Value::Null,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Finish successfully
    #[must_use]
    pub fn complete(mut self, output: serde_json::Value) -> Self {
        self.status = TaskStatus::Completed;
        self.output = output;
        self.completed_at = Some(Utc::now());
        self
    }

    /// Finish with an error, keeping any partial output
    #[must_use]
    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
        self
    }

    /// Attach output without changing status
    #[must_use]
    pub fn with_output(mut self, output: serde_json::Value) -> Self {
        self.output = output;
        self
    }

    /// Completed successfully
    #[inline]
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    /// String field of the output object, if present and non-empty
    #[must_use]
    pub fn output_str(&self, field: &str) -> Option<&str> {
        self.output
            .get(field)
            .and_then(serde_json::Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }
}

/// Parse helper shared by wire enums
fn parse_lower<T>(raw: &str, table: &[(&str, T)]) -> Option<T>
where
    T: Copy,
{
    let needle = raw.trim().to_ascii_lowercase();
    table.iter().find(|(k, _)| *k == needle).map(|(_, v)| *v)
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_lower(
            s,
            &[
                ("low", Self::Low),
                ("medium", Self::Medium),
                ("high", Self::High),
                ("critical", Self::Critical),
            ],
        )
        .ok_or_else(|| format!("unknown risk level: {s}"))
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_lower(
            s,
            &[("high", Self::High), ("medium", Self::Medium), ("low", Self::Low)],
        )
        .ok_or_else(|| format!("unknown priority: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn high_risk_forces_approval() {
        let plan = Plan::new("req", "sum", vec![], RiskLevel::High, false);
        assert!(plan.requires_approval);

        let plan = Plan::new("req", "sum", vec![], RiskLevel::Medium, false);
        assert!(!plan.requires_approval);
    }

    #[test]
    fn normalized_reapplies_risk_rule() {
        let mut plan = Plan::new("req", "sum", vec![], RiskLevel::Low, false);
        plan.risk_level = RiskLevel::Critical;
        assert!(!plan.requires_approval);
        assert!(plan.normalized().requires_approval);
    }

    #[test]
    fn subtask_wire_format_is_camel_case() {
        let task = SubTask::new("t1", "advisor", "look around")
            .depends_on("t0")
            .with_sandbox_phase(SandboxPhase::Pre);
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["sandboxPhase"], json!("pre"));
        assert_eq!(value["dependencies"], json!(["t0"]));
        assert_eq!(value["priority"], json!("medium"));
    }

    #[test]
    fn subtask_defaults_when_fields_missing() {
        let task: SubTask = serde_json::from_value(json!({
            "id": "a",
            "description": "d",
            "agent": "reviewer"
        }))
        .unwrap();
        assert!(task.dependencies.is_empty());
        assert_eq!(task.priority, Priority::Medium);
        assert!(task.sandbox_phase.is_none());
    }

    #[test]
    fn task_result_lifecycle() {
        let result = TaskResult::running("a", "advisor");
        assert_eq!(result.status, TaskStatus::Running);
        assert!(result.completed_at.is_none());

        let done = result.complete(json!({"rollbackPlan": "git revert HEAD"}));
        assert!(done.is_completed());
        assert_eq!(done.output_str("rollbackPlan"), Some("git revert HEAD"));
        assert_eq!(done.output_str("rollbackInstructions"), None);
    }

    #[test]
    fn risk_level_parses_case_insensitively() {
        assert_eq!("HIGH".parse::<RiskLevel>().unwrap(), RiskLevel::High);
        assert!("extreme".parse::<RiskLevel>().is_err());
    }
}
