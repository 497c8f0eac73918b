//! External agent contract
//!
//! Agents are black boxes: a structured request goes in, an opaque JSON
//! payload comes out, and the call may fail. Dispatch is a closed set of
//! [`AgentKind`] variants looked up in an [`AgentRegistry`].

use crate::error::AgentError;
use crate::types::{Plan, SubTask};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Agents the orchestrator can dispatch to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentKind {
    /// Produces recommendations
    Advisor,
    /// Runs operational commands
    Operator,
    /// Applies changes to the repository
    Executor,
    /// Reviews produced changes
    Reviewer,
    /// Estimates blast radius
    ImpactAnalysis,
}

/// What an agent kind is allowed to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Must pass through the sandbox before dispatch
    pub requires_sandbox: bool,
    /// May mutate the repository
    pub mutates_repository: bool,
}

impl AgentKind {
    /// All variants
    pub const ALL: [AgentKind; 5] = [
        Self::Advisor,
        Self::Operator,
        Self::Executor,
        Self::Reviewer,
        Self::ImpactAnalysis,
    ];

    /// Wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Advisor => "advisor",
            Self::Operator => "operator",
            Self::Executor => "executor",
            Self::Reviewer => "reviewer",
            Self::ImpactAnalysis => "impact-analysis",
        }
    }

    /// Capability table
    #[must_use]
    pub fn capabilities(self) -> Capabilities {
        match self {
            Self::Advisor | Self::Reviewer | Self::ImpactAnalysis => Capabilities {
                requires_sandbox: false,
                mutates_repository: false,
            },
            Self::Operator => Capabilities {
                requires_sandbox: true,
                mutates_repository: false,
            },
            Self::Executor => Capabilities {
                requires_sandbox: true,
                mutates_repository: true,
            },
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase().replace('_', "-");
        match name.as_str() {
            "advisor" => Ok(Self::Advisor),
            "operator" => Ok(Self::Operator),
            "executor" => Ok(Self::Executor),
            "reviewer" => Ok(Self::Reviewer),
            "impact-analysis" | "impact" => Ok(Self::ImpactAnalysis),
            _ => Err(AgentError::UnknownAgent(s.to_string())),
        }
    }
}

/// Input handed to an agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    /// Orchestration the call belongs to
    pub orchestration_id: String,
    /// Task being executed
    pub subtask: SubTask,
    /// Original user request
    pub request: String,
    /// Outputs of completed dependencies keyed by subtask id
    #[serde(default)]
    pub dependency_outputs: serde_json::Map<String, serde_json::Value>,
    /// Per-run context bag (repository metadata, twin output, ...)
    #[serde(default)]
    pub context: serde_json::Value,
    /// Sandbox result gathered before dispatch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<serde_json::Value>,
}

/// A black-box agent
#[async_trait]
pub trait Agent: Send + Sync {
    /// Run the agent
    async fn invoke(&self, request: AgentRequest) -> Result<serde_json::Value, AgentError>;
}

/// Input handed to the planner
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanningInput {
    /// User request
    pub request: String,
    /// Twin output, when one was built
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twin: Option<serde_json::Value>,
    /// Repository metadata
    #[serde(default)]
    pub repository: serde_json::Value,
}

/// Produces plans from requests
#[async_trait]
pub trait Planner: Send + Sync {
    /// Plan a request
    async fn plan(&self, input: PlanningInput) -> Result<Plan, AgentError>;
}

/// Builds incident twins
#[async_trait]
pub trait TwinBuilder: Send + Sync {
    /// Reproduce an incident against a repository
    async fn build_twin(
        &self,
        incident: &serde_json::Value,
        repo_path: &Path,
    ) -> Result<serde_json::Value, AgentError>;
}

/// Capability-checked dispatch table
#[derive(Clone, Default)]
pub struct AgentRegistry {
    handlers: HashMap<AgentKind, Arc<dyn Agent>>,
}

impl AgentRegistry {
    /// Create empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a kind, replacing any previous one
    #[must_use]
    pub fn with(mut self, kind: AgentKind, agent: Arc<dyn Agent>) -> Self {
        self.handlers.insert(kind, agent);
        self
    }

    /// Register a handler in place
    pub fn register(&mut self, kind: AgentKind, agent: Arc<dyn Agent>) {
        self.handlers.insert(kind, agent);
    }

    /// Whether a kind has a handler
    #[must_use]
    pub fn supports(&self, kind: AgentKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Registered kinds
    #[must_use]
    pub fn kinds(&self) -> Vec<AgentKind> {
        AgentKind::ALL
            .into_iter()
            .filter(|k| self.handlers.contains_key(k))
            .collect()
    }

    /// Dispatch a request
    ///
    /// # Errors
    /// `AgentError::NotRegistered` when no handler exists, otherwise the
    /// agent's own error.
    pub async fn dispatch(
        &self,
        kind: AgentKind,
        request: AgentRequest,
    ) -> Result<serde_json::Value, AgentError> {
        let agent = self
            .handlers
            .get(&kind)
            .ok_or(AgentError::NotRegistered(kind))?;
        agent.invoke(request).await
    }
}

impl fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Agent for Echo {
        async fn invoke(&self, request: AgentRequest) -> Result<serde_json::Value, AgentError> {
            Ok(json!({ "task": request.subtask.id }))
        }
    }

    fn request() -> AgentRequest {
        AgentRequest {
            orchestration_id: "o1".into(),
            subtask: SubTask::new("t1", "advisor", "d"),
            request: "r".into(),
            dependency_outputs: serde_json::Map::new(),
            context: json!({}),
            sandbox: None,
        }
    }

    #[test]
    fn parses_agent_names() {
        assert_eq!("executor".parse::<AgentKind>().unwrap(), AgentKind::Executor);
        assert_eq!(
            "impact_analysis".parse::<AgentKind>().unwrap(),
            AgentKind::ImpactAnalysis
        );
        assert!(matches!(
            "wizard".parse::<AgentKind>(),
            Err(AgentError::UnknownAgent(_))
        ));
    }

    #[test]
    fn risky_kinds_require_sandbox() {
        assert!(AgentKind::Executor.capabilities().requires_sandbox);
        assert!(AgentKind::Operator.capabilities().requires_sandbox);
        assert!(!AgentKind::Reviewer.capabilities().requires_sandbox);
    }

    #[tokio::test]
    async fn dispatch_routes_to_registered_handler() {
        let registry = AgentRegistry::new().with(AgentKind::Advisor, Arc::new(Echo));
        let out = registry.dispatch(AgentKind::Advisor, request()).await.unwrap();
        assert_eq!(out, json!({"task": "t1"}));

        let missing = registry.dispatch(AgentKind::Executor, request()).await;
        assert!(matches!(missing, Err(AgentError::NotRegistered(AgentKind::Executor))));
    }
}
