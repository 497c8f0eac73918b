//! Per-run context supplied with a request

use helm_core::AgentKind;
use helm_sandbox::SandboxConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Keywords that reject a task when found in its description
pub const DEFAULT_FORBIDDEN_KEYWORDS: &[&str] = &[
    "drop database",
    "drop table",
    "rm -rf /",
    "force push",
    "push --force",
    "disable authentication",
];

/// Guardrails applied to every task before dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPolicy {
    /// Agents allowed to run; `None` allows every kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_agents: Option<Vec<String>>,
    /// Case-insensitive substrings that reject a task
    #[serde(default = "default_forbidden_keywords")]
    pub forbidden_keywords: Vec<String>,
}

fn default_forbidden_keywords() -> Vec<String> {
    DEFAULT_FORBIDDEN_KEYWORDS
        .iter()
        .map(|k| (*k).to_string())
        .collect()
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            allowed_agents: None,
            forbidden_keywords: default_forbidden_keywords(),
        }
    }
}

impl ExecutionPolicy {
    /// Restrict dispatch to the given kinds
    #[must_use]
    pub fn allow_only(mut self, kinds: &[AgentKind]) -> Self {
        self.allowed_agents = Some(kinds.iter().map(|k| k.as_str().to_string()).collect());
        self
    }

    /// Add a forbidden keyword
    #[must_use]
    pub fn forbid(mut self, keyword: impl Into<String>) -> Self {
        self.forbidden_keywords.push(keyword.into());
        self
    }

    /// Reason the task is rejected, if any
    ///
    /// Allow-list entries are compared by parsed kind, so `impact_analysis`
    /// and `impact-analysis` match.
    #[must_use]
    pub fn check(&self, agent: &str, description: &str) -> Option<String> {
        if let Some(allowed) = &self.allowed_agents {
            let wanted = agent.parse::<AgentKind>().ok();
            let permitted = allowed.iter().any(|name| match (wanted, name.parse::<AgentKind>()) {
                (Some(kind), Ok(entry)) => kind == entry,
                _ => name.eq_ignore_ascii_case(agent),
            });
            if !permitted {
                return Some(format!("agent {agent} is not allowed by the execution policy"));
            }
        }

        let lowered = description.to_lowercase();
        self.forbidden_keywords
            .iter()
            .find(|k| !k.is_empty() && lowered.contains(&k.to_lowercase()))
            .map(|k| format!("task description contains forbidden keyword \"{k}\""))
    }
}

/// Context for one orchestration run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunContext {
    /// Repository the run operates on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_path: Option<PathBuf>,
    /// Incident description; with `repo_path`, triggers twin building
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident: Option<serde_json::Value>,
    /// Sandbox run required before risky agents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<SandboxConfig>,
    /// Guardrails
    #[serde(default)]
    pub execution_policy: ExecutionPolicy,
    /// Reject executor work outright
    #[serde(default)]
    pub safe_mode: bool,
    /// Repository metadata handed to the planner
    #[serde(default)]
    pub repository: serde_json::Value,
    /// Who asked for the change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester: Option<String>,
}

impl RunContext {
    /// Context for a repository
    #[must_use]
    pub fn for_repo(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: Some(repo_path.into()),
            ..Self::default()
        }
    }

    /// Attach a sandbox configuration
    #[must_use]
    pub fn with_sandbox(mut self, sandbox: SandboxConfig) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    /// Replace the execution policy
    #[must_use]
    pub fn with_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.execution_policy = policy;
        self
    }

    /// Set safe mode
    #[must_use]
    pub fn with_safe_mode(mut self, safe_mode: bool) -> Self {
        self.safe_mode = safe_mode;
        self
    }

    /// Attach an incident
    #[must_use]
    pub fn with_incident(mut self, incident: serde_json::Value) -> Self {
        self.incident = Some(incident);
        self
    }

    /// Set the requester
    #[must_use]
    pub fn with_requester(mut self, requester: impl Into<String>) -> Self {
        self.requester = Some(requester.into());
        self
    }

    /// Sandbox config for this run, pointed at the run's repository
    #[must_use]
    pub fn sandbox_config(&self) -> Option<SandboxConfig> {
        let mut config = self.sandbox.clone()?;
        if config.repo_path.is_none() {
            config.repo_path.clone_from(&self.repo_path);
        }
        Some(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_policy_rejects_keywords_case_insensitively() {
        let policy = ExecutionPolicy::default();
        assert!(policy.check("executor", "DROP DATABASE users").is_some());
        assert!(policy.check("executor", "add an index").is_none());
    }

    #[test]
    fn allow_list_matches_by_kind() {
        let policy = ExecutionPolicy::default().allow_only(&[AgentKind::ImpactAnalysis]);
        assert!(policy.check("impact_analysis", "estimate").is_none());
        let reason = policy.check("executor", "apply").unwrap();
        assert!(reason.contains("not allowed"));
    }

    #[test]
    fn context_parses_wire_names() {
        let context: RunContext = serde_json::from_value(json!({
            "repoPath": "/srv/app",
            "safeMode": true,
            "executionPolicy": { "allowedAgents": ["advisor"] },
            "sandbox": { "command": "make test" }
        }))
        .unwrap();

        assert!(context.safe_mode);
        assert_eq!(
            context.execution_policy.allowed_agents,
            Some(vec!["advisor".to_string()])
        );
        assert!(!context.execution_policy.forbidden_keywords.is_empty());
        let sandbox = context.sandbox_config().unwrap();
        assert_eq!(sandbox.repo_path, Some(PathBuf::from("/srv/app")));
    }
}
