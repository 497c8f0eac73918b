//! Agents backed by external executables
//!
//! The command runs through `sh -c`, gets one JSON document on stdin and
//! must print one JSON document on stdout. A non-zero exit is an agent
//! failure carrying the tail of stderr. Dropping the call kills the child,
//! so the orchestrator's timeout bounds the process too.

use async_trait::async_trait;
use helm_core::{Agent, AgentError, AgentRequest, Plan, Planner, PlanningInput, TwinBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Bytes of stderr kept in failure messages
const STDERR_TAIL: usize = 2048;

/// One shell command speaking JSON over stdio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCommand {
    name: String,
    command: String,
}

impl ProcessCommand {
    /// Create command labelled `name` in errors and logs
    #[must_use]
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
        }
    }

    /// Run with `input` on stdin and parse stdout
    ///
    /// # Errors
    /// Spawn or I/O failure and non-zero exit are `Failed`; unparsable
    /// stdout is `InvalidOutput`.
    pub async fn call<I, O>(&self, input: &I) -> Result<O, AgentError>
    where
        I: Serialize + Sync,
        O: DeserializeOwned,
    {
        let payload = serde_json::to_vec(input)
            .map_err(|e| AgentError::InvalidOutput(format!("cannot encode input for {}: {e}", self.name)))?;

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::Failed(format!("cannot start {}: {e}", self.name)))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A command that ignores its input may close stdin early.
            if let Err(e) = stdin.write_all(&payload).await {
                tracing::debug!(agent = %self.name, error = %e, "stdin closed before input was written");
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| AgentError::Failed(format!("{} did not finish: {e}", self.name)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            return Err(AgentError::Failed(format!(
                "{} exited with {code}: {}",
                self.name,
                tail(stderr.trim(), STDERR_TAIL)
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| AgentError::InvalidOutput(format!("{} printed invalid JSON: {e}", self.name)))
    }
}

fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

/// Agent backed by a command
#[derive(Debug, Clone)]
pub struct ProcessAgent(ProcessCommand);

impl ProcessAgent {
    /// Create agent
    #[must_use]
    pub fn new(command: ProcessCommand) -> Self {
        Self(command)
    }
}

#[async_trait]
impl Agent for ProcessAgent {
    async fn invoke(&self, request: AgentRequest) -> Result<Value, AgentError> {
        self.0.call(&request).await
    }
}

/// Planner backed by a command; stdout must be a plan
#[derive(Debug, Clone)]
pub struct ProcessPlanner(ProcessCommand);

impl ProcessPlanner {
    /// Create planner
    #[must_use]
    pub fn new(command: ProcessCommand) -> Self {
        Self(command)
    }
}

#[async_trait]
impl Planner for ProcessPlanner {
    async fn plan(&self, input: PlanningInput) -> Result<Plan, AgentError> {
        self.0.call(&input).await
    }
}

/// Twin builder backed by a command
///
/// Input is `{"incident": ..., "repoPath": ...}`.
#[derive(Debug, Clone)]
pub struct ProcessTwinBuilder(ProcessCommand);

impl ProcessTwinBuilder {
    /// Create twin builder
    #[must_use]
    pub fn new(command: ProcessCommand) -> Self {
        Self(command)
    }
}

#[async_trait]
impl TwinBuilder for ProcessTwinBuilder {
    async fn build_twin(&self, incident: &Value, repo_path: &Path) -> Result<Value, AgentError> {
        self.0
            .call(&json!({ "incident": incident, "repoPath": repo_path }))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_json_through_stdio() {
        let cmd = ProcessCommand::new("echo", "cat");
        let out: Value = cmd.call(&json!({ "a": 1 })).await.unwrap();
        assert_eq!(out, json!({ "a": 1 }));
    }

    #[tokio::test]
    async fn non_zero_exit_is_failure_with_stderr() {
        let cmd = ProcessCommand::new("broken", "echo boom >&2; exit 3");
        let err = cmd.call::<_, Value>(&json!({})).await.unwrap_err();
        match err {
            AgentError::Failed(msg) => {
                assert!(msg.contains("exited with 3"), "{msg}");
                assert!(msg.contains("boom"), "{msg}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn garbage_stdout_is_invalid_output() {
        let cmd = ProcessCommand::new("chatty", "echo not-json");
        let err = cmd.call::<_, Value>(&json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidOutput(_)));
    }

    #[test]
    fn tail_keeps_char_boundaries() {
        assert_eq!(tail("abc", 10), "abc");
        assert_eq!(tail("héllo", 3), "llo");
        assert_eq!(tail("aé", 1), "");
    }
}
