//! Testing utilities for Helm workspace
//!
//! Scripted planners, recording agents and plan fixtures.

#![allow(missing_docs)]

use async_trait::async_trait;
use helm_core::{
    Agent, AgentError, AgentKind, AgentRegistry, AgentRequest, Plan, Planner, PlanningInput,
    RiskLevel, SubTask, TwinBuilder,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Planner that hands out a fixed plan
#[derive(Debug)]
pub struct ScriptedPlanner {
    plan: Result<Plan, AgentError>,
    inputs: Mutex<Vec<PlanningInput>>,
}

impl ScriptedPlanner {
    pub fn new(plan: Plan) -> Self {
        Self {
            plan: Ok(plan),
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            plan: Err(AgentError::Failed(message.to_string())),
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn inputs(&self) -> Vec<PlanningInput> {
        self.inputs.lock().clone()
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn plan(&self, input: PlanningInput) -> Result<Plan, AgentError> {
        self.inputs.lock().push(input);
        self.plan.clone()
    }
}

/// Agent that records every request and answers from a script
#[derive(Debug, Default)]
pub struct RecordingAgent {
    outputs: Mutex<Vec<(String, Value)>>,
    calls: Mutex<Vec<AgentRequest>>,
}

impl RecordingAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `output` for subtask `task_id`
    pub fn with_output(self, task_id: &str, output: Value) -> Self {
        self.outputs.lock().push((task_id.to_string(), output));
        self
    }

    pub fn calls(&self) -> Vec<AgentRequest> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.subtask.id.clone()).collect()
    }

    /// How many times a subtask was dispatched
    pub fn times_called(&self, task_id: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.subtask.id == task_id)
            .count()
    }
}

#[async_trait]
impl Agent for RecordingAgent {
    async fn invoke(&self, request: AgentRequest) -> Result<Value, AgentError> {
        let output = self
            .outputs
            .lock()
            .iter()
            .find(|(id, _)| *id == request.subtask.id)
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| json!({ "task": request.subtask.id, "ok": true }));
        self.calls.lock().push(request);
        Ok(output)
    }
}

/// Agent that always fails
#[derive(Debug, Default)]
pub struct FailingAgent {
    message: String,
    calls: AtomicUsize,
}

impl FailingAgent {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for FailingAgent {
    async fn invoke(&self, _request: AgentRequest) -> Result<Value, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(AgentError::Failed(self.message.clone()))
    }
}

/// Agent that answers after a delay
#[derive(Debug)]
pub struct SlowAgent {
    delay: Duration,
}

impl SlowAgent {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Agent for SlowAgent {
    async fn invoke(&self, _request: AgentRequest) -> Result<Value, AgentError> {
        tokio::time::sleep(self.delay).await;
        Ok(json!({ "slow": true }))
    }
}

/// Agent that writes a file into the repository, then optionally fails
#[derive(Debug)]
pub struct FileWritingAgent {
    file: String,
    contents: String,
    fail: bool,
}

impl FileWritingAgent {
    pub fn new(file: &str, contents: &str, fail: bool) -> Self {
        Self {
            file: file.to_string(),
            contents: contents.to_string(),
            fail,
        }
    }
}

#[async_trait]
impl Agent for FileWritingAgent {
    async fn invoke(&self, request: AgentRequest) -> Result<Value, AgentError> {
        let repo = request
            .context
            .get("repoPath")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::InvalidOutput("no repoPath in context".into()))?;
        std::fs::write(Path::new(repo).join(&self.file), &self.contents)
            .map_err(|e| AgentError::Failed(e.to_string()))?;
        if self.fail {
            Err(AgentError::Failed("executor crashed after writing".into()))
        } else {
            Ok(json!({ "patch": self.file }))
        }
    }
}

/// Twin builder with a fixed answer
#[derive(Debug)]
pub struct StaticTwinBuilder {
    twin: Result<Value, AgentError>,
}

impl StaticTwinBuilder {
    pub fn new(twin: Value) -> Self {
        Self { twin: Ok(twin) }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            twin: Err(AgentError::Failed(message.to_string())),
        }
    }
}

#[async_trait]
impl TwinBuilder for StaticTwinBuilder {
    async fn build_twin(&self, _incident: &Value, _repo_path: &Path) -> Result<Value, AgentError> {
        self.twin.clone()
    }
}

/// Registry with `agent` behind every kind
pub fn registry_with_all(agent: Arc<dyn Agent>) -> AgentRegistry {
    AgentKind::ALL
        .into_iter()
        .fold(AgentRegistry::new(), |registry, kind| {
            registry.with(kind, Arc::clone(&agent))
        })
}

pub fn plan_with(risk: RiskLevel, subtasks: Vec<SubTask>) -> Plan {
    Plan::new("test request", "test plan", subtasks, risk, false)
}

/// advisor, then reviewer depending on it
pub fn advisor_then_reviewer() -> Plan {
    plan_with(
        RiskLevel::Low,
        vec![
            SubTask::new("advise", "advisor", "Propose the change"),
            SubTask::new("review", "reviewer", "Review the proposal").depends_on("advise"),
        ],
    )
}

/// High-risk plan: advisor, executor, reviewer in three waves
pub fn gated_executor_plan() -> Plan {
    plan_with(
        RiskLevel::High,
        vec![
            SubTask::new("advise", "advisor", "Propose the change"),
            SubTask::new("apply", "executor", "Apply the change").depends_on("advise"),
            SubTask::new("review", "reviewer", "Review the applied change").depends_on("apply"),
        ],
    )
}
