//! Orchestrator - plan, schedule, gate, run
//!
//! One orchestrator instance can drive many orchestrations; every call owns
//! its [`OrchestrationState`] and hands it back to the caller. Tasks inside
//! a wave run concurrently, and the next wave starts only after the current
//! one resolved.

use crate::context::RunContext;
use crate::error::OrchestratorError;
use crate::events::{EventSender, OrchestratorEvent};
use crate::state::{LogLevel, OrchestrationState, OrchestrationStatus};
use crate::waves::{compute_waves, WavePlan};
use futures::future::join_all;
use helm_core::{
    AgentError, AgentKind, AgentRegistry, AgentRequest, ApprovalRequest, AuditEvent,
    BestEffortAudit, Planner, PlanningInput, Priority, RollbackRecord, SandboxPhase, SubTask,
    TaskResult, TwinBuilder,
};
use helm_rollback::{RollbackManager, RollbackOptions};
use helm_sandbox::{SandboxEngine, SandboxPurpose, SandboxResult};
use helm_store::ApprovalStore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use uuid::Uuid;

/// Default bound on a single agent, planner or twin call
pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(300);

/// Orchestrator tunables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Bound on each external call
    pub agent_timeout: Duration,
    /// Refuse cyclic plans instead of forcing a task through
    pub strict_dependencies: bool,
    /// Identity recorded in audit events and rollbacks
    pub actor: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            agent_timeout: DEFAULT_AGENT_TIMEOUT,
            strict_dependencies: false,
            actor: "helm-orchestrator".to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// With agent timeout
    #[must_use]
    pub fn with_agent_timeout(mut self, timeout: Duration) -> Self {
        self.agent_timeout = timeout;
        self
    }

    /// With strict dependency checking
    #[must_use]
    pub fn with_strict_dependencies(mut self, strict: bool) -> Self {
        self.strict_dependencies = strict;
        self
    }

    /// With actor identity
    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }
}

/// Input to [`Orchestrator::execute`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationRequest {
    /// Orchestration id
    pub id: String,
    /// Request text
    pub request: String,
    /// Run context
    #[serde(default)]
    pub context: RunContext,
}

impl OrchestrationRequest {
    /// Request with a fresh id
    #[must_use]
    pub fn new(request: impl Into<String>, context: RunContext) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            request: request.into(),
            context,
        }
    }

    /// With explicit id
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// Why a task failed, plus whatever it produced before failing
struct TaskFailure {
    reason: String,
    output: Value,
}

impl TaskFailure {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            output: Value::Null,
        }
    }

    fn with_output(mut self, output: Value) -> Self {
        self.output = output;
        self
    }
}

/// Wave-scheduled orchestration engine
pub struct Orchestrator {
    agents: AgentRegistry,
    planner: Arc<dyn Planner>,
    twin_builder: Option<Arc<dyn TwinBuilder>>,
    sandbox: Option<Arc<SandboxEngine>>,
    rollback: Option<Arc<RollbackManager>>,
    approvals: Option<Arc<dyn ApprovalStore>>,
    audit: BestEffortAudit,
    events: Option<EventSender>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Create orchestrator with agents and a planner
    #[must_use]
    pub fn new(agents: AgentRegistry, planner: Arc<dyn Planner>) -> Self {
        Self {
            agents,
            planner,
            twin_builder: None,
            sandbox: None,
            rollback: None,
            approvals: None,
            audit: BestEffortAudit::default(),
            events: None,
            config: OrchestratorConfig::default(),
        }
    }

    /// With twin builder
    #[must_use]
    pub fn with_twin_builder(mut self, builder: Arc<dyn TwinBuilder>) -> Self {
        self.twin_builder = Some(builder);
        self
    }

    /// With sandbox engine
    #[must_use]
    pub fn with_sandbox(mut self, engine: Arc<SandboxEngine>) -> Self {
        self.sandbox = Some(engine);
        self
    }

    /// With rollback manager
    #[must_use]
    pub fn with_rollback(mut self, manager: Arc<RollbackManager>) -> Self {
        self.rollback = Some(manager);
        self
    }

    /// With approval store
    #[must_use]
    pub fn with_approval_store(mut self, store: Arc<dyn ApprovalStore>) -> Self {
        self.approvals = Some(store);
        self
    }

    /// With audit sink
    #[must_use]
    pub fn with_audit(mut self, audit: BestEffortAudit) -> Self {
        self.audit = audit;
        self
    }

    /// With event channel
    #[must_use]
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// With config
    #[must_use]
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Current config
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Plan a request and run it until completion, failure or an approval gate
    ///
    /// # Workflow
    /// 1. Build the incident twin when an incident and repository are given
    /// 2. Ask the planner for a plan
    /// 3. Group subtasks into waves
    /// 4. Run waves, pausing before executor work that needs approval
    ///
    /// # Errors
    /// Planner failure, a cyclic plan under strict dependencies, or an
    /// approval store failure while pausing. Task failures are recorded in
    /// the returned state instead.
    pub async fn execute(
        &self,
        request: OrchestrationRequest,
    ) -> Result<OrchestrationState, OrchestratorError> {
        let OrchestrationRequest {
            id,
            request,
            context,
        } = request;
        let mut state = OrchestrationState::new(id, request, context);
        tracing::info!(orchestration_id = %state.id, "orchestration started");

        self.build_twin(&mut state).await?;

        let input = PlanningInput {
            request: state.request.clone(),
            twin: state.twin.clone(),
            repository: state.context.repository.clone(),
        };
        let plan = match timeout(self.config.agent_timeout, self.planner.plan(input)).await {
            Ok(Ok(plan)) => plan.normalized(),
            Ok(Err(e)) => return Err(self.planning_failed(&state, e).await),
            Err(_) => {
                let e = AgentError::Timeout {
                    agent: "planner".to_string(),
                    duration_secs: self.config.agent_timeout.as_secs(),
                };
                return Err(self.planning_failed(&state, e).await);
            }
        };

        let waves = compute_waves(&plan.subtasks);
        if self.config.strict_dependencies && !waves.forced.is_empty() {
            return Err(OrchestratorError::CyclicPlan { ids: waves.forced });
        }
        for warning in &waves.warnings {
            self.log(&mut state, LogLevel::Warn, warning.clone());
        }
        state.forced_tasks.clone_from(&waves.forced);

        self.log(
            &mut state,
            LogLevel::Info,
            format!(
                "plan accepted: {} subtasks in {} waves, risk {}",
                plan.subtasks.len(),
                waves.len(),
                plan.risk_level
            ),
        );
        self.audit
            .record(
                AuditEvent::new("orchestration.planned", &self.config.actor, &state.id).with_details(
                    json!({
                        "planId": plan.id,
                        "riskLevel": plan.risk_level,
                        "requiresApproval": plan.requires_approval,
                        "subtasks": plan.subtasks.len(),
                    }),
                ),
            )
            .await;
        state.plan = Some(plan);

        self.transition(&mut state, OrchestrationStatus::Executing)?;
        self.run_waves(&mut state, &waves).await?;
        Ok(state)
    }

    /// Continue a paused orchestration after its approval was granted
    ///
    /// Restarts at the paused wave; subtasks that already have a result are
    /// not run again.
    ///
    /// # Errors
    /// The state is not paused, or the linked approval is missing or not
    /// approved.
    pub async fn resume_after_approval(
        &self,
        mut state: OrchestrationState,
    ) -> Result<OrchestrationState, OrchestratorError> {
        if state.status != OrchestrationStatus::AwaitingApproval {
            return Err(OrchestratorError::NotAwaitingApproval {
                id: state.id.clone(),
                status: state.status,
            });
        }

        if let (Some(store), Some(approval_id)) = (&self.approvals, state.approval_id.clone()) {
            let approval = store.validate(&approval_id).await?;
            let by = approval.decided_by.unwrap_or_else(|| "unknown".to_string());
            self.log(
                &mut state,
                LogLevel::Info,
                format!("approval {approval_id} granted by {by}"),
            );
        }
        state.approval_granted = true;
        self.transition(&mut state, OrchestrationStatus::Executing)?;

        let waves = match &state.plan {
            Some(plan) => compute_waves(&plan.subtasks),
            None => return Err(OrchestratorError::MissingPlan(state.id.clone())),
        };
        self.run_waves(&mut state, &waves).await?;
        Ok(state)
    }

    /// End a paused orchestration as failed
    ///
    /// # Errors
    /// The state is not paused.
    pub async fn deny(
        &self,
        mut state: OrchestrationState,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<OrchestrationState, OrchestratorError> {
        if state.status != OrchestrationStatus::AwaitingApproval {
            return Err(OrchestratorError::NotAwaitingApproval {
                id: state.id.clone(),
                status: state.status,
            });
        }

        let message = match reason {
            Some(reason) => format!("approval denied by {actor}: {reason}"),
            None => format!("approval denied by {actor}"),
        };
        state.error = Some(message.clone());
        self.log(&mut state, LogLevel::Warn, message);
        self.audit
            .record(
                AuditEvent::new("orchestration.denied", actor, &state.id)
                    .with_details(json!({ "reason": reason, "approvalId": state.approval_id })),
            )
            .await;
        self.finish(&mut state, OrchestrationStatus::Failed).await?;
        Ok(state)
    }

    /// Run one subtask against the state it belongs to
    ///
    /// Never fails: guardrail rejections, agent errors, sandbox failures and
    /// timeouts all come back as a failed [`TaskResult`].
    pub async fn execute_task(&self, state: &OrchestrationState, task: &SubTask) -> TaskResult {
        let started = TaskResult::running(&task.id, &task.agent);
        self.emit(OrchestratorEvent::TaskStarted {
            orchestration_id: state.id.clone(),
            task_id: task.id.clone(),
            agent: task.agent.clone(),
        });
        tracing::debug!(orchestration_id = %state.id, task_id = %task.id, agent = %task.agent, "task started");

        let result = match self.run_task(state, task).await {
            Ok(output) => started.complete(output),
            Err(failure) => started.with_output(failure.output).fail(failure.reason),
        };

        let subject = format!("{}/{}", state.id, task.id);
        if result.is_completed() {
            tracing::info!(orchestration_id = %state.id, task_id = %task.id, "task completed");
            self.emit(OrchestratorEvent::TaskCompleted {
                orchestration_id: state.id.clone(),
                task_id: task.id.clone(),
                output: result.output.clone(),
            });
            self.audit
                .record(
                    AuditEvent::new("task.completed", &self.config.actor, subject)
                        .with_details(json!({ "agent": task.agent })),
                )
                .await;
        } else {
            let error = result.error.clone().unwrap_or_default();
            tracing::warn!(orchestration_id = %state.id, task_id = %task.id, error = %error, "task failed");
            self.emit(OrchestratorEvent::TaskFailed {
                orchestration_id: state.id.clone(),
                task_id: task.id.clone(),
                error: error.clone(),
            });
            self.audit
                .record(
                    AuditEvent::new("task.failed", &self.config.actor, subject)
                        .with_details(json!({ "agent": task.agent, "error": error })),
                )
                .await;
        }
        result
    }

    async fn build_twin(&self, state: &mut OrchestrationState) -> Result<(), OrchestratorError> {
        let Some(builder) = &self.twin_builder else {
            return Ok(());
        };
        let (Some(incident), Some(repo)) =
            (state.context.incident.clone(), state.context.repo_path.clone())
        else {
            return Ok(());
        };

        self.transition(state, OrchestrationStatus::TwinBuilding)?;
        match timeout(self.config.agent_timeout, builder.build_twin(&incident, &repo)).await {
            Ok(Ok(twin)) => {
                state.twin = Some(twin);
                self.log(state, LogLevel::Info, "incident twin built");
            }
            Ok(Err(e)) => {
                self.log(state, LogLevel::Warn, format!("twin building failed: {e}"));
            }
            Err(_) => {
                let secs = self.config.agent_timeout.as_secs();
                self.log(
                    state,
                    LogLevel::Warn,
                    format!("twin building timed out after {secs}s"),
                );
            }
        }
        Ok(())
    }

    async fn planning_failed(&self, state: &OrchestrationState, error: AgentError) -> OrchestratorError {
        tracing::warn!(orchestration_id = %state.id, error = %error, "planning failed");
        self.audit
            .record(
                AuditEvent::new("orchestration.planning_failed", &self.config.actor, &state.id)
                    .with_details(json!({ "error": error.to_string() })),
            )
            .await;
        OrchestratorError::Planning(error)
    }

    async fn run_waves(
        &self,
        state: &mut OrchestrationState,
        waves: &WavePlan,
    ) -> Result<(), OrchestratorError> {
        while state.current_wave < waves.len() {
            let index = state.current_wave;
            let plan = state
                .plan
                .as_ref()
                .ok_or_else(|| OrchestratorError::MissingPlan(state.id.clone()))?;

            let pending: Vec<SubTask> = waves.waves[index]
                .iter()
                .filter(|id| !state.results.contains(id))
                .filter_map(|id| plan.subtask(id).cloned())
                .collect();

            let gated = plan.requires_approval
                && !state.approval_granted
                && pending
                    .iter()
                    .any(|t| t.agent.parse::<AgentKind>().ok() == Some(AgentKind::Executor));
            if gated {
                return self.pause_for_approval(state).await;
            }

            self.emit(OrchestratorEvent::WaveStarted {
                orchestration_id: state.id.clone(),
                wave: index,
                task_ids: pending.iter().map(|t| t.id.clone()).collect(),
            });
            tracing::info!(orchestration_id = %state.id, wave = index, tasks = pending.len(), "wave started");

            let results = {
                let shared: &OrchestrationState = state;
                join_all(pending.iter().map(|task| self.execute_task(shared, task))).await
            };

            let mut stop_reason = None;
            for (task, result) in pending.iter().zip(results) {
                match &result.error {
                    None => self.log(state, LogLevel::Info, format!("task {} completed", task.id)),
                    Some(error) => {
                        self.log(
                            state,
                            LogLevel::Error,
                            format!("task {} failed: {error}", task.id),
                        );
                        if stop_reason.is_none() {
                            stop_reason = critical_failure(task);
                        }
                    }
                }
                state.results.insert(result);
            }

            state.current_wave += 1;
            self.emit(OrchestratorEvent::WaveCompleted {
                orchestration_id: state.id.clone(),
                wave: index,
            });

            if let Some(reason) = stop_reason {
                state.error = Some(reason.clone());
                self.log(state, LogLevel::Error, reason);
                return self.finish(state, OrchestrationStatus::Failed).await;
            }
        }

        self.finish(state, OrchestrationStatus::Completed).await
    }

    async fn pause_for_approval(&self, state: &mut OrchestrationState) -> Result<(), OrchestratorError> {
        if state.approval_id.is_none() {
            if let (Some(store), Some(plan)) = (&self.approvals, &state.plan) {
                let requester = state
                    .context
                    .requester
                    .clone()
                    .unwrap_or_else(|| self.config.actor.clone());
                let request = ApprovalRequest::new(
                    state.request.clone(),
                    plan.risk_level,
                    plan.summary.clone(),
                    requester,
                )
                .for_orchestration(state.id.clone());
                let approval = store.create(request).await?;
                state.approval_id = Some(approval.id);
            }
        }

        self.transition(state, OrchestrationStatus::AwaitingApproval)?;
        let wave = state.current_wave;
        self.log(
            state,
            LogLevel::Info,
            format!("wave {wave} contains executor work and waits for approval"),
        );
        self.emit(OrchestratorEvent::AwaitingApproval {
            orchestration_id: state.id.clone(),
            approval_id: state.approval_id.clone(),
            wave,
        });
        self.audit
            .record(
                AuditEvent::new("orchestration.awaiting_approval", &self.config.actor, &state.id)
                    .with_details(json!({ "approvalId": state.approval_id, "wave": wave })),
            )
            .await;
        Ok(())
    }

    async fn finish(
        &self,
        state: &mut OrchestrationState,
        status: OrchestrationStatus,
    ) -> Result<(), OrchestratorError> {
        state.rollback_plan = state.results.latest_rollback_plan();
        self.transition(state, status)?;
        tracing::info!(orchestration_id = %state.id, status = %status, "orchestration finished");
        self.emit(OrchestratorEvent::Finished {
            orchestration_id: state.id.clone(),
            status,
            rollback_plan: state.rollback_plan.clone(),
        });
        self.audit
            .record(
                AuditEvent::new(
                    format!("orchestration.{}", status.as_str()),
                    &self.config.actor,
                    &state.id,
                )
                .with_details(json!({
                    "results": state.results.len(),
                    "rollbackPlan": state.rollback_plan,
                    "error": state.error,
                })),
            )
            .await;
        Ok(())
    }

    async fn run_task(&self, state: &OrchestrationState, task: &SubTask) -> Result<Value, TaskFailure> {
        if let Some(reason) = state
            .context
            .execution_policy
            .check(&task.agent, &task.description)
        {
            return Err(TaskFailure::new(format!("rejected by policy: {reason}")));
        }

        if let Some(phase) = task.sandbox_phase {
            return self.run_sandbox_phase(state, task, phase).await;
        }

        let kind: AgentKind = task
            .agent
            .parse()
            .map_err(|e: AgentError| TaskFailure::new(e.to_string()))?;
        if kind == AgentKind::Executor && state.context.safe_mode {
            return Err(TaskFailure::new("executor tasks are rejected in safe mode"));
        }

        let sandbox = if kind.capabilities().requires_sandbox && !state.context.safe_mode {
            self.preflight_sandbox(state).await?
        } else {
            None
        };

        let rollback_point = if kind.capabilities().mutates_repository {
            self.create_rollback_point(state, task).await?
        } else {
            None
        };

        let request = AgentRequest {
            orchestration_id: state.id.clone(),
            subtask: task.clone(),
            request: state.request.clone(),
            dependency_outputs: state.results.completed_outputs(&task.dependencies),
            context: agent_context(state, task),
            sandbox,
        };
        let outcome = match timeout(self.config.agent_timeout, self.agents.dispatch(kind, request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(AgentError::Timeout {
                agent: task.agent.clone(),
                duration_secs: self.config.agent_timeout.as_secs(),
            }),
        };

        match outcome {
            Ok(output) => Ok(output),
            Err(e) => {
                let failure = TaskFailure::new(e.to_string());
                match rollback_point {
                    Some(point) => Err(failure.with_output(json!({
                        "rollback": self.restore(&state.id, &point).await,
                    }))),
                    None => Err(failure),
                }
            }
        }
    }

    /// Sandbox run required before operator and executor dispatch
    async fn preflight_sandbox(&self, state: &OrchestrationState) -> Result<Option<Value>, TaskFailure> {
        let Some(config) = state.context.sandbox_config() else {
            return Ok(None);
        };
        let engine = self
            .sandbox
            .as_ref()
            .ok_or_else(|| TaskFailure::new("sandbox configured for the run but no sandbox engine available"))?;

        let result = engine
            .run(&config, SandboxPurpose::General)
            .await
            .map_err(|e| TaskFailure::new(format!("sandbox refused or failed to run: {e}")))?;
        let value = sandbox_value(&result);
        if result.success {
            Ok(Some(value))
        } else {
            Err(TaskFailure::new(sandbox_failure("sandbox run failed", &result))
                .with_output(json!({ "sandbox": value })))
        }
    }

    async fn run_sandbox_phase(
        &self,
        state: &OrchestrationState,
        task: &SubTask,
        phase: SandboxPhase,
    ) -> Result<Value, TaskFailure> {
        let engine = self
            .sandbox
            .as_ref()
            .ok_or_else(|| TaskFailure::new("sandbox phase task but no sandbox engine available"))?;
        let config = state
            .context
            .sandbox_config()
            .ok_or_else(|| TaskFailure::new("sandbox phase task but the run has no sandbox configuration"))?;

        let result = engine
            .run(&config, SandboxPurpose::from(phase))
            .await
            .map_err(|e| TaskFailure::new(format!("sandbox refused or failed to run: {e}")))?;
        let value = sandbox_value(&result);

        match phase {
            SandboxPhase::Pre => {
                if result.reproduction_successful != Some(true) {
                    tracing::warn!(orchestration_id = %state.id, task_id = %task.id, "reproduction did not reproduce the issue");
                }
                Ok(value)
            }
            SandboxPhase::Post => {
                if result.success && result.fix_verified != Some(false) {
                    Ok(value)
                } else {
                    Err(TaskFailure::new(sandbox_failure(
                        "post-change verification failed; the issue is not mitigated",
                        &result,
                    ))
                    .with_output(value))
                }
            }
        }
    }

    async fn create_rollback_point(
        &self,
        state: &OrchestrationState,
        task: &SubTask,
    ) -> Result<Option<RollbackRecord>, TaskFailure> {
        let (Some(manager), Some(repo)) = (&self.rollback, &state.context.repo_path) else {
            return Ok(None);
        };
        let mut options = RollbackOptions::default()
            .for_task(task.id.clone())
            .with_metadata("orchestrationId", json!(state.id));
        if let Some(approval_id) = &state.approval_id {
            options = options.for_approval(approval_id.clone());
        }
        manager
            .create_rollback_point(repo, options)
            .await
            .map(Some)
            .map_err(|e| TaskFailure::new(format!("could not create rollback point: {e}")))
    }

    async fn restore(&self, orchestration_id: &str, point: &RollbackRecord) -> Value {
        let Some(manager) = &self.rollback else {
            return Value::Null;
        };
        match manager.execute_rollback(&point.id, &self.config.actor).await {
            Ok(record) => {
                tracing::info!(orchestration_id, rollback_id = %record.id, "executor failed, repository restored");
                json!({ "id": record.id, "status": "completed" })
            }
            Err(e) => {
                tracing::error!(orchestration_id, rollback_id = %point.id, error = %e, "automatic rollback failed");
                json!({ "id": point.id, "status": "failed", "error": e.to_string() })
            }
        }
    }

    fn emit(&self, event: OrchestratorEvent) {
        if let Some(tx) = &self.events {
            // A dropped receiver only means nobody is listening.
            let _ = tx.send(event);
        }
    }

    fn log(&self, state: &mut OrchestrationState, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info => tracing::info!(orchestration_id = %state.id, "{message}"),
            LogLevel::Warn => tracing::warn!(orchestration_id = %state.id, "{message}"),
            LogLevel::Error => tracing::error!(orchestration_id = %state.id, "{message}"),
        }
        state.log(level, message.clone());
        self.emit(OrchestratorEvent::Log {
            orchestration_id: state.id.clone(),
            level,
            message,
        });
    }

    fn transition(
        &self,
        state: &mut OrchestrationState,
        to: OrchestrationStatus,
    ) -> Result<(), OrchestratorError> {
        let from = state.status;
        state.transition(to)?;
        self.emit(OrchestratorEvent::StatusChanged {
            orchestration_id: state.id.clone(),
            from,
            to,
        });
        Ok(())
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("agents", &self.agents)
            .field("twin_builder", &self.twin_builder.is_some())
            .field("sandbox", &self.sandbox.is_some())
            .field("rollback", &self.rollback.is_some())
            .field("approvals", &self.approvals.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Failure reason that stops the orchestration, if this task is critical
fn critical_failure(task: &SubTask) -> Option<String> {
    if task.sandbox_phase == Some(SandboxPhase::Post) {
        Some(format!(
            "post-change verification {} failed; stopping",
            task.id
        ))
    } else if task.priority == Priority::High {
        Some(format!("high-priority task {} failed; stopping", task.id))
    } else {
        None
    }
}

fn agent_context(state: &OrchestrationState, task: &SubTask) -> Value {
    json!({
        "repoPath": state.context.repo_path,
        "repository": state.context.repository,
        "incident": task.incident_context.as_ref().or(state.context.incident.as_ref()),
        "twin": state.twin,
        "requester": state.context.requester,
        "safeMode": state.context.safe_mode,
        "riskLevel": state.plan.as_ref().map(|p| p.risk_level),
    })
}

fn sandbox_value(result: &SandboxResult) -> Value {
    serde_json::to_value(result).unwrap_or(Value::Null)
}

fn sandbox_failure(prefix: &str, result: &SandboxResult) -> String {
    if result.timed_out {
        format!("{prefix}: timed out")
    } else {
        let code = result
            .exit_code
            .map_or_else(|| "none".to_string(), |c| c.to_string());
        format!("{prefix}: exit code {code}")
    }
}
