//! Worker - consume the task stream and run jobs
//!
//! # Message lifecycle
//! 1. Read a batch from the consumer group
//! 2. Decode and run each job, retrying retryable errors with linear backoff
//! 3. Post the result (or the final error) to the results stream
//! 4. Dead-letter permanent failures, except lock contention
//! 5. Acknowledge exactly once
//!
//! Orchestration progress is forwarded to the event bus and the results
//! stream while a job runs. Paused orchestrations are persisted so any
//! worker of the group can resume them.

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::job::Job;
use crate::process::{ProcessAgent, ProcessCommand, ProcessPlanner, ProcessTwinBuilder};
use helm_core::{
    AgentError, AgentKind, AgentRegistry, AgentRequest, ApprovalStatus, BestEffortAudit, Decision,
    Planner, SubTask, TwinBuilder,
};
use helm_events::{BroadcastEventBus, BusEvent, EventBus, RedisEventBus};
use helm_orchestrator::{
    channel, EventReceiver, OrchestrationRequest, OrchestrationState, OrchestrationStatus,
    Orchestrator, OrchestratorEvent, RunContext,
};
use helm_queue::{dead_letter, Fields, MemoryQueue, QueueMessage, RedisQueue, TaskQueue};
use helm_rollback::RollbackManager;
use helm_sandbox::SandboxEngine;
use helm_store::{approval_lock_key, state_key, with_lock, Stores};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// Pause after a failed poll
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Agents, planner and engines shared by every job
#[derive(Clone)]
pub struct Services {
    agents: AgentRegistry,
    planner: Option<Arc<dyn Planner>>,
    twin_builder: Option<Arc<dyn TwinBuilder>>,
    sandbox: Option<Arc<SandboxEngine>>,
    rollback: Option<Arc<RollbackManager>>,
    audit: BestEffortAudit,
}

impl Services {
    /// Create services around an agent registry
    #[must_use]
    pub fn new(agents: AgentRegistry) -> Self {
        Self {
            agents,
            planner: None,
            twin_builder: None,
            sandbox: None,
            rollback: None,
            audit: BestEffortAudit::default(),
        }
    }

    /// With planner
    #[must_use]
    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
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

    /// With audit sink
    #[must_use]
    pub fn with_audit(mut self, audit: BestEffortAudit) -> Self {
        self.audit = audit;
        self
    }

    /// External executables from the config
    ///
    /// # Errors
    /// An agent command names an unknown agent, or the snapshot directory
    /// cannot be prepared.
    pub fn from_config(config: &WorkerConfig) -> Result<Self, WorkerError> {
        let mut agents = AgentRegistry::new();
        for (name, command) in &config.agents.commands {
            let kind: AgentKind = name.parse().map_err(|_| {
                crate::config::ConfigError::Invalid(format!("unknown agent in agents.commands: {name}"))
            })?;
            agents.register(kind, Arc::new(ProcessAgent::new(ProcessCommand::new(name.clone(), command.clone()))));
        }

        let mut services = Self::new(agents);
        if let Some(command) = &config.agents.planner {
            services = services.with_planner(Arc::new(ProcessPlanner::new(ProcessCommand::new(
                "planner",
                command.clone(),
            ))));
        }
        if let Some(command) = &config.agents.twin_builder {
            services = services.with_twin_builder(Arc::new(ProcessTwinBuilder::new(
                ProcessCommand::new("twin-builder", command.clone()),
            )));
        }

        let mut engine = SandboxEngine::new(config.sandbox_settings());
        if let Some(dir) = &config.snapshot_dir {
            let manager = Arc::new(RollbackManager::open(dir.clone())?);
            engine = engine.with_rollback(Arc::clone(&manager));
            services = services.with_rollback(manager);
        }
        Ok(services.with_sandbox(Arc::new(engine)))
    }

    /// Orchestrator for one job, reporting into `events`
    fn orchestrator(
        &self,
        config: &WorkerConfig,
        stores: &Stores,
        events: helm_orchestrator::EventSender,
    ) -> Result<Orchestrator, WorkerError> {
        let planner = self.planner.clone().ok_or(WorkerError::NoPlanner)?;
        let mut orchestrator = Orchestrator::new(self.agents.clone(), planner)
            .with_approval_store(Arc::clone(&stores.approvals))
            .with_audit(self.audit.clone())
            .with_events(events)
            .with_config(config.orchestrator());
        if let Some(builder) = &self.twin_builder {
            orchestrator = orchestrator.with_twin_builder(Arc::clone(builder));
        }
        if let Some(engine) = &self.sandbox {
            orchestrator = orchestrator.with_sandbox(Arc::clone(engine));
        }
        if let Some(manager) = &self.rollback {
            orchestrator = orchestrator.with_rollback(Arc::clone(manager));
        }
        Ok(orchestrator)
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("agents", &self.agents)
            .field("planner", &self.planner.is_some())
            .field("twin_builder", &self.twin_builder.is_some())
            .field("sandbox", &self.sandbox.is_some())
            .field("rollback", &self.rollback.is_some())
            .finish_non_exhaustive()
    }
}

/// How a message ended
#[derive(Debug)]
pub enum Outcome {
    /// Job succeeded; its output was posted
    Completed(Value),
    /// Job failed for good; the error was posted
    Failed {
        /// Final error
        error: WorkerError,
        /// Attempts made
        attempts: u32,
        /// Dead-letter entry, unless the failure was lock contention
        dead_letter_id: Option<String>,
    },
}

impl Outcome {
    /// Whether the job succeeded
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Queue consumer
pub struct Worker {
    config: WorkerConfig,
    queue: Arc<dyn TaskQueue>,
    stores: Stores,
    bus: Arc<dyn EventBus>,
    services: Services,
}

impl Worker {
    /// Create worker over explicit backends
    #[must_use]
    pub fn new(
        config: WorkerConfig,
        queue: Arc<dyn TaskQueue>,
        stores: Stores,
        bus: Arc<dyn EventBus>,
        services: Services,
    ) -> Self {
        Self {
            config,
            queue,
            stores,
            bus,
            services,
        }
    }

    /// Open backends and services described by `config`
    ///
    /// Redis backs the queue, stores and bus when configured; otherwise
    /// everything is in-process, which production refuses.
    ///
    /// # Errors
    /// Invalid config, or a backend that cannot be reached.
    pub async fn connect(config: WorkerConfig) -> Result<Self, WorkerError> {
        config.validate()?;
        let stores = Stores::open(&config.store_settings()).await?;
        let (queue, bus): (Arc<dyn TaskQueue>, Arc<dyn EventBus>) = match &config.redis_url {
            Some(url) => (
                Arc::new(RedisQueue::connect(url).await?),
                Arc::new(RedisEventBus::new(url)?),
            ),
            None => {
                tracing::warn!("redis not configured; queue and events are local to this process");
                (Arc::new(MemoryQueue::new()), Arc::new(BroadcastEventBus::default()))
            }
        };
        let services = Services::from_config(&config)?;
        tracing::info!(
            consumer = %config.consumer_name,
            group = %config.consumer_group,
            agents = ?services.agents.kinds(),
            "worker ready"
        );
        Ok(Self::new(config, queue, stores, bus, services))
    }

    /// Current config
    #[must_use]
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Consume until `cancel` fires, then drain in-flight jobs
    ///
    /// At most `batch_size` jobs run at once. Jobs still running after the
    /// shutdown grace period are aborted; their messages stay pending.
    ///
    /// # Errors
    /// The consumer group cannot be created.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<(), WorkerError> {
        let stream = self.config.tasks_stream.clone();
        let group = self.config.consumer_group.clone();
        self.queue.ensure_group(&stream, &group).await?;
        tracing::info!(stream = %stream, group = %group, "consuming");

        let mut in_flight: JoinSet<()> = JoinSet::new();
        loop {
            while let Some(joined) = in_flight.try_join_next() {
                log_join(joined);
            }
            let capacity = self.config.batch_size.saturating_sub(in_flight.len());
            if capacity == 0 {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    Some(joined) = in_flight.join_next() => log_join(joined),
                }
                continue;
            }

            let read = tokio::select! {
                () = cancel.cancelled() => break,
                read = self.queue.read_group(
                    &stream,
                    &group,
                    &self.config.consumer_name,
                    capacity,
                    self.config.block(),
                ) => read,
            };
            match read {
                Ok(messages) => {
                    for message in messages {
                        let worker = Arc::clone(&self);
                        in_flight.spawn(async move {
                            worker.handle_message(message).await;
                        });
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "poll failed");
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(POLL_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        tracing::info!(in_flight = in_flight.len(), "shutting down");
        let drain = async {
            while let Some(joined) = in_flight.join_next().await {
                log_join(joined);
            }
        };
        let drained = tokio::time::timeout(self.config.shutdown_grace(), drain).await;
        if drained.is_err() {
            tracing::warn!(
                aborted = in_flight.len(),
                "shutdown grace period elapsed; aborting jobs"
            );
            in_flight.abort_all();
        }
        Ok(())
    }

    /// Run one message to its final outcome and acknowledge it
    pub async fn handle_message(&self, message: QueueMessage) -> Outcome {
        let (result, attempts, role, task_id) = match Job::from_message(&message) {
            Ok(job) => {
                let (result, attempts) = self.run_with_retries(&job).await;
                (result, attempts, job.role().to_string(), job.task_id().to_string())
            }
            Err(e) => (
                Err(e),
                1,
                message.field("role").unwrap_or_default().to_string(),
                message.field("taskId").unwrap_or_default().to_string(),
            ),
        };

        let outcome = match result {
            Ok(output) => {
                self.post_result(&task_id, &role, Ok(&output)).await;
                Outcome::Completed(output)
            }
            Err(error) => {
                tracing::error!(task_id = %task_id, role = %role, attempts, error = %error, "job failed");
                self.post_result(&task_id, &role, Err(&error)).await;
                let dead_letter_id = if error.is_contention() {
                    None
                } else {
                    self.dead_letter(&message, attempts, &error).await
                };
                Outcome::Failed {
                    error,
                    attempts,
                    dead_letter_id,
                }
            }
        };

        if let Err(e) = self
            .queue
            .ack(&self.config.tasks_stream, &self.config.consumer_group, &message.id)
            .await
        {
            tracing::error!(message_id = %message.id, error = %e, "ack failed; message stays pending");
        }
        outcome
    }

    async fn run_with_retries(&self, job: &Job) -> (Result<Value, WorkerError>, u32) {
        let mut attempt = 1;
        loop {
            match self.process(job).await {
                Ok(output) => return (Ok(output), attempt),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = self.config.backoff(attempt);
                    tracing::warn!(
                        task_id = %job.task_id(),
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "job failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }

    /// Run one job once
    ///
    /// # Errors
    /// Whatever the job raised; see [`WorkerError::is_retryable`].
    pub async fn process(&self, job: &Job) -> Result<Value, WorkerError> {
        match job {
            Job::Orchestrate {
                task_id,
                request,
                context,
            } => self.orchestrate(task_id, request, context.clone()).await,
            Job::Approve {
                orchestration_id,
                actor,
                decision,
                reason,
                ..
            } => {
                let actor = actor.as_deref().ok_or(WorkerError::ActorRequired)?;
                let key = approval_lock_key(orchestration_id);
                with_lock(
                    self.stores.locks.as_ref(),
                    &key,
                    &self.config.consumer_name,
                    self.config.lock_ttl(),
                    || self.decide(orchestration_id, actor, *decision, reason.as_deref()),
                )
                .await
            }
            Job::Agent {
                task_id,
                kind,
                description,
                request,
                context,
            } => {
                self.run_agent(task_id, *kind, description, request, context)
                    .await
            }
        }
    }

    async fn orchestrate(
        &self,
        task_id: &str,
        request: &str,
        context: RunContext,
    ) -> Result<Value, WorkerError> {
        let (tx, rx) = channel();
        let orchestrator = self.services.orchestrator(&self.config, &self.stores, tx)?;
        let forwarder = self.forward_events(rx);

        let result = orchestrator
            .execute(OrchestrationRequest::new(request, context).with_id(task_id))
            .await;
        drop(orchestrator);
        join_forwarder(forwarder).await;

        let state = result?;
        self.persist(&state).await?;
        if state.is_terminal() {
            self.prune_snapshots().await;
        }
        Ok(summary(&state))
    }

    /// Apply a decision to a paused orchestration; runs under the approval lock
    ///
    /// The paused state is claimed (removed) before the run resumes, so a retry
    /// or a duplicate approval can never resume it a second time. Failures
    /// after the claim are permanent.
    async fn decide(
        &self,
        orchestration_id: &str,
        actor: &str,
        decision: Decision,
        reason: Option<&str>,
    ) -> Result<Value, WorkerError> {
        let key = state_key(orchestration_id);
        let raw = self
            .stores
            .state
            .load(&key)
            .await?
            .ok_or_else(|| WorkerError::StateNotFound(orchestration_id.to_string()))?;
        let paused: OrchestrationState = serde_json::from_str(&raw)?;

        // The stored approval decides: the first decision wins.
        let (approve, decided_by, decided_reason) = match &paused.approval_id {
            Some(approval_id) => {
                let approval = self
                    .stores
                    .approvals
                    .decide(approval_id, decision, actor, reason)
                    .await?;
                match approval.status {
                    ApprovalStatus::Approved => (true, approval.decided_by, approval.decision_reason),
                    ApprovalStatus::Denied => (false, approval.decided_by, approval.decision_reason),
                    ApprovalStatus::Expired | ApprovalStatus::Pending => (
                        false,
                        Some(actor.to_string()),
                        Some(format!("approval {} is {}", approval.id, approval.status.as_str())),
                    ),
                }
            }
            None => (
                decision == Decision::Approve,
                Some(actor.to_string()),
                reason.map(str::to_string),
            ),
        };

        if self.services.planner.is_none() {
            return Err(WorkerError::NoPlanner);
        }
        let claimed = self
            .stores
            .state
            .take(&key)
            .await?
            .ok_or_else(|| WorkerError::StateNotFound(orchestration_id.to_string()))?;
        let state: OrchestrationState = serde_json::from_str(&claimed)?;
        if state.approval_id != paused.approval_id {
            // Resumed and paused again at a later gate since the load
            self.stores
                .state
                .save(&key, &claimed, self.config.state_ttl())
                .await?;
            return Err(WorkerError::StateNotFound(orchestration_id.to_string()));
        }
        tracing::info!(orchestration_id, approve, "paused state claimed");

        let by = decided_by.unwrap_or_else(|| actor.to_string());
        self.finish_claimed(state, approve, &by, decided_reason.as_deref())
            .await
            .map_err(|source| WorkerError::AfterResume {
                orchestration_id: orchestration_id.to_string(),
                source: Box::new(source),
            })
    }

    async fn finish_claimed(
        &self,
        state: OrchestrationState,
        approve: bool,
        decided_by: &str,
        reason: Option<&str>,
    ) -> Result<Value, WorkerError> {
        let (tx, rx) = channel();
        let orchestrator = self.services.orchestrator(&self.config, &self.stores, tx)?;
        let forwarder = self.forward_events(rx);
        let result = if approve {
            orchestrator.resume_after_approval(state).await
        } else {
            orchestrator.deny(state, decided_by, reason).await
        };
        drop(orchestrator);
        join_forwarder(forwarder).await;

        let state = result?;
        // The claim already removed the stored copy
        if state.status == OrchestrationStatus::AwaitingApproval {
            self.persist(&state).await?;
        } else if state.is_terminal() {
            self.prune_snapshots().await;
        }
        Ok(summary(&state))
    }

    /// Drop rollback points past retention; failures are only logged
    async fn prune_snapshots(&self) {
        let Some(manager) = &self.services.rollback else {
            return;
        };
        if let Err(e) = manager.purge(self.config.snapshot_retention()).await {
            tracing::warn!(error = %e, "could not purge rollback points");
        }
    }

    async fn run_agent(
        &self,
        task_id: &str,
        kind: AgentKind,
        description: &str,
        request: &str,
        context: &RunContext,
    ) -> Result<Value, WorkerError> {
        if let Some(reason) = context.execution_policy.check(kind.as_str(), description) {
            return Err(WorkerError::PolicyRejected(reason));
        }
        if kind == AgentKind::Executor && context.safe_mode {
            return Err(WorkerError::PolicyRejected(
                "executor tasks are rejected in safe mode".to_string(),
            ));
        }

        let request = AgentRequest {
            orchestration_id: task_id.to_string(),
            subtask: SubTask::new(task_id, kind.as_str(), description),
            request: request.to_string(),
            dependency_outputs: serde_json::Map::new(),
            context: json!({
                "repoPath": context.repo_path,
                "repository": context.repository,
                "incident": context.incident,
                "requester": context.requester,
                "safeMode": context.safe_mode,
            }),
            sandbox: None,
        };
        let bound = self.config.agent_timeout();
        let output = tokio::time::timeout(bound, self.services.agents.dispatch(kind, request))
            .await
            .unwrap_or_else(|_| {
                Err(AgentError::Timeout {
                    agent: kind.as_str().to_string(),
                    duration_secs: bound.as_secs(),
                })
            })?;
        Ok(output)
    }

    /// Save paused state, drop finished state
    async fn persist(&self, state: &OrchestrationState) -> Result<(), WorkerError> {
        let key = state_key(&state.id);
        if state.status == OrchestrationStatus::AwaitingApproval {
            let raw = serde_json::to_string(state)?;
            self.stores
                .state
                .save(&key, &raw, self.config.state_ttl())
                .await?;
            tracing::info!(orchestration_id = %state.id, approval_id = ?state.approval_id, "paused state saved");
        } else if state.is_terminal() {
            self.stores.state.delete(&key).await?;
        }
        Ok(())
    }

    fn forward_events(&self, mut rx: EventReceiver) -> JoinHandle<()> {
        let bus = Arc::clone(&self.bus);
        let queue = Arc::clone(&self.queue);
        let stream = self.config.results_stream.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                forward_event(bus.as_ref(), queue.as_ref(), &stream, &event).await;
            }
        })
    }

    async fn post_result(&self, task_id: &str, role: &str, result: Result<&Value, &WorkerError>) {
        let mut fields = Fields::new();
        fields.insert("type".into(), "result".into());
        fields.insert("taskId".into(), task_id.to_string());
        fields.insert("role".into(), role.to_string());
        fields.insert("worker".into(), self.config.consumer_name.clone());
        match result {
            Ok(output) => {
                fields.insert("status".into(), "ok".into());
                fields.insert("result".into(), output.to_string());
            }
            Err(error) => {
                fields.insert("status".into(), "error".into());
                fields.insert("error".into(), error.to_string());
            }
        }
        if let Err(e) = self.queue.enqueue(&self.config.results_stream, &fields).await {
            tracing::error!(task_id, error = %e, "could not post result");
        }
    }

    async fn dead_letter(
        &self,
        message: &QueueMessage,
        attempts: u32,
        error: &WorkerError,
    ) -> Option<String> {
        match dead_letter(
            self.queue.as_ref(),
            &self.config.tasks_stream,
            &self.config.dead_letter_stream,
            message,
            attempts,
            &error.to_string(),
        )
        .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::error!(message_id = %message.id, error = %e, "could not dead-letter message");
                None
            }
        }
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("config", &self.config)
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}

async fn forward_event(
    bus: &dyn EventBus,
    queue: &dyn TaskQueue,
    stream: &str,
    event: &OrchestratorEvent,
) {
    let data = event.to_json();
    let bus_event = BusEvent::new(event.event_type(), event.orchestration_id(), data.clone());
    if let Err(e) = bus.publish(bus_event).await {
        tracing::debug!(error = %e, "event not published");
    }

    let mut fields = Fields::new();
    fields.insert("type".into(), event.event_type().to_string());
    fields.insert("taskId".into(), event.orchestration_id().to_string());
    fields.insert("data".into(), data.to_string());
    if let Err(e) = queue.enqueue(stream, &fields).await {
        tracing::warn!(error = %e, "event not written to results stream");
    }
}

async fn join_forwarder(forwarder: JoinHandle<()>) {
    if let Err(e) = forwarder.await {
        tracing::warn!(error = %e, "event forwarder stopped abnormally");
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            tracing::error!(error = %e, "job panicked; message stays pending");
        }
    }
}

/// Job output for an orchestration
fn summary(state: &OrchestrationState) -> Value {
    json!({
        "orchestrationId": state.id,
        "status": state.status,
        "approvalId": state.approval_id,
        "currentWave": state.current_wave,
        "results": state.results,
        "forcedTasks": state.forced_tasks,
        "rollbackPlan": state.rollback_plan,
        "error": state.error,
    })
}
