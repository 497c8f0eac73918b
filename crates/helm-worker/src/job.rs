//! Queue message parsing
//!
//! Messages are flat string maps. Every message carries `role` and `taskId`;
//! structured values (`context`) travel as JSON strings.

use crate::error::WorkerError;
use helm_core::{AgentKind, Decision};
use helm_orchestrator::RunContext;
use helm_queue::{Fields, QueueMessage};

/// A job decoded from a queue message
#[derive(Debug, Clone)]
pub enum Job {
    /// Plan and run a request
    Orchestrate {
        /// Orchestration id
        task_id: String,
        /// Request text
        request: String,
        /// Run context
        context: RunContext,
    },
    /// Decide a paused orchestration
    Approve {
        /// Message task id
        task_id: String,
        /// Paused orchestration
        orchestration_id: String,
        /// Deciding identity
        actor: Option<String>,
        /// Decision; approve when absent
        decision: Decision,
        /// Optional reason
        reason: Option<String>,
    },
    /// Dispatch one agent once
    Agent {
        /// Message task id
        task_id: String,
        /// Agent to call
        kind: AgentKind,
        /// Task description
        description: String,
        /// Request text
        request: String,
        /// Run context
        context: RunContext,
    },
}

impl Job {
    /// Decode a message
    ///
    /// # Errors
    /// Missing `role`/`taskId`, an unknown role, or malformed fields.
    pub fn from_message(message: &QueueMessage) -> Result<Self, WorkerError> {
        let role = message.field("role").ok_or(WorkerError::MissingField("role"))?;
        let task_id = message
            .field("taskId")
            .filter(|v| !v.is_empty())
            .ok_or(WorkerError::MissingField("taskId"))?
            .to_string();

        match role {
            "orchestrate" => Ok(Self::Orchestrate {
                request: message
                    .field("request")
                    .ok_or(WorkerError::MissingField("request"))?
                    .to_string(),
                context: parse_context(message)?,
                task_id,
            }),
            "approve" => Ok(Self::Approve {
                orchestration_id: message
                    .field("orchestrationId")
                    .filter(|v| !v.is_empty())
                    .unwrap_or(task_id.as_str())
                    .to_string(),
                actor: message
                    .field("actor")
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string),
                decision: message.field("decision").map_or(Ok(Decision::Approve), parse_decision)?,
                reason: message.field("reason").map(str::to_string),
                task_id,
            }),
            other => {
                let kind: AgentKind = other
                    .parse()
                    .map_err(|_| WorkerError::UnknownRole(other.to_string()))?;
                let request = message.field("request").unwrap_or_default().to_string();
                Ok(Self::Agent {
                    kind,
                    description: message
                        .field("description")
                        .map_or_else(|| request.clone(), str::to_string),
                    request,
                    context: parse_context(message)?,
                    task_id,
                })
            }
        }
    }

    /// Message task id
    #[must_use]
    pub fn task_id(&self) -> &str {
        match self {
            Self::Orchestrate { task_id, .. }
            | Self::Approve { task_id, .. }
            | Self::Agent { task_id, .. } => task_id,
        }
    }

    /// Role string
    #[must_use]
    pub fn role(&self) -> &str {
        match self {
            Self::Orchestrate { .. } => "orchestrate",
            Self::Approve { .. } => "approve",
            Self::Agent { kind, .. } => kind.as_str(),
        }
    }

    /// Encode as queue fields
    ///
    /// # Errors
    /// Context serialization failure.
    pub fn to_fields(&self) -> Result<Fields, WorkerError> {
        let mut fields = Fields::new();
        fields.insert("role".into(), self.role().to_string());
        fields.insert("taskId".into(), self.task_id().to_string());
        match self {
            Self::Orchestrate {
                request, context, ..
            } => {
                fields.insert("request".into(), request.clone());
                fields.insert("context".into(), serde_json::to_string(context)?);
            }
            Self::Approve {
                orchestration_id,
                actor,
                decision,
                reason,
                ..
            } => {
                fields.insert("orchestrationId".into(), orchestration_id.clone());
                if let Some(actor) = actor {
                    fields.insert("actor".into(), actor.clone());
                }
                let decision = match decision {
                    Decision::Approve => "approved",
                    Decision::Deny => "denied",
                };
                fields.insert("decision".into(), decision.to_string());
                if let Some(reason) = reason {
                    fields.insert("reason".into(), reason.clone());
                }
            }
            Self::Agent {
                description,
                request,
                context,
                ..
            } => {
                fields.insert("description".into(), description.clone());
                fields.insert("request".into(), request.clone());
                fields.insert("context".into(), serde_json::to_string(context)?);
            }
        }
        Ok(fields)
    }
}

fn parse_context(message: &QueueMessage) -> Result<RunContext, WorkerError> {
    match message.field("context").map(str::trim) {
        None | Some("") => Ok(RunContext::default()),
        Some(raw) => serde_json::from_str(raw).map_err(|e| WorkerError::InvalidField {
            field: "context",
            reason: e.to_string(),
        }),
    }
}

fn parse_decision(raw: &str) -> Result<Decision, WorkerError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "approved" | "approve" => Ok(Decision::Approve),
        "denied" | "deny" | "rejected" => Ok(Decision::Deny),
        other => Err(WorkerError::InvalidField {
            field: "decision",
            reason: format!("expected approved or denied, got '{other}'"),
        }),
    }
}
