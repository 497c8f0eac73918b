//! Best-effort audit sink
//!
//! Audit storage is external. Sinks may fail; the orchestrator talks to them
//! only through [`BestEffortAudit`], which logs failures and never returns
//! them, so observability cannot abort the critical path.

use crate::error::AuditError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    /// Action name, e.g. `task.completed`
    pub action: String,
    /// Who caused it
    pub actor: String,
    /// Orchestration or task the event is about
    pub subject: String,
    /// Extra details
    #[serde(default)]
    pub details: serde_json::Value,
    /// When it happened
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    /// Create new event stamped now
    #[must_use]
    pub fn new(
        action: impl Into<String>,
        actor: impl Into<String>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            action: action.into(),
            actor: actor.into(),
            subject: subject.into(),
            details: serde_json::Value::Null,
            at: Utc::now(),
        }
    }

    /// With details
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// External audit storage
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record an event
    async fn record(&self, event: AuditEvent) -> Result<(), AuditError>;
}

/// Sink that logs through `tracing` only
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        tracing::info!(
            action = %event.action,
            actor = %event.actor,
            subject = %event.subject,
            "audit"
        );
        Ok(())
    }
}

/// Wrapper that makes the best-effort contract explicit
#[derive(Clone)]
pub struct BestEffortAudit {
    sink: Arc<dyn AuditSink>,
}

impl BestEffortAudit {
    /// Wrap a sink
    #[must_use]
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Record an event; sink failures are logged and dropped
    pub async fn record(&self, event: AuditEvent) {
        let action = event.action.clone();
        if let Err(e) = self.sink.record(event).await {
            tracing::warn!(action = %action, error = %e, "audit record dropped");
        }
    }
}

impl Default for BestEffortAudit {
    fn default() -> Self {
        Self::new(Arc::new(TracingAuditSink))
    }
}

impl std::fmt::Debug for BestEffortAudit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BestEffortAudit").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Broken(AtomicUsize);

    #[async_trait]
    impl AuditSink for Broken {
        async fn record(&self, _event: AuditEvent) -> Result<(), AuditError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(AuditError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn failing_sink_does_not_propagate() {
        let sink = Arc::new(Broken(AtomicUsize::new(0)));
        let audit = BestEffortAudit::new(sink.clone());

        audit.record(AuditEvent::new("task.failed", "worker-1", "o1")).await;
        audit.record(AuditEvent::new("task.failed", "worker-1", "o1")).await;

        assert_eq!(sink.0.load(Ordering::SeqCst), 2);
    }
}
