//! Error types for Helm Core
//!
//! Provides error handling for:
//! - External agent, planner and twin calls
//! - Audit sink failures

use crate::agent::AgentKind;

/// Errors raised by external agent calls
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AgentError {
    /// Agent name is not one of the known kinds
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    /// Known kind without a registered handler
    #[error("no handler registered for agent {0}")]
    NotRegistered(AgentKind),

    /// Agent ran and reported a failure
    #[error("agent call failed: {0}")]
    Failed(String),

    /// Agent exceeded its time bound
    #[error("agent {agent} timed out after {duration_secs}s")]
    Timeout {
        /// Agent name
        agent: String,
        /// Bound that was exceeded
        duration_secs: u64,
    },

    /// Agent output could not be interpreted
    #[error("invalid agent output: {0}")]
    InvalidOutput(String),
}

impl AgentError {
    /// Check if a retry may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Timeout { .. })
    }
}

/// Errors raised by audit sinks
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// Sink is unreachable
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),

    /// Sink rejected the event
    #[error("audit event rejected: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_error_display() {
        let err = AgentError::Timeout {
            agent: "executor".into(),
            duration_secs: 30,
        };
        assert_eq!(err.to_string(), "agent executor timed out after 30s");
    }

    #[test]
    fn agent_error_is_retryable() {
        assert!(AgentError::Failed("x".into()).is_retryable());
        assert!(!AgentError::UnknownAgent("x".into()).is_retryable());
        assert!(!AgentError::NotRegistered(AgentKind::Advisor).is_retryable());
    }
}
