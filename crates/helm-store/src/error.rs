//! Error types for Helm stores

use helm_core::ApprovalStatus;

/// Approval store errors
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    /// Unknown approval id
    #[error("approval not found: {0}")]
    NotFound(String),

    /// Approval exists but does not grant anything
    #[error("approval {id} is {}", status.as_str())]
    NotApproved {
        /// Approval id
        id: String,
        /// Current status
        status: ApprovalStatus,
    },

    /// Backend failure
    #[error("approval backend error: {0}")]
    Backend(String),

    /// Record could not be (de)serialized
    #[error("approval serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File backend failure
    #[error("approval file error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApprovalError {
    /// Check if a retry may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::Io(_))
    }
}

impl From<redis::RedisError> for ApprovalError {
    fn from(e: redis::RedisError) -> Self {
        Self::Backend(e.to_string())
    }
}

/// Distributed lock errors
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Another owner holds the lock
    #[error("{key} is already being processed")]
    Contended {
        /// Lock key
        key: String,
    },

    /// Backend failure
    #[error("lock backend error: {0}")]
    Backend(String),
}

impl LockError {
    /// Check if a retry may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

impl From<redis::RedisError> for LockError {
    fn from(e: redis::RedisError) -> Self {
        Self::Backend(e.to_string())
    }
}

/// Keyed state storage errors
#[derive(Debug, thiserror::Error)]
pub enum StateStoreError {
    /// Backend failure
    #[error("state backend error: {0}")]
    Backend(String),
}

impl From<redis::RedisError> for StateStoreError {
    fn from(e: redis::RedisError) -> Self {
        Self::Backend(e.to_string())
    }
}

/// Errors while opening store backends
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    /// Redis configured but not reachable
    #[error("redis at {url} is unreachable: {reason}")]
    Unreachable {
        /// Configured URL
        url: String,
        /// Connection failure
        reason: String,
    },

    /// Backend refused for this environment
    #[error("{0} is not allowed in production; configure redis")]
    NotAllowedInProduction(&'static str),

    /// Directory could not be prepared
    #[error("cannot prepare store directory: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contention_message() {
        let err = LockError::Contended {
            key: "helm:lock:approval:o1".into(),
        };
        assert_eq!(err.to_string(), "helm:lock:approval:o1 is already being processed");
        assert!(!err.is_retryable());
    }

    #[test]
    fn not_approved_message() {
        let err = ApprovalError::NotApproved {
            id: "a1".into(),
            status: ApprovalStatus::Expired,
        };
        assert_eq!(err.to_string(), "approval a1 is expired");
    }
}
