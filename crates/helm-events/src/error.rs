//! Event bus errors

/// Errors raised by event bus backends
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    /// Backend failure
    #[error("event bus backend error: {0}")]
    Backend(String),

    /// Event could not be (de)serialized
    #[error("event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EventBusError {
    /// Check if a retry may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

impl From<redis::RedisError> for EventBusError {
    fn from(e: redis::RedisError) -> Self {
        Self::Backend(e.to_string())
    }
}
