//! Queue errors

/// Errors raised by queue backends
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Reading from a group that was never created
    #[error("consumer group {group} does not exist on stream {stream}")]
    NoGroup {
        /// Stream name
        stream: String,
        /// Group name
        group: String,
    },

    /// Backend failure
    #[error("queue backend error: {0}")]
    Backend(String),
}

impl QueueError {
    /// Check if a retry may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

impl From<redis::RedisError> for QueueError {
    fn from(e: redis::RedisError) -> Self {
        Self::Backend(e.to_string())
    }
}
