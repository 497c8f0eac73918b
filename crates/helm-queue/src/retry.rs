//! Requeue with backoff, or dead-letter
//!
//! `attempts` on a message counts failed deliveries. A failed message is
//! re-enqueued with the count incremented until the count exceeds
//! `max_attempts`; then it moves to the dead-letter stream with the failure
//! details attached.

use crate::error::QueueError;
use crate::queue::{QueueMessage, TaskQueue, ATTEMPTS_FIELD};
use std::time::Duration;

/// Exponential retry schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failed deliveries tolerated before dead-lettering
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on any delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Create policy
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`, capped
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1_u32 << exponent)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// What happened to a failed message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Back on the original stream
    Requeued {
        /// New entry id
        id: String,
        /// Failed deliveries so far
        attempts: u32,
        /// Delay waited before requeueing
        delay: Duration,
    },
    /// Moved to the dead-letter stream
    DeadLettered {
        /// Entry id on the dead-letter stream
        id: String,
        /// Failed deliveries
        attempts: u32,
    },
}

/// Handle one failed delivery of `message` read from `stream`
///
/// The caller still acknowledges the original entry.
///
/// # Errors
/// Fails when the queue rejects the write.
pub async fn requeue_or_dead_letter(
    queue: &dyn TaskQueue,
    policy: &RetryPolicy,
    stream: &str,
    dead_letter_stream: &str,
    message: &QueueMessage,
    error: &str,
) -> Result<RetryOutcome, QueueError> {
    let attempts = message.attempts().saturating_add(1);

    if attempts > policy.max_attempts {
        let id = dead_letter(queue, stream, dead_letter_stream, message, attempts, error).await?;
        return Ok(RetryOutcome::DeadLettered { id, attempts });
    }

    let mut fields = message.fields.clone();
    fields.insert(ATTEMPTS_FIELD.to_string(), attempts.to_string());
    let delay = policy.delay_for(attempts);
    tracing::info!(original_id = %message.id, attempts, delay_ms = delay.as_millis() as u64, "requeueing message");
    tokio::time::sleep(delay).await;
    let id = queue.enqueue(stream, &fields).await?;
    Ok(RetryOutcome::Requeued {
        id,
        attempts,
        delay,
    })
}

/// Move `message` to the dead-letter stream after `attempts` failed deliveries
///
/// The original payload is kept; `error`, `attempts`, `originalStream`,
/// `originalId` and `failedAt` are added. Returns the dead-letter entry id.
///
/// # Errors
/// Fails when the queue rejects the write.
pub async fn dead_letter(
    queue: &dyn TaskQueue,
    stream: &str,
    dead_letter_stream: &str,
    message: &QueueMessage,
    attempts: u32,
    error: &str,
) -> Result<String, QueueError> {
    let mut fields = message.fields.clone();
    fields.insert(ATTEMPTS_FIELD.to_string(), attempts.to_string());
    fields.insert("error".to_string(), error.to_string());
    fields.insert("originalStream".to_string(), stream.to_string());
    fields.insert("originalId".to_string(), message.id.clone());
    fields.insert("failedAt".to_string(), chrono::Utc::now().to_rfc3339());
    let id = queue.enqueue(dead_letter_stream, &fields).await?;
    tracing::warn!(
        original_id = %message.id,
        attempts,
        dead_letter_id = %id,
        error,
        "message dead-lettered"
    );
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{Fields, MemoryQueue};

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(3))
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(64), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn requeues_until_max_then_dead_letters() {
        let queue = MemoryQueue::new();
        let mut fields = Fields::new();
        fields.insert("role".into(), "advisor".into());
        let mut message = QueueMessage {
            id: "1-1".into(),
            fields,
        };

        for expected in 1..=3 {
            match requeue_or_dead_letter(&queue, &policy(), "tasks", "dlq", &message, "boom")
                .await
                .unwrap()
            {
                RetryOutcome::Requeued { attempts, id, .. } => {
                    assert_eq!(attempts, expected);
                    message = queue
                        .entries("tasks")
                        .into_iter()
                        .find(|m| m.id == id)
                        .unwrap();
                }
                other => panic!("expected requeue, got {other:?}"),
            }
        }

        let outcome = requeue_or_dead_letter(&queue, &policy(), "tasks", "dlq", &message, "boom")
            .await
            .unwrap();
        assert!(matches!(outcome, RetryOutcome::DeadLettered { attempts: 4, .. }));

        let dead = queue.entries("dlq");
        assert_eq!(dead.len(), 1);
        let dead = &dead[0];
        assert_eq!(dead.field("role"), Some("advisor"));
        assert_eq!(dead.field("error"), Some("boom"));
        assert_eq!(dead.field("attempts"), Some("4"));
        assert_eq!(dead.field("originalStream"), Some("tasks"));
        assert_eq!(dead.field("originalId"), Some(message.id.as_str()));
        assert!(dead.field("failedAt").is_some());
    }

    #[tokio::test]
    async fn message_at_the_limit_is_requeued_once_more() {
        let queue = MemoryQueue::new();
        let mut fields = Fields::new();
        fields.insert(ATTEMPTS_FIELD.to_string(), "2".into());
        let message = QueueMessage {
            id: "1-2".into(),
            fields,
        };

        let outcome = requeue_or_dead_letter(&queue, &policy(), "tasks", "dlq", &message, "boom")
            .await
            .unwrap();

        assert!(matches!(outcome, RetryOutcome::Requeued { attempts: 3, .. }));
        assert!(queue.entries("dlq").is_empty());
    }
}
