//! Queue contract and the in-memory backend

use crate::error::QueueError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::Notify;

/// Flat message payload
pub type Fields = BTreeMap<String, String>;

/// Field counting failed deliveries
pub const ATTEMPTS_FIELD: &str = "attempts";

/// A delivered entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// Entry id assigned by the queue
    pub id: String,
    /// Payload
    pub fields: Fields,
}

impl QueueMessage {
    /// Field value
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Failed deliveries so far
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.field(ATTEMPTS_FIELD)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }
}

/// Append-only log read through consumer groups
///
/// Each entry is delivered to exactly one consumer of a group and stays
/// pending until acknowledged.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Create the group (and stream) if missing
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), QueueError>;

    /// Append an entry; returns its id
    async fn enqueue(&self, stream: &str, fields: &Fields) -> Result<String, QueueError>;

    /// Up to `count` new entries for `consumer`, waiting at most `block`
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    /// Acknowledge an entry
    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), QueueError>;

    /// Delivered but unacknowledged entries of a group
    async fn pending(&self, stream: &str, group: &str) -> Result<u64, QueueError>;

    /// Entries in the stream
    async fn len(&self, stream: &str) -> Result<u64, QueueError>;
}

#[derive(Debug, Default)]
struct GroupState {
    next: usize,
    pending: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct StreamState {
    entries: Vec<QueueMessage>,
    groups: HashMap<String, GroupState>,
}

/// In-process queue for tests and development
#[derive(Debug, Default)]
pub struct MemoryQueue {
    streams: Mutex<HashMap<String, StreamState>>,
    seq: Mutex<u64>,
    appended: Notify,
}

impl MemoryQueue {
    /// Create empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every entry of a stream, acknowledged or not
    #[must_use]
    pub fn entries(&self, stream: &str) -> Vec<QueueMessage> {
        self.streams
            .lock()
            .get(stream)
            .map(|s| s.entries.clone())
            .unwrap_or_default()
    }

    fn take_new(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let mut streams = self.streams.lock();
        let no_group = || QueueError::NoGroup {
            stream: stream.to_string(),
            group: group.to_string(),
        };
        let state = streams.get_mut(stream).ok_or_else(no_group)?;
        let group_state = state.groups.get_mut(group).ok_or_else(no_group)?;

        let end = (group_state.next + count.max(1)).min(state.entries.len());
        let batch: Vec<QueueMessage> = state.entries[group_state.next..end].to_vec();
        group_state.next = end;
        for message in &batch {
            group_state
                .pending
                .insert(message.id.clone(), consumer.to_string());
        }
        Ok(batch)
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), QueueError> {
        let mut streams = self.streams.lock();
        let state = streams.entry(stream.to_string()).or_default();
        // New groups start at the beginning of the stream, like id `0`.
        state.groups.entry(group.to_string()).or_default();
        Ok(())
    }

    async fn enqueue(&self, stream: &str, fields: &Fields) -> Result<String, QueueError> {
        let id = {
            let mut seq = self.seq.lock();
            *seq += 1;
            format!("{}-{}", chrono::Utc::now().timestamp_millis(), *seq)
        };
        self.streams
            .lock()
            .entry(stream.to_string())
            .or_default()
            .entries
            .push(QueueMessage {
                id: id.clone(),
                fields: fields.clone(),
            });
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let deadline = tokio::time::Instant::now() + block;
        loop {
            let appended = self.appended.notified();
            let batch = self.take_new(stream, group, consumer, count)?;
            if !batch.is_empty() {
                return Ok(batch);
            }
            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), QueueError> {
        if let Some(group_state) = self
            .streams
            .lock()
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
        {
            group_state.pending.remove(id);
        }
        Ok(())
    }

    async fn pending(&self, stream: &str, group: &str) -> Result<u64, QueueError> {
        Ok(self
            .streams
            .lock()
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map_or(0, |g| g.pending.len() as u64))
    }

    async fn len(&self, stream: &str) -> Result<u64, QueueError> {
        Ok(self
            .streams
            .lock()
            .get(stream)
            .map_or(0, |s| s.entries.len() as u64))
    }
}
