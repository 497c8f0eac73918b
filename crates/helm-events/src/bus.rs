//! EventBus - transient progress fan-out
//!
//! Every event goes to its orchestration's channel and to the wildcard
//! channel. Delivery is best effort: nothing is persisted, slow subscribers
//! may miss events.

use crate::error::EventBusError;
use crate::event::BusEvent;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, mpsc};
use tokio::task::AbortHandle;

/// Buffered events per subscription
pub(crate) const SUBSCRIPTION_BUFFER: usize = 256;

/// What a subscriber listens to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// One orchestration
    Orchestration(String),
    /// Every orchestration
    All,
}

impl Topic {
    /// Channel name
    #[must_use]
    pub fn channel(&self) -> String {
        match self {
            Self::Orchestration(id) => format!("helm:events:{id}"),
            Self::All => "helm:events:all".to_string(),
        }
    }

    /// Both channels an event is published to
    #[must_use]
    pub fn channels_for(event: &BusEvent) -> [String; 2] {
        [
            Self::Orchestration(event.task_id.clone()).channel(),
            Self::All.channel(),
        ]
    }
}

/// Realtime publish/subscribe
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish to the event's orchestration channel and the wildcard channel
    async fn publish(&self, event: BusEvent) -> Result<(), EventBusError>;

    /// Subscribe to a topic
    async fn subscribe(&self, topic: Topic) -> Result<Subscription, EventBusError>;
}

/// A live subscription
///
/// Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    topic: Topic,
    rx: mpsc::Receiver<BusEvent>,
    forwarder: AbortHandle,
    closed: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(topic: Topic, rx: mpsc::Receiver<BusEvent>, forwarder: AbortHandle) -> Self {
        Self {
            topic,
            rx,
            forwarder,
            closed: AtomicBool::new(false),
        }
    }

    /// Subscribed topic
    #[must_use]
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Next event; `None` once unsubscribed or the bus is gone
    pub async fn recv(&mut self) -> Option<BusEvent> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        self.rx.recv().await
    }

    /// Stop receiving
    ///
    /// Idempotent: returns true only for the call that actually closed it.
    pub fn unsubscribe(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.forwarder.abort();
        tracing::debug!(channel = %self.topic.channel(), "unsubscribed");
        true
    }

    /// Whether `unsubscribe` was called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// In-process bus over tokio broadcast channels
#[derive(Debug)]
pub struct BroadcastEventBus {
    channels: DashMap<String, broadcast::Sender<BusEvent>>,
    capacity: usize,
}

impl BroadcastEventBus {
    /// Create a bus with per-channel capacity
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Configured capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventBus for BroadcastEventBus {
    async fn publish(&self, event: BusEvent) -> Result<(), EventBusError> {
        for channel in Topic::channels_for(&event) {
            if let Some(tx) = self.channels.get(&channel) {
                // No receivers is not an error.
                let _ = tx.send(event.clone());
            }
        }
        Ok(())
    }

    async fn subscribe(&self, topic: Topic) -> Result<Subscription, EventBusError> {
        let channel = topic.channel();
        let mut source = self
            .channels
            .entry(channel.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let forwarder = tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(channel = %channel, missed, "subscriber lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription::new(topic, rx, forwarder.abort_handle()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    async fn next(sub: &mut Subscription) -> Option<BusEvent> {
        tokio::time::timeout(Duration::from_millis(200), sub.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn events_reach_task_and_wildcard_subscribers() {
        let bus = BroadcastEventBus::new(16);
        let mut task = bus.subscribe(Topic::Orchestration("o1".into())).await.unwrap();
        let mut other = bus.subscribe(Topic::Orchestration("o2".into())).await.unwrap();
        let mut all = bus.subscribe(Topic::All).await.unwrap();

        bus.publish(BusEvent::new("log", "o1", json!("hello"))).await.unwrap();

        assert_eq!(next(&mut task).await.unwrap().event_type, "log");
        assert_eq!(next(&mut all).await.unwrap().task_id, "o1");
        assert!(next(&mut other).await.is_none());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let bus = BroadcastEventBus::default();
        bus.publish(BusEvent::new("log", "o1", json!(null))).await.unwrap();
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let bus = BroadcastEventBus::new(4);
        let mut sub = bus.subscribe(Topic::All).await.unwrap();

        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        assert!(sub.is_closed());

        bus.publish(BusEvent::new("log", "o1", json!(1))).await.unwrap();
        assert!(sub.recv().await.is_none());
    }
}
