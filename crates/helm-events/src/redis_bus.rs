//! Redis pub/sub bus
//!
//! Publishing uses a multiplexed connection; every subscription opens its
//! own pub/sub connection, so a slow subscriber never blocks publishers.

use crate::bus::{EventBus, Subscription, Topic, SUBSCRIPTION_BUFFER};
use crate::error::EventBusError;
use crate::event::BusEvent;
use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use tokio::sync::mpsc;

/// Event bus over redis pub/sub
#[derive(Debug, Clone)]
pub struct RedisEventBus {
    client: redis::Client,
}

impl RedisEventBus {
    /// Create from a connection URL
    ///
    /// # Errors
    /// Fails on an invalid URL. Connectivity is checked on first use.
    pub fn new(url: &str) -> Result<Self, EventBusError> {
        Ok(Self {
            client: redis::Client::open(url)?,
        })
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, event: BusEvent) -> Result<(), EventBusError> {
        let payload = serde_json::to_string(&event)?;
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        for channel in Topic::channels_for(&event) {
            conn.publish::<_, _, ()>(channel, &payload).await?;
        }
        Ok(())
    }

    async fn subscribe(&self, topic: Topic) -> Result<Subscription, EventBusError> {
        let channel = topic.channel();
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&channel).await?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let forwarder = tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(message) = messages.next().await {
                let payload: String = match message.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!(channel = %channel, error = %e, "unreadable event payload");
                        continue;
                    }
                };
                match serde_json::from_str::<BusEvent>(&payload) {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(channel = %channel, error = %e, "malformed event"),
                }
            }
        });

        Ok(Subscription::new(topic, rx, forwarder.abort_handle()))
    }
}
