//! Redis Streams backend

use crate::error::QueueError;
use crate::queue::{Fields, QueueMessage, TaskQueue};
use async_trait::async_trait;
use redis::streams::{StreamPendingReply, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::time::Duration;

/// Queue over `XADD` / `XREADGROUP` / `XACK`
#[derive(Debug, Clone)]
pub struct RedisQueue {
    client: redis::Client,
}

impl RedisQueue {
    /// Connect and verify the server answers
    ///
    /// # Errors
    /// Fails when the URL is invalid or the server does not answer.
    pub async fn connect(url: &str) -> Result<Self, QueueError> {
        let queue = Self {
            client: redis::Client::open(url)?,
        };
        let mut conn = queue.connection().await?;
        let _pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(queue)
    }

    // Blocking reads stall a multiplexed pipeline, so each call gets its own.
    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl TaskQueue for RedisQueue {
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let created: redis::RedisResult<()> = conn.xgroup_create_mkstream(stream, group, "0").await;
        match created {
            Ok(()) => {
                tracing::info!(stream, group, "consumer group created");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn enqueue(&self, stream: &str, fields: &Fields) -> Result<String, QueueError> {
        let mut conn = self.connection().await?;
        let items: Vec<(&str, &str)> = fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let id: String = conn.xadd(stream, "*", &items).await?;
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
        let mut conn = self.connection().await?;
        let block_ms = usize::try_from(block.as_millis()).unwrap_or(usize::MAX);
        let mut options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count.max(1));
        if block_ms > 0 {
            options = options.block(block_ms);
        }

        let reply: Option<StreamReadReply> = conn
            .xread_options(&[stream], &[">"], &options)
            .await
            .map_err(|e| {
                if e.code() == Some("NOGROUP") {
                    QueueError::NoGroup {
                        stream: stream.to_string(),
                        group: group.to_string(),
                    }
                } else {
                    e.into()
                }
            })?;

        let mut messages = Vec::new();
        for key in reply.map(|r| r.keys).unwrap_or_default() {
            for entry in key.ids {
                let mut fields = Fields::new();
                for (name, value) in &entry.map {
                    let value: String = redis::from_redis_value(value)?;
                    fields.insert(name.clone(), value);
                }
                messages.push(QueueMessage {
                    id: entry.id,
                    fields,
                });
            }
        }
        Ok(messages)
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        conn.xack::<_, _, _, ()>(stream, group, &[id]).await?;
        Ok(())
    }

    async fn pending(&self, stream: &str, group: &str) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let reply: StreamPendingReply = conn.xpending(stream, group).await?;
        Ok(reply.count() as u64)
    }

    async fn len(&self, stream: &str) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        Ok(conn.xlen(stream).await?)
    }
}
