//! Shared redis client handle

use redis::aio::MultiplexedConnection;
use redis::RedisResult;

/// Cloneable handle; connections are opened per operation
#[derive(Debug, Clone)]
pub(crate) struct RedisHandle {
    client: redis::Client,
}

impl RedisHandle {
    pub(crate) fn open(url: &str) -> RedisResult<Self> {
        Ok(Self {
            client: redis::Client::open(url)?,
        })
    }

    pub(crate) async fn connection(&self) -> RedisResult<MultiplexedConnection> {
        self.client.get_multiplexed_async_connection().await
    }

    pub(crate) async fn ping(&self) -> RedisResult<()> {
        let mut conn = self.connection().await?;
        let _pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
