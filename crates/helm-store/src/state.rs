//! Keyed state storage with TTL
//!
//! Holds serialized orchestration state between a pause and its resume.

use crate::error::StateStoreError;
use crate::redis_conn::RedisHandle;
use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;
use std::time::{Duration, Instant};

/// String values under string keys, each with its own lifetime
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Store `value` under `key` for `ttl`
    async fn save(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StateStoreError>;

    /// Value under `key`, if present and not expired
    async fn load(&self, key: &str) -> Result<Option<String>, StateStoreError>;

    /// Remove `key`
    async fn delete(&self, key: &str) -> Result<(), StateStoreError>;

    /// Remove `key` and return its value; only one caller gets `Some`
    async fn take(&self, key: &str) -> Result<Option<String>, StateStoreError>;
}

/// In-process state store
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: DashMap<String, (String, Instant)>,
}

impl MemoryStateStore {
    /// Create empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn save(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StateStoreError> {
        self.entries
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<String>, StateStoreError> {
        let now = Instant::now();
        let value = self
            .entries
            .get(key)
            .map(|entry| (entry.0.clone(), entry.1 > now));
        match value {
            Some((value, true)) => Ok(Some(value)),
            Some((_, false)) => {
                self.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StateStoreError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<String>, StateStoreError> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .and_then(|(_, (value, expires))| (expires > now).then_some(value)))
    }
}

/// Redis state store using `SET EX`
#[derive(Debug, Clone)]
pub struct RedisStateStore {
    redis: RedisHandle,
}

impl RedisStateStore {
    pub(crate) fn new(redis: RedisHandle) -> Self {
        Self { redis }
    }

    /// Connect and verify the server answers
    ///
    /// # Errors
    /// Fails when the URL is invalid or the server does not answer.
    pub async fn connect(url: &str) -> Result<Self, StateStoreError> {
        let redis = RedisHandle::open(url)?;
        redis.ping().await?;
        Ok(Self::new(redis))
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn save(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StateStoreError> {
        let mut conn = self.redis.connection().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<String>, StateStoreError> {
        let mut conn = self.redis.connection().await?;
        Ok(conn.get(key).await?)
    }

    async fn delete(&self, key: &str) -> Result<(), StateStoreError> {
        let mut conn = self.redis.connection().await?;
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<String>, StateStoreError> {
        let mut conn = self.redis.connection().await?;
        let value: Option<String> = redis::cmd("GETDEL").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_load_delete() {
        let store = MemoryStateStore::new();
        store.save("helm:state:t1", "{}", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.load("helm:state:t1").await.unwrap().as_deref(), Some("{}"));

        store.delete("helm:state:t1").await.unwrap();
        assert!(store.load("helm:state:t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn take_claims_once() {
        let store = MemoryStateStore::new();
        store.save("helm:state:t1", "{}", Duration::from_secs(60)).await.unwrap();

        assert_eq!(store.take("helm:state:t1").await.unwrap().as_deref(), Some("{}"));
        assert!(store.take("helm:state:t1").await.unwrap().is_none());
        assert!(store.load("helm:state:t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_entries_disappear() {
        let store = MemoryStateStore::new();
        store.save("k", "v", Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.load("k").await.unwrap().is_none());
    }
}
