//! Distributed lock
//!
//! Locks are keyed, owned and leased: a holder that dies loses the lock when
//! its TTL runs out. Release is owner-checked.

use crate::error::LockError;
use crate::redis_conn::RedisHandle;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

/// Lease-based mutual exclusion across workers
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Try to take `key` for `owner`; false when someone else holds it
    async fn acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, LockError>;

    /// Release `key` if `owner` still holds it; true when released
    async fn release(&self, key: &str, owner: &str) -> Result<bool, LockError>;
}

/// Run `f` while holding `key`
///
/// Contention fails with [`LockError::Contended`] without running `f`. The
/// lock is released after `f` completes, whatever it returned.
///
/// # Errors
/// Contention, lock backend errors, or whatever `f` returns.
pub async fn with_lock<L, T, E, F, Fut>(
    lock: &L,
    key: &str,
    owner: &str,
    ttl: Duration,
    f: F,
) -> Result<T, E>
where
    L: DistributedLock + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<LockError>,
{
    if !lock.acquire(key, owner, ttl).await? {
        return Err(LockError::Contended {
            key: key.to_string(),
        }
        .into());
    }
    tracing::debug!(key, owner, "lock acquired");

    let result = f().await;

    match lock.release(key, owner).await {
        Ok(true) => tracing::debug!(key, owner, "lock released"),
        Ok(false) => tracing::warn!(key, owner, "lock lease expired before release"),
        Err(e) => tracing::warn!(key, owner, error = %e, "lock release failed"),
    }
    result
}

/// In-process lock
#[derive(Debug, Default)]
pub struct MemoryLock {
    held: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryLock {
    /// Create new lock table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DistributedLock for MemoryLock {
    async fn acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, LockError> {
        let now = Instant::now();
        let mut held = self.held.lock();
        if let Some((_, expires)) = held.get(key) {
            if *expires > now {
                return Ok(false);
            }
        }
        held.insert(key.to_string(), (owner.to_string(), now + ttl));
        Ok(true)
    }

    async fn release(&self, key: &str, owner: &str) -> Result<bool, LockError> {
        let mut held = self.held.lock();
        match held.get(key) {
            Some((holder, expires)) if holder == owner && *expires > Instant::now() => {
                held.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Redis lock: `SET NX PX` to take, compare-and-delete script to release
#[derive(Debug, Clone)]
pub struct RedisLock {
    redis: RedisHandle,
    release: redis::Script,
}

impl RedisLock {
    pub(crate) fn new(redis: RedisHandle) -> Self {
        Self {
            redis,
            release: redis::Script::new(RELEASE_SCRIPT),
        }
    }

    /// Connect and verify the server answers
    ///
    /// # Errors
    /// Fails when the URL is invalid or the server does not answer.
    pub async fn connect(url: &str) -> Result<Self, LockError> {
        let redis = RedisHandle::open(url)?;
        redis.ping().await?;
        Ok(Self::new(redis))
    }
}

#[async_trait]
impl DistributedLock for RedisLock {
    async fn acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, LockError> {
        let mut conn = self.redis.connection().await?;
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(owner)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn release(&self, key: &str, owner: &str) -> Result<bool, LockError> {
        let mut conn = self.redis.connection().await?;
        let removed: i64 = self
            .release
            .key(key)
            .arg(owner)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn only_one_owner_at_a_time() {
        let lock = MemoryLock::new();
        assert!(lock.acquire("k", "w1", TTL).await.unwrap());
        assert!(!lock.acquire("k", "w2", TTL).await.unwrap());

        assert!(!lock.release("k", "w2").await.unwrap());
        assert!(lock.release("k", "w1").await.unwrap());
        assert!(lock.acquire("k", "w2", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn expired_lease_can_be_taken() {
        let lock = MemoryLock::new();
        assert!(lock.acquire("k", "w1", Duration::from_millis(10)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(lock.acquire("k", "w2", TTL).await.unwrap());
        assert!(!lock.release("k", "w1").await.unwrap());
    }

    #[tokio::test]
    async fn with_lock_releases_after_error() {
        let lock = MemoryLock::new();
        let result: Result<(), LockError> = with_lock(&lock, "k", "w1", TTL, || async {
            Err(LockError::Backend("boom".into()))
        })
        .await;
        assert!(result.is_err());
        assert!(lock.acquire("k", "w2", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_callers_run_once() {
        let lock = Arc::new(MemoryLock::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(tokio::sync::Barrier::new(2));

        let mut handles = Vec::new();
        for owner in ["w1", "w2"] {
            let (lock, runs, gate) = (lock.clone(), runs.clone(), gate.clone());
            handles.push(tokio::spawn(async move {
                gate.wait().await;
                with_lock(lock.as_ref(), "k", owner, TTL, || async {
                    runs.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, LockError>(())
                })
                .await
            }));
        }

        let mut contended = 0;
        for handle in handles {
            if let Err(LockError::Contended { .. }) = handle.await.unwrap() {
                contended += 1;
            }
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(contended, 1);
    }
}
