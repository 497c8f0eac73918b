use super::{purgeable, ApprovalStore};
use crate::error::ApprovalError;
use crate::keys::{approval_claim_key, approval_key, approvals_all_key, approvals_pending_key};
use crate::redis_conn::RedisHandle;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use helm_core::{Approval, ApprovalRequest, Decision};
use redis::AsyncCommands;

/// Approval store backed by redis
///
/// Records are JSON strings under `helm:approval:<id>`. A decision is
/// claimed with `SET NX` on `helm:approval:<id>:decision`, so concurrent
/// workers cannot both decide.
#[derive(Debug, Clone)]
pub struct RedisApprovalStore {
    redis: RedisHandle,
}

impl RedisApprovalStore {
    pub(crate) fn new(redis: RedisHandle) -> Self {
        Self { redis }
    }

    /// Connect and verify the server answers
    ///
    /// # Errors
    /// Fails when the URL is invalid or the server does not answer.
    pub async fn connect(url: &str) -> Result<Self, ApprovalError> {
        let redis = RedisHandle::open(url)?;
        redis.ping().await?;
        Ok(Self::new(redis))
    }

    async fn load(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        id: &str,
    ) -> Result<Option<Approval>, ApprovalError> {
        let raw: Option<String> = conn.get(approval_key(id)).await?;
        raw.map(|s| serde_json::from_str(&s).map_err(ApprovalError::from))
            .transpose()
    }

    async fn store(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        approval: &Approval,
    ) -> Result<(), ApprovalError> {
        let payload = serde_json::to_string(approval)?;
        conn.set::<_, _, ()>(approval_key(&approval.id), payload).await?;
        if approval.is_pending() {
            conn.sadd::<_, _, ()>(approvals_pending_key(), &approval.id).await?;
        } else {
            conn.srem::<_, _, ()>(approvals_pending_key(), &approval.id).await?;
        }
        Ok(())
    }

    async fn load_fresh(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        id: &str,
    ) -> Result<Option<Approval>, ApprovalError> {
        let Some(mut approval) = self.load(conn, id).await? else {
            return Ok(None);
        };
        if approval.expire_if_overdue(Utc::now()) {
            self.store(conn, &approval).await?;
        }
        Ok(Some(approval))
    }
}

#[async_trait]
impl ApprovalStore for RedisApprovalStore {
    async fn create(&self, request: ApprovalRequest) -> Result<Approval, ApprovalError> {
        let approval = Approval::from_request(request, Utc::now());
        let mut conn = self.redis.connection().await?;
        self.store(&mut conn, &approval).await?;
        conn.sadd::<_, _, ()>(approvals_all_key(), &approval.id).await?;
        tracing::debug!(approval_id = %approval.id, "approval created");
        Ok(approval)
    }

    async fn get(&self, id: &str) -> Result<Option<Approval>, ApprovalError> {
        let mut conn = self.redis.connection().await?;
        self.load_fresh(&mut conn, id).await
    }

    async fn decide(
        &self,
        id: &str,
        decision: Decision,
        decider: &str,
        reason: Option<&str>,
    ) -> Result<Approval, ApprovalError> {
        let mut conn = self.redis.connection().await?;
        let mut approval = self
            .load_fresh(&mut conn, id)
            .await?
            .ok_or_else(|| ApprovalError::NotFound(id.to_string()))?;
        if !approval.is_pending() {
            return Ok(approval);
        }

        let ttl_secs = (approval.expires_at - Utc::now()).num_seconds().max(1) + 3600;
        let claimed: Option<String> = redis::cmd("SET")
            .arg(approval_claim_key(id))
            .arg(decider)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        if claimed.is_none() {
            tracing::debug!(approval_id = %id, "decision already claimed by another worker");
            return self
                .load(&mut conn, id)
                .await?
                .ok_or_else(|| ApprovalError::NotFound(id.to_string()));
        }

        approval.decide(decision, decider, reason, Utc::now());
        self.store(&mut conn, &approval).await?;
        Ok(approval)
    }

    async fn list_pending(&self) -> Result<Vec<Approval>, ApprovalError> {
        let mut conn = self.redis.connection().await?;
        let ids: Vec<String> = conn.smembers(approvals_pending_key()).await?;
        let mut pending = Vec::new();
        for id in ids {
            match self.load_fresh(&mut conn, &id).await? {
                Some(approval) if approval.is_pending() => pending.push(approval),
                Some(_) => {}
                None => conn.srem::<_, _, ()>(approvals_pending_key(), &id).await?,
            }
        }
        pending.sort_by_key(|a| a.requested_at);
        Ok(pending)
    }

    async fn purge_decided(&self, age: Duration) -> Result<usize, ApprovalError> {
        let mut conn = self.redis.connection().await?;
        let cutoff = Utc::now() - age;
        let ids: Vec<String> = conn.smembers(approvals_all_key()).await?;
        let mut removed = 0;
        for id in ids {
            let (remove, counted) = match self.load_fresh(&mut conn, &id).await? {
                Some(approval) => {
                    let purge = purgeable(&approval, cutoff);
                    (purge, purge)
                }
                None => (true, false),
            };
            if remove {
                conn.del::<_, ()>(approval_key(&id)).await?;
                conn.del::<_, ()>(approval_claim_key(&id)).await?;
                conn.srem::<_, _, ()>(approvals_all_key(), &id).await?;
                conn.srem::<_, _, ()>(approvals_pending_key(), &id).await?;
            }
            if counted {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
