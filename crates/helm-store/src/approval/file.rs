use super::{purgeable, ApprovalStore};
use crate::error::ApprovalError;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use helm_core::{Approval, ApprovalRequest, Decision};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Approval store keeping one JSON file per approval
///
/// Survives restarts. Writes go through a temp file and rename. Decisions
/// are serialized within one process only; use the redis store when several
/// workers decide concurrently.
#[derive(Debug)]
pub struct FileApprovalStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileApprovalStore {
    /// Open a store in `dir`, creating it when missing
    ///
    /// # Errors
    /// Fails when the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, ApprovalError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Storage directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, id: &str) -> Option<PathBuf> {
        // Ids become file names; refuse anything that could escape the dir.
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then(|| self.dir.join(format!("{id}.json")))
    }

    async fn read(&self, path: &Path) -> Result<Option<Approval>, ApprovalError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, approval: &Approval) -> Result<(), ApprovalError> {
        let path = self
            .path(&approval.id)
            .ok_or_else(|| ApprovalError::NotFound(approval.id.clone()))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(approval)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Approval>, ApprovalError> {
        let mut approvals = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.read(&path).await {
                Ok(Some(approval)) => approvals.push(approval),
                Ok(None) => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable approval"),
            }
        }
        Ok(approvals)
    }
}

#[async_trait]
impl ApprovalStore for FileApprovalStore {
    async fn create(&self, request: ApprovalRequest) -> Result<Approval, ApprovalError> {
        let approval = Approval::from_request(request, Utc::now());
        let _guard = self.write_lock.lock().await;
        self.write(&approval).await?;
        tracing::debug!(approval_id = %approval.id, "approval created");
        Ok(approval)
    }

    async fn get(&self, id: &str) -> Result<Option<Approval>, ApprovalError> {
        let Some(path) = self.path(id) else {
            return Ok(None);
        };
        let _guard = self.write_lock.lock().await;
        let Some(mut approval) = self.read(&path).await? else {
            return Ok(None);
        };
        if approval.expire_if_overdue(Utc::now()) {
            self.write(&approval).await?;
        }
        Ok(Some(approval))
    }

    async fn decide(
        &self,
        id: &str,
        decision: Decision,
        decider: &str,
        reason: Option<&str>,
    ) -> Result<Approval, ApprovalError> {
        let path = self
            .path(id)
            .ok_or_else(|| ApprovalError::NotFound(id.to_string()))?;
        let _guard = self.write_lock.lock().await;
        let mut approval = self
            .read(&path)
            .await?
            .ok_or_else(|| ApprovalError::NotFound(id.to_string()))?;

        let was_pending = approval.is_pending();
        let applied = approval.decide(decision, decider, reason, Utc::now());
        if applied || was_pending {
            self.write(&approval).await?;
        }
        Ok(approval)
    }

    async fn list_pending(&self) -> Result<Vec<Approval>, ApprovalError> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let mut pending = Vec::new();
        for mut approval in self.load_all().await? {
            if approval.expire_if_overdue(now) {
                self.write(&approval).await?;
            } else if approval.is_pending() {
                pending.push(approval);
            }
        }
        pending.sort_by_key(|a| a.requested_at);
        Ok(pending)
    }

    async fn purge_decided(&self, age: Duration) -> Result<usize, ApprovalError> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let cutoff = now - age;
        let mut removed = 0;
        for mut approval in self.load_all().await? {
            approval.expire_if_overdue(now);
            if purgeable(&approval, cutoff) {
                if let Some(path) = self.path(&approval.id) {
                    tokio::fs::remove_file(path).await?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::contract;
    use helm_core::{ApprovalStatus, RiskLevel};

    #[tokio::test]
    async fn contract_holds() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileApprovalStore::open(dir.path()).unwrap();
        contract::first_decision_wins(&store).await;
        contract::overdue_expires_on_read(&store).await;
    }

    #[tokio::test]
    async fn purge_contract() {
        let dir = tempfile::tempdir().unwrap();
        contract::pending_listing_and_purge(&FileApprovalStore::open(dir.path()).unwrap()).await;
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = FileApprovalStore::open(dir.path()).unwrap();
            store
                .create(ApprovalRequest::new("x", RiskLevel::Critical, "y", "z"))
                .await
                .unwrap()
                .id
        };

        let reopened = FileApprovalStore::open(dir.path()).unwrap();
        let approved = reopened.approve(&id, "alice", None).await.unwrap();
        assert_eq!(approved.status, ApprovalStatus::Approved);
        assert_eq!(
            reopened.get(&id).await.unwrap().unwrap().decided_by.as_deref(),
            Some("alice")
        );
    }

    #[tokio::test]
    async fn path_like_ids_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileApprovalStore::open(dir.path()).unwrap();
        assert!(store.get("../etc/passwd").await.unwrap().is_none());
    }
}
