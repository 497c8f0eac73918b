//! Rollback manager
//!
//! Owns the snapshot directory. Layout under the root:
//! - `snapshots/<id>/` the copied tree
//! - `records/<id>.json` the record, so points survive a restart

use crate::error::RollbackError;
use crate::tree::{clear_tree, copy_tree, DEFAULT_EXCLUDES};
use chrono::Utc;
use helm_core::{RollbackRecord, RollbackStatus};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Options for a new rollback point
#[derive(Debug, Clone, Default)]
pub struct RollbackOptions {
    /// Approval gating the risky operation
    pub approval_id: Option<String>,
    /// Task performing the risky operation
    pub task_id: Option<String>,
    /// Free-form metadata
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl RollbackOptions {
    /// Link to an approval
    #[must_use]
    pub fn for_approval(mut self, approval_id: impl Into<String>) -> Self {
        self.approval_id = Some(approval_id.into());
        self
    }

    /// Link to a task
    #[must_use]
    pub fn for_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Add metadata entry
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Snapshot-based rollback manager
#[derive(Debug)]
pub struct RollbackManager {
    root: PathBuf,
    excludes: Arc<Vec<String>>,
    records: RwLock<HashMap<String, RollbackRecord>>,
    /// Serializes state-changing operations so a point is restored at most once
    op_lock: Mutex<()>,
}

impl RollbackManager {
    /// Open a manager rooted at `root`, loading existing records
    ///
    /// # Errors
    /// Fails when the directories cannot be created or a record is corrupt.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, RollbackError> {
        let root = root.into();
        let records_dir = root.join("records");
        std::fs::create_dir_all(root.join("snapshots"))
            .map_err(|e| RollbackError::io("create snapshot directory", e))?;
        std::fs::create_dir_all(&records_dir)
            .map_err(|e| RollbackError::io("create record directory", e))?;

        let mut records = HashMap::new();
        let entries = std::fs::read_dir(&records_dir)
            .map_err(|e| RollbackError::io("read record directory", e))?;
        for entry in entries {
            let path = entry
                .map_err(|e| RollbackError::io("read record directory", e))?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| RollbackError::io(format!("read {}", path.display()), e))?;
            let record: RollbackRecord = serde_json::from_str(&raw)?;
            records.insert(record.id.clone(), record);
        }

        if !records.is_empty() {
            tracing::info!(count = records.len(), root = %root.display(), "loaded rollback points");
        }

        Ok(Self {
            root,
            excludes: Arc::new(DEFAULT_EXCLUDES.iter().map(|s| (*s).to_string()).collect()),
            records: RwLock::new(records),
            op_lock: Mutex::new(()),
        })
    }

    /// Open under the system temp directory
    ///
    /// # Errors
    /// See [`RollbackManager::open`].
    pub fn in_temp_dir() -> Result<Self, RollbackError> {
        Self::open(std::env::temp_dir().join("helm-snapshots"))
    }

    /// Replace the exclusion list
    #[must_use]
    pub fn with_excludes(mut self, excludes: Vec<String>) -> Self {
        self.excludes = Arc::new(excludes);
        self
    }

    /// Snapshot root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.root.join("records").join(format!("{id}.json"))
    }

    fn persist(&self, record: &RollbackRecord) -> Result<(), RollbackError> {
        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(self.record_path(&record.id), json)
            .map_err(|e| RollbackError::io("write rollback record", e))
    }

    /// Copy the repository aside and record a pending rollback point
    ///
    /// # Errors
    /// Fails when the repository is missing or the copy fails.
    pub async fn create_rollback_point(
        &self,
        repo_path: &Path,
        options: RollbackOptions,
    ) -> Result<RollbackRecord, RollbackError> {
        if !repo_path.is_dir() {
            return Err(RollbackError::RepositoryMissing(repo_path.to_path_buf()));
        }

        let id = Uuid::new_v4().to_string();
        let snapshot_path = self.root.join("snapshots").join(&id);

        let src = repo_path.to_path_buf();
        let dst = snapshot_path.clone();
        let excludes = Arc::clone(&self.excludes);
        let files = tokio::task::spawn_blocking(move || copy_tree(&src, &dst, &excludes))
            .await
            .map_err(|e| RollbackError::Join(e.to_string()))?
            .map_err(|e| RollbackError::io("copy repository into snapshot", e))?;

        let record = RollbackRecord {
            id: id.clone(),
            repo_path: repo_path.to_path_buf(),
            snapshot_path,
            approval_id: options.approval_id,
            task_id: options.task_id,
            status: RollbackStatus::Pending,
            created_at: Utc::now(),
            executed_by: None,
            executed_at: None,
            metadata: options.metadata,
        };
        self.persist(&record)?;
        self.records.write().insert(id.clone(), record.clone());

        tracing::info!(
            rollback_id = %id,
            repo = %repo_path.display(),
            files,
            "created rollback point"
        );
        Ok(record)
    }

    /// Restore the snapshot over the live tree
    ///
    /// # Errors
    /// A completed, expired or unknown record is rejected before the
    /// filesystem is touched.
    pub async fn execute_rollback(
        &self,
        id: &str,
        executor: &str,
    ) -> Result<RollbackRecord, RollbackError> {
        let _guard = self.op_lock.lock().await;

        let record = self
            .get(id)
            .ok_or_else(|| RollbackError::NotFound(id.to_string()))?;
        match record.status {
            RollbackStatus::Pending => {}
            RollbackStatus::Completed => {
                return Err(RollbackError::AlreadyCompleted {
                    id: id.to_string(),
                    executed_by: record.executed_by.clone().unwrap_or_default(),
                    executed_at: record
                        .executed_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_default(),
                })
            }
            RollbackStatus::Expired => return Err(RollbackError::Expired(id.to_string())),
        }
        if !record.snapshot_path.is_dir() {
            return Err(RollbackError::SnapshotMissing {
                id: id.to_string(),
                path: record.snapshot_path.clone(),
            });
        }

        let live = record.repo_path.clone();
        let snapshot = record.snapshot_path.clone();
        let excludes = Arc::clone(&self.excludes);
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            std::fs::create_dir_all(&live)?;
            clear_tree(&live, &excludes)?;
            copy_tree(&snapshot, &live, &excludes)?;
            std::fs::remove_dir_all(&snapshot)
        })
        .await
        .map_err(|e| RollbackError::Join(e.to_string()))?
        .map_err(|e| RollbackError::io("restore snapshot", e))?;

        let mut updated = record;
        updated.status = RollbackStatus::Completed;
        updated.executed_by = Some(executor.to_string());
        updated.executed_at = Some(Utc::now());
        self.persist(&updated)?;
        self.records.write().insert(id.to_string(), updated.clone());

        tracing::warn!(rollback_id = %id, executor, repo = %updated.repo_path.display(), "rollback executed");
        Ok(updated)
    }

    /// Roll back the point linked to an approval
    ///
    /// # Errors
    /// See [`RollbackManager::execute_rollback`].
    pub async fn rollback_by_approval(
        &self,
        approval_id: &str,
        executor: &str,
    ) -> Result<RollbackRecord, RollbackError> {
        let record = self
            .find_by_approval(approval_id)
            .ok_or_else(|| RollbackError::NoRecordForApproval(approval_id.to_string()))?;
        self.execute_rollback(&record.id, executor).await
    }

    /// Discard a point without touching the live tree
    ///
    /// # Errors
    /// Fails for unknown ids.
    pub async fn clear_rollback_point(&self, id: &str) -> Result<RollbackRecord, RollbackError> {
        let _guard = self.op_lock.lock().await;

        let mut record = self
            .get(id)
            .ok_or_else(|| RollbackError::NotFound(id.to_string()))?;
        if record.status == RollbackStatus::Pending {
            record.status = RollbackStatus::Expired;
        }
        record.approval_id = None;

        if record.snapshot_path.exists() {
            let snapshot = record.snapshot_path.clone();
            tokio::task::spawn_blocking(move || std::fs::remove_dir_all(snapshot))
                .await
                .map_err(|e| RollbackError::Join(e.to_string()))?
                .map_err(|e| RollbackError::io("discard snapshot", e))?;
        }

        self.persist(&record)?;
        self.records.write().insert(id.to_string(), record.clone());
        tracing::debug!(rollback_id = %id, "rollback point cleared");
        Ok(record)
    }

    /// Get a record
    #[must_use]
    pub fn get(&self, id: &str) -> Option<RollbackRecord> {
        self.records.read().get(id).cloned()
    }

    /// Record linked to an approval: the oldest pending one, else the oldest
    #[must_use]
    pub fn find_by_approval(&self, approval_id: &str) -> Option<RollbackRecord> {
        self.records
            .read()
            .values()
            .filter(|r| r.approval_id.as_deref() == Some(approval_id))
            .min_by_key(|r| (r.status != RollbackStatus::Pending, r.created_at, r.id.clone()))
            .cloned()
    }

    /// Forget points created more than `age` ago, deleting their snapshots
    /// and records. Returns how many were dropped.
    ///
    /// # Errors
    /// Fails when a snapshot or record file cannot be removed.
    pub async fn purge(&self, age: std::time::Duration) -> Result<usize, RollbackError> {
        let _guard = self.op_lock.lock().await;

        let Some(cutoff) = chrono::Duration::from_std(age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return Ok(0);
        };
        let stale: Vec<RollbackRecord> = self
            .records
            .read()
            .values()
            .filter(|r| r.created_at <= cutoff)
            .cloned()
            .collect();

        for record in &stale {
            let snapshot = record.snapshot_path.clone();
            let record_file = self.record_path(&record.id);
            tokio::task::spawn_blocking(move || -> std::io::Result<()> {
                if snapshot.exists() {
                    std::fs::remove_dir_all(&snapshot)?;
                }
                match std::fs::remove_file(&record_file) {
                    Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
                    _ => Ok(()),
                }
            })
            .await
            .map_err(|e| RollbackError::Join(e.to_string()))?
            .map_err(|e| RollbackError::io("purge rollback point", e))?;
            self.records.write().remove(&record.id);
        }

        if !stale.is_empty() {
            tracing::info!(count = stale.len(), root = %self.root.display(), "purged rollback points");
        }
        Ok(stale.len())
    }

    /// All records, oldest first
    #[must_use]
    pub fn list(&self) -> Vec<RollbackRecord> {
        let mut all: Vec<_> = self.records.read().values().cloned().collect();
        all.sort_by_key(|r| r.created_at);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/lib.rs"), "original").unwrap();
        fs::create_dir_all(dir.path().join("node_modules/dep")).unwrap();
        fs::write(dir.path().join("node_modules/dep/index.js"), "dep").unwrap();
        dir
    }

    #[tokio::test]
    async fn rollback_restores_tree_and_keeps_excluded_dirs() {
        let repo = repo();
        let store = tempfile::tempdir().unwrap();
        let manager = RollbackManager::open(store.path()).unwrap();

        let record = manager
            .create_rollback_point(repo.path(), RollbackOptions::default().for_task("t1"))
            .await
            .unwrap();
        assert_eq!(record.status, RollbackStatus::Pending);
        assert!(record.snapshot_path.join("src/lib.rs").exists());
        assert!(!record.snapshot_path.join("node_modules").exists());

        fs::write(repo.path().join("src/lib.rs"), "broken").unwrap();
        fs::write(repo.path().join("src/new.rs"), "added").unwrap();

        let done = manager.execute_rollback(&record.id, "ops").await.unwrap();

        assert_eq!(done.status, RollbackStatus::Completed);
        assert_eq!(done.executed_by.as_deref(), Some("ops"));
        assert_eq!(fs::read_to_string(repo.path().join("src/lib.rs")).unwrap(), "original");
        assert!(!repo.path().join("src/new.rs").exists());
        assert!(repo.path().join("node_modules/dep/index.js").exists());
        assert!(!record.snapshot_path.exists());
    }

    #[tokio::test]
    async fn second_rollback_is_rejected_without_touching_files() {
        let repo = repo();
        let store = tempfile::tempdir().unwrap();
        let manager = RollbackManager::open(store.path()).unwrap();
        let record = manager
            .create_rollback_point(repo.path(), RollbackOptions::default())
            .await
            .unwrap();

        manager.execute_rollback(&record.id, "ops").await.unwrap();
        fs::write(repo.path().join("src/lib.rs"), "edited after rollback").unwrap();

        let err = manager.execute_rollback(&record.id, "ops").await.unwrap_err();
        assert!(matches!(err, RollbackError::AlreadyCompleted { .. }));
        assert!(err.to_string().contains("already executed by ops"));
        assert_eq!(
            fs::read_to_string(repo.path().join("src/lib.rs")).unwrap(),
            "edited after rollback"
        );
    }

    #[tokio::test]
    async fn clear_expires_point_and_detaches_approval() {
        let repo = repo();
        let store = tempfile::tempdir().unwrap();
        let manager = RollbackManager::open(store.path()).unwrap();
        let record = manager
            .create_rollback_point(repo.path(), RollbackOptions::default().for_approval("a1"))
            .await
            .unwrap();
        fs::write(repo.path().join("src/lib.rs"), "kept").unwrap();

        let cleared = manager.clear_rollback_point(&record.id).await.unwrap();

        assert_eq!(cleared.status, RollbackStatus::Expired);
        assert!(cleared.approval_id.is_none());
        assert!(!record.snapshot_path.exists());
        assert_eq!(fs::read_to_string(repo.path().join("src/lib.rs")).unwrap(), "kept");
        assert!(manager.find_by_approval("a1").is_none());
        assert!(matches!(
            manager.execute_rollback(&record.id, "ops").await,
            Err(RollbackError::Expired(_))
        ));
    }

    #[tokio::test]
    async fn rollback_by_approval_and_reload() {
        let repo = repo();
        let store = tempfile::tempdir().unwrap();
        let id = {
            let manager = RollbackManager::open(store.path()).unwrap();
            manager
                .create_rollback_point(repo.path(), RollbackOptions::default().for_approval("a9"))
                .await
                .unwrap()
                .id
        };

        let reopened = RollbackManager::open(store.path()).unwrap();
        assert_eq!(reopened.list().len(), 1);

        fs::remove_file(repo.path().join("src/lib.rs")).unwrap();
        let done = reopened.rollback_by_approval("a9", "alice").await.unwrap();
        assert_eq!(done.id, id);
        assert!(repo.path().join("src/lib.rs").exists());

        assert!(matches!(
            reopened.rollback_by_approval("missing", "alice").await,
            Err(RollbackError::NoRecordForApproval(_))
        ));
    }

    #[tokio::test]
    async fn missing_repository_is_rejected() {
        let store = tempfile::tempdir().unwrap();
        let manager = RollbackManager::open(store.path()).unwrap();
        let result = manager
            .create_rollback_point(Path::new("/definitely/not/here"), RollbackOptions::default())
            .await;
        assert!(matches!(result, Err(RollbackError::RepositoryMissing(_))));
    }

    #[tokio::test]
    async fn approval_lookup_prefers_the_pending_point() {
        let repo = repo();
        let store = tempfile::tempdir().unwrap();
        let manager = RollbackManager::open(store.path()).unwrap();

        let first = manager
            .create_rollback_point(repo.path(), RollbackOptions::default().for_approval("a").for_task("t1"))
            .await
            .unwrap();
        let second = manager
            .create_rollback_point(repo.path(), RollbackOptions::default().for_approval("a").for_task("t2"))
            .await
            .unwrap();
        manager.execute_rollback(&first.id, "ops").await.unwrap();

        for _ in 0..10 {
            assert_eq!(manager.find_by_approval("a").unwrap().id, second.id);
        }
        let done = manager.rollback_by_approval("a", "ops").await.unwrap();
        assert_eq!(done.id, second.id);
        assert_eq!(done.status, RollbackStatus::Completed);

        // Nothing pending left: the oldest record is reported
        assert_eq!(manager.find_by_approval("a").unwrap().id, first.id);
    }

    #[tokio::test]
    async fn purge_drops_old_points_and_their_snapshots() {
        let repo = repo();
        let store = tempfile::tempdir().unwrap();
        let manager = RollbackManager::open(store.path()).unwrap();
        let kept = manager
            .create_rollback_point(repo.path(), RollbackOptions::default())
            .await
            .unwrap();
        let rolled_back = manager
            .create_rollback_point(repo.path(), RollbackOptions::default())
            .await
            .unwrap();
        manager.execute_rollback(&rolled_back.id, "ops").await.unwrap();

        assert_eq!(manager.purge(std::time::Duration::from_secs(3600)).await.unwrap(), 0);
        assert_eq!(manager.list().len(), 2);

        assert_eq!(manager.purge(std::time::Duration::ZERO).await.unwrap(), 2);
        assert!(manager.list().is_empty());
        assert!(!kept.snapshot_path.exists());

        let reopened = RollbackManager::open(store.path()).unwrap();
        assert!(reopened.list().is_empty());
    }
}
