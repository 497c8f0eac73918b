//! Rollback errors

use std::path::PathBuf;

/// Errors raised by the rollback manager
#[derive(Debug, thiserror::Error)]
pub enum RollbackError {
    /// No record with this id
    #[error("rollback point not found: {0}")]
    NotFound(String),

    /// No record linked to this approval
    #[error("no rollback point linked to approval {0}")]
    NoRecordForApproval(String),

    /// Record was already rolled back
    #[error("rollback point {id} was already executed by {executed_by} at {executed_at}")]
    AlreadyCompleted {
        /// Record id
        id: String,
        /// Previous executor
        executed_by: String,
        /// Previous execution time
        executed_at: String,
    },

    /// Record was cleared
    #[error("rollback point {0} has expired and its snapshot was discarded")]
    Expired(String),

    /// Snapshot directory is gone
    #[error("snapshot for rollback point {id} is missing at {path}")]
    SnapshotMissing {
        /// Record id
        id: String,
        /// Expected snapshot location
        path: PathBuf,
    },

    /// Repository to snapshot does not exist
    #[error("repository path does not exist: {0}")]
    RepositoryMissing(PathBuf),

    /// Filesystem failure
    #[error("{context}: {source}")]
    Io {
        /// What was being done
        context: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Record could not be (de)serialized
    #[error("record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Blocking task panicked or was cancelled
    #[error("filesystem task failed: {0}")]
    Join(String),
}

impl RollbackError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}
