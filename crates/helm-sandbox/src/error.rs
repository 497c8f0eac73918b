//! Sandbox errors

use helm_rollback::RollbackError;

/// Errors that prevent a sandbox run from producing a result
///
/// A command that runs and exits non-zero is not an error; it is a
/// [`crate::SandboxResult`] with `success == false`.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Validation refused the commands
    #[error("sandbox policy violation: {}", reasons.join("; "))]
    Violation {
        /// Every rule that matched
        reasons: Vec<String>,
    },

    /// No command given and none could be inferred
    #[error("no command to run: give command, commands or harnessCommands, or a languageHint")]
    NoCommand,

    /// Forced backend is not available
    #[error("sandbox backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Process could not be started
    #[error("failed to start {program}: {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Snapshot protection failed
    #[error("repository protection failed: {0}")]
    Rollback(#[from] RollbackError),

    /// Other I/O failure
    #[error("sandbox i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    /// Check if a retry may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Spawn { .. } | Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violation_lists_reasons() {
        let err = SandboxError::Violation {
            reasons: vec!["fork bomb".into(), "world-writable chmod".into()],
        };
        assert_eq!(
            err.to_string(),
            "sandbox policy violation: fork bomb; world-writable chmod"
        );
        assert!(!err.is_retryable());
    }
}
