//! Sandbox engine
//!
//! Picks a backend, screens the commands, runs the composed harness under a
//! hard timeout and reports a [`SandboxResult`].

use crate::config::{
    ExecutionMethod, FailMode, FilesystemMode, IsolationPolicy, SandboxConfig, SandboxPurpose,
};
use crate::error::SandboxError;
use crate::harness::{all_commands, compose_script, default_image, resolve_harness};
use crate::output::capture;
use crate::validate::validate_commands;
use helm_rollback::{RollbackManager, RollbackOptions};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::task::JoinHandle;

/// Default hard timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Default per-stream capture limit
pub const DEFAULT_OUTPUT_LIMIT: usize = 64 * 1024;

const CONTAINER_WORKDIR: &str = "/workspace";

/// Outcome of one sandbox run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxResult {
    /// Exit code; absent when the process was killed
    pub exit_code: Option<i32>,
    /// Tail of stdout
    pub stdout: String,
    /// Tail of stderr
    pub stderr: String,
    /// Wall time
    pub duration_ms: u64,
    /// Backend used
    pub method: ExecutionMethod,
    /// Final verdict after fail mode
    pub success: bool,
    /// Hard timeout fired
    pub timed_out: bool,
    /// Validation and backend warnings
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Output was cut to the capture limit
    pub truncated: bool,
    /// Reproduction harness: the defect showed up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reproduction_successful: Option<bool>,
    /// Verification harness: the fix held
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_verified: Option<bool>,
}

/// Engine-wide settings
#[derive(Debug, Clone)]
pub struct SandboxSettings {
    /// Forced backend; auto-detected when absent
    pub method: Option<ExecutionMethod>,
    /// Container CLI name or path
    pub container_cli: String,
    /// External shell runner
    pub runner_script: Option<PathBuf>,
    /// Timeout used when a request gives none
    pub default_timeout: Duration,
    /// Per-stream capture limit in bytes
    pub output_limit: usize,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            method: None,
            container_cli: "docker".to_string(),
            runner_script: None,
            default_timeout: DEFAULT_TIMEOUT,
            output_limit: DEFAULT_OUTPUT_LIMIT,
        }
    }
}

impl SandboxSettings {
    /// Force a backend
    #[inline]
    #[must_use]
    pub fn with_method(mut self, method: ExecutionMethod) -> Self {
        self.method = Some(method);
        self
    }

    /// Use a different container CLI
    #[inline]
    #[must_use]
    pub fn with_container_cli(mut self, cli: impl Into<String>) -> Self {
        self.container_cli = cli.into();
        self
    }

    /// Configure the shell runner
    #[inline]
    #[must_use]
    pub fn with_runner_script(mut self, path: impl Into<PathBuf>) -> Self {
        self.runner_script = Some(path.into());
        self
    }

    /// Set default timeout
    #[inline]
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Set capture limit
    #[inline]
    #[must_use]
    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output_limit = bytes;
        self
    }
}

struct RawOutcome {
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
    truncated: bool,
    timed_out: bool,
    duration: Duration,
}

/// Runs commands in isolation
#[derive(Debug, Clone, Default)]
pub struct SandboxEngine {
    settings: SandboxSettings,
    rollback: Option<Arc<RollbackManager>>,
}

impl SandboxEngine {
    /// Create engine
    #[must_use]
    pub fn new(settings: SandboxSettings) -> Self {
        Self {
            settings,
            rollback: None,
        }
    }

    /// Protect read-only runs on weak backends with snapshots
    #[must_use]
    pub fn with_rollback(mut self, manager: Arc<RollbackManager>) -> Self {
        self.rollback = Some(manager);
        self
    }

    /// Settings in use
    #[must_use]
    pub fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    /// Backend the next run would use
    ///
    /// # Errors
    /// Fails when a forced backend is not available.
    pub fn detect_method(&self) -> Result<(ExecutionMethod, Option<String>), SandboxError> {
        let runner = self.settings.runner_script.as_deref().filter(|p| p.is_file());
        match self.settings.method {
            Some(ExecutionMethod::Container) => {
                if find_executable(&self.settings.container_cli).is_some() {
                    Ok((ExecutionMethod::Container, None))
                } else {
                    Err(SandboxError::BackendUnavailable(format!(
                        "container runtime '{}' not found",
                        self.settings.container_cli
                    )))
                }
            }
            Some(ExecutionMethod::Shell) => match runner {
                Some(_) => Ok((ExecutionMethod::Shell, None)),
                None => Err(SandboxError::BackendUnavailable(
                    "shell runner script not configured or missing".to_string(),
                )),
            },
            Some(ExecutionMethod::Native) => Ok((ExecutionMethod::Native, None)),
            None => {
                if find_executable(&self.settings.container_cli).is_some() {
                    Ok((ExecutionMethod::Container, None))
                } else if runner.is_some() {
                    Ok((ExecutionMethod::Shell, None))
                } else {
                    Ok((
                        ExecutionMethod::Native,
                        Some("no container runtime or runner script; running natively without isolation".to_string()),
                    ))
                }
            }
        }
    }

    /// Run a sandbox request
    ///
    /// # Errors
    /// Validation violations, a missing command, an unavailable backend, a
    /// spawn failure or a failed snapshot restore. A non-zero exit is a
    /// result, not an error.
    pub async fn run(
        &self,
        config: &SandboxConfig,
        purpose: SandboxPurpose,
    ) -> Result<SandboxResult, SandboxError> {
        let harness = resolve_harness(config).ok_or(SandboxError::NoCommand)?;

        let report = validate_commands(all_commands(&harness));
        if !report.is_allowed() {
            tracing::warn!(violations = ?report.violations, "sandbox run refused");
            return Err(SandboxError::Violation {
                reasons: report.violations,
            });
        }
        let mut warnings = report.warnings;

        let (method, backend_warning) = self.detect_method()?;
        if let Some(warning) = backend_warning {
            tracing::warn!("{warning}");
            warnings.push(warning);
        }

        let policy = config.isolation_policy();
        let repo = config.repo_path.as_deref();
        let timeout = config
            .timeout_ms
            .map_or(self.settings.default_timeout, Duration::from_millis);

        let protection = if policy.filesystem == FilesystemMode::ReadOnly
            && !method.enforces_read_only()
        {
            match (&self.rollback, repo) {
                (Some(manager), Some(repo)) => {
                    let options = RollbackOptions::default()
                        .with_metadata("purpose", serde_json::json!("sandbox-read-only"));
                    Some((Arc::clone(manager), manager.create_rollback_point(repo, options).await?))
                }
                _ => {
                    warnings.push(format!(
                        "read-only filesystem is not enforced by the {} backend",
                        method.as_str()
                    ));
                    None
                }
            }
        } else {
            None
        };

        let script = compose_script(&harness);
        let container_name = format!("helm-sbx-{}", uuid::Uuid::new_v4().simple());
        let command = match method {
            ExecutionMethod::Container => self.container_command(
                config,
                &policy,
                &script,
                &container_name,
                harness.workdir.as_deref(),
                &harness.env,
            ),
            ExecutionMethod::Shell | ExecutionMethod::Native => {
                let mut command = match (method, &self.settings.runner_script) {
                    (ExecutionMethod::Shell, Some(runner)) => {
                        let mut c = Command::new(runner);
                        c.arg(&script)
                            .env("HELM_SANDBOX_NETWORK", policy.network.as_str())
                            .env("HELM_SANDBOX_FILESYSTEM", policy.filesystem.as_str())
                            .env("HELM_SANDBOX_MEMORY_MB", policy.memory_mb.to_string())
                            .env("HELM_SANDBOX_CPUS", policy.cpus.to_string())
                            .env("HELM_SANDBOX_PIDS_LIMIT", policy.pids_limit.to_string())
                            .env("HELM_SANDBOX_TMPFS_MB", policy.tmpfs_mb.to_string());
                        c
                    }
                    _ => {
                        let mut c = Command::new("sh");
                        c.arg("-c").arg(&script);
                        c
                    }
                };
                if let Some(repo) = repo {
                    let dir = harness
                        .workdir
                        .as_deref()
                        .map_or_else(|| repo.to_path_buf(), |w| repo.join(w));
                    command.current_dir(dir);
                }
                command.envs(&harness.env);
                command
            }
        };

        tracing::info!(
            method = method.as_str(),
            timeout_ms = timeout.as_millis() as u64,
            steps = harness.setup.len() + harness.run.len(),
            "sandbox run starting"
        );
        let outcome = self.execute(command, timeout, method, &container_name).await;

        let restored = match protection {
            Some((manager, point)) => manager
                .execute_rollback(&point.id, "sandbox")
                .await
                .map(|_| ()),
            None => Ok(()),
        };
        let outcome = outcome?;
        restored?;

        let result = finish(outcome, method, config.fail_mode, purpose, warnings);
        tracing::info!(
            method = method.as_str(),
            exit_code = ?result.exit_code,
            success = result.success,
            timed_out = result.timed_out,
            duration_ms = result.duration_ms,
            "sandbox run finished"
        );
        Ok(result)
    }

    fn container_command(
        &self,
        config: &SandboxConfig,
        policy: &IsolationPolicy,
        script: &str,
        name: &str,
        workdir: Option<&str>,
        env: &std::collections::BTreeMap<String, String>,
    ) -> Command {
        let mut command = Command::new(&self.settings.container_cli);
        command
            .args(["run", "--rm", "--name", name])
            .args(["--network", policy.network.as_str()])
            .arg(format!("--memory={}m", policy.memory_mb))
            .arg(format!("--cpus={}", policy.cpus))
            .arg(format!("--pids-limit={}", policy.pids_limit))
            .arg("--tmpfs")
            .arg(format!("/tmp:rw,size={}m", policy.tmpfs_mb));

        let read_only = policy.filesystem == FilesystemMode::ReadOnly;
        if read_only {
            command.arg("--read-only");
        }
        if let Some(repo) = &config.repo_path {
            let mode = if read_only { ":ro" } else { "" };
            command
                .arg("-v")
                .arg(format!("{}:{CONTAINER_WORKDIR}{mode}", repo.display()));
        }
        let dir = match workdir {
            Some(w) => format!("{CONTAINER_WORKDIR}/{}", w.trim_start_matches('/')),
            None => CONTAINER_WORKDIR.to_string(),
        };
        command.arg("-w").arg(dir);
        for (key, value) in env {
            command.arg("-e").arg(format!("{key}={value}"));
        }

        let image = config
            .image
            .as_deref()
            .unwrap_or_else(|| default_image(config.language_hint.as_deref()));
        command.arg(image).args(["sh", "-c", script]);
        command
    }

    async fn execute(
        &self,
        mut command: Command,
        timeout: Duration,
        method: ExecutionMethod,
        container_name: &str,
    ) -> Result<RawOutcome, SandboxError> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let program = command.as_std().get_program().to_string_lossy().into_owned();
        let started = Instant::now();
        let mut child = command
            .spawn()
            .map_err(|source| SandboxError::Spawn { program, source })?;

        let limit = self.settings.output_limit;
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            match stdout_pipe {
                Some(pipe) => capture(pipe, limit).await,
                None => (String::new(), false),
            }
        });
        let stderr_task = tokio::spawn(async move {
            match stderr_pipe {
                Some(pipe) => capture(pipe, limit).await,
                None => (String::new(), false),
            }
        });

        let (exit_code, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => (status?.code(), false),
            Err(_) => {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "sandbox run timed out, killing");
                if method == ExecutionMethod::Container {
                    kill_container(&self.settings.container_cli, container_name).await;
                }
                if let Err(e) = child.start_kill() {
                    tracing::debug!(error = %e, "kill after timeout failed");
                }
                if let Err(e) = child.wait().await {
                    tracing::debug!(error = %e, "wait after kill failed");
                }
                (None, true)
            }
        };

        // Grandchildren may keep the pipes open after a kill.
        let grace = if timed_out {
            Duration::from_millis(500)
        } else {
            Duration::from_secs(5)
        };
        let (stdout, stdout_cut) = join_capture(stdout_task, grace).await;
        let (stderr, stderr_cut) = join_capture(stderr_task, grace).await;

        Ok(RawOutcome {
            exit_code,
            stdout,
            stderr,
            truncated: stdout_cut || stderr_cut,
            timed_out,
            duration: started.elapsed(),
        })
    }
}

async fn join_capture(mut task: JoinHandle<(String, bool)>, grace: Duration) -> (String, bool) {
    match tokio::time::timeout(grace, &mut task).await {
        Ok(Ok(captured)) => captured,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "output capture task failed");
            (String::new(), true)
        }
        Err(_) => {
            task.abort();
            (String::new(), true)
        }
    }
}

async fn kill_container(cli: &str, name: &str) {
    let status = Command::new(cli)
        .args(["kill", name])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    if let Err(e) = status {
        tracing::debug!(container = name, error = %e, "container kill failed");
    }
}

fn finish(
    outcome: RawOutcome,
    method: ExecutionMethod,
    fail_mode: FailMode,
    purpose: SandboxPurpose,
    mut warnings: Vec<String>,
) -> SandboxResult {
    let exited_zero = !outcome.timed_out && outcome.exit_code == Some(0);
    let success = if outcome.timed_out {
        false
    } else if exited_zero {
        true
    } else {
        match fail_mode {
            FailMode::Fail => false,
            FailMode::Warn => {
                warnings.push(format!(
                    "command failed with exit code {}; reported as success in warn mode",
                    outcome
                        .exit_code
                        .map_or_else(|| "none".to_string(), |c| c.to_string())
                ));
                true
            }
        }
    };

    let (reproduction_successful, fix_verified) = match purpose {
        SandboxPurpose::General => (None, None),
        SandboxPurpose::Reproduction => (Some(!outcome.timed_out && !exited_zero), None),
        SandboxPurpose::Verification => (None, Some(exited_zero)),
    };

    SandboxResult {
        exit_code: outcome.exit_code,
        stdout: outcome.stdout,
        stderr: outcome.stderr,
        duration_ms: u64::try_from(outcome.duration.as_millis()).unwrap_or(u64::MAX),
        method,
        success,
        timed_out: outcome.timed_out,
        warnings,
        truncated: outcome.truncated,
        reproduction_successful,
        fix_verified,
    }
}

/// Locate an executable by name on `PATH`, or check a path directly
#[must_use]
pub fn find_executable(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(exit_code: Option<i32>, timed_out: bool) -> RawOutcome {
        RawOutcome {
            exit_code,
            stdout: String::new(),
            stderr: String::new(),
            truncated: false,
            timed_out,
            duration: Duration::from_millis(5),
        }
    }

    #[cfg(unix)]
    #[test]
    fn executables_resolve_by_name_or_path() {
        let sh = find_executable("sh").unwrap();
        assert_eq!(find_executable(sh.to_str().unwrap()), Some(sh));
        assert!(find_executable("helm-no-such-binary").is_none());
    }

    #[test]
    fn warn_mode_downgrades_failure() {
        let result = finish(
            outcome(Some(2), false),
            ExecutionMethod::Native,
            FailMode::Warn,
            SandboxPurpose::General,
            Vec::new(),
        );
        assert!(result.success);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn timeout_fails_even_in_warn_mode() {
        let result = finish(
            outcome(None, true),
            ExecutionMethod::Native,
            FailMode::Warn,
            SandboxPurpose::Reproduction,
            Vec::new(),
        );
        assert!(!result.success);
        assert_eq!(result.reproduction_successful, Some(false));
    }

    #[test]
    fn verification_flag() {
        let ok = finish(
            outcome(Some(0), false),
            ExecutionMethod::Native,
            FailMode::Fail,
            SandboxPurpose::Verification,
            Vec::new(),
        );
        assert_eq!(ok.fix_verified, Some(true));
        assert!(ok.reproduction_successful.is_none());

        let failed = finish(
            outcome(Some(1), false),
            ExecutionMethod::Native,
            FailMode::Fail,
            SandboxPurpose::Verification,
            Vec::new(),
        );
        assert!(!failed.success);
        assert_eq!(failed.fix_verified, Some(false));
    }

    #[test]
    fn forced_shell_without_runner_is_unavailable() {
        let engine = SandboxEngine::new(SandboxSettings::default().with_method(ExecutionMethod::Shell));
        assert!(matches!(
            engine.detect_method(),
            Err(SandboxError::BackendUnavailable(_))
        ));
    }

    #[test]
    fn auto_falls_back_to_native_with_warning() {
        let engine = SandboxEngine::new(
            SandboxSettings::default().with_container_cli("helm-no-such-runtime-binary"),
        );
        let (method, warning) = engine.detect_method().unwrap();
        assert_eq!(method, ExecutionMethod::Native);
        assert!(warning.is_some());
    }
}
