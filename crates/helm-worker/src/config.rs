//! Worker configuration
//!
//! # Load Order
//!
//! 1. Default values
//! 2. TOML file, when a path is given
//! 3. Environment variables (`HELM_*`)
//!
//! Each layer overrides the previous.

use helm_orchestrator::OrchestratorConfig;
use helm_queue::RetryPolicy;
use helm_sandbox::{ExecutionMethod, SandboxSettings, DEFAULT_OUTPUT_LIMIT};
use helm_store::StoreSettings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Deployment environment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development; in-process backends allowed
    #[default]
    Development,
    /// Fail closed on missing durable backends
    Production,
}

impl Environment {
    /// Parse `development`/`dev`/`production`/`prod`
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Sandbox engine section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSection {
    /// Forced backend; auto-detected when absent
    pub method: Option<ExecutionMethod>,
    /// Container CLI
    pub container_cli: String,
    /// External runner script for the shell backend
    pub runner_script: Option<PathBuf>,
    /// Default run timeout
    pub timeout_secs: u64,
    /// Per-stream capture limit in bytes
    pub output_limit: usize,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            method: None,
            container_cli: "docker".to_string(),
            runner_script: None,
            timeout_secs: 300,
            output_limit: DEFAULT_OUTPUT_LIMIT,
        }
    }
}

/// External executables backing the planner, twin builder and agents
///
/// Each command is run through `sh -c`, receives JSON on stdin and must
/// print JSON on stdout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentCommands {
    /// Planner command
    pub planner: Option<String>,
    /// Twin builder command
    pub twin_builder: Option<String>,
    /// Agent commands keyed by agent name
    pub commands: BTreeMap<String, String>,
}

/// Worker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Deployment environment
    pub environment: Environment,
    /// Consumer name within the group; also the lock owner
    pub consumer_name: String,
    /// Consumer group
    pub consumer_group: String,
    /// Incoming jobs
    pub tasks_stream: String,
    /// Results and progress events
    pub results_stream: String,
    /// Permanently failed jobs
    pub dead_letter_stream: String,
    /// Entries read per poll
    pub batch_size: usize,
    /// Poll block timeout
    pub block_ms: u64,
    /// Attempts per job before giving up
    pub max_retries: u32,
    /// Linear backoff step between attempts
    pub retry_backoff_ms: u64,
    /// Bound on waiting for in-flight jobs at shutdown
    pub shutdown_grace_secs: u64,
    /// Lifetime of paused orchestration state
    pub state_ttl_secs: u64,
    /// Approval lock lease
    pub lock_ttl_secs: u64,
    /// Bound on each agent, planner or twin call
    pub agent_timeout_secs: u64,
    /// Refuse cyclic plans
    pub strict_dependencies: bool,
    /// Redis for queue, stores and events; in-process when absent
    pub redis_url: Option<String>,
    /// File approval store directory, used without redis
    pub approval_dir: Option<PathBuf>,
    /// Rollback snapshot directory; rollback disabled when absent
    pub snapshot_dir: Option<PathBuf>,
    /// Age after which rollback points and their snapshots are purged
    pub snapshot_retention_secs: u64,
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
    /// Sandbox engine
    pub sandbox: SandboxSection,
    /// External agent executables
    pub agents: AgentCommands,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            consumer_name: "helm-worker".to_string(),
            consumer_group: "helm-workers".to_string(),
            tasks_stream: "helm:tasks".to_string(),
            results_stream: "helm:results".to_string(),
            dead_letter_stream: "helm:dlq".to_string(),
            batch_size: 10,
            block_ms: 5000,
            max_retries: 3,
            retry_backoff_ms: 1000,
            shutdown_grace_secs: 30,
            state_ttl_secs: 24 * 60 * 60,
            lock_ttl_secs: 60,
            agent_timeout_secs: 300,
            strict_dependencies: false,
            redis_url: None,
            approval_dir: None,
            snapshot_dir: None,
            snapshot_retention_secs: 7 * 24 * 60 * 60,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            sandbox: SandboxSection::default(),
            agents: AgentCommands::default(),
        }
    }
}

impl WorkerConfig {
    /// Defaults, then `path` when given, then `HELM_*` variables
    ///
    /// # Errors
    /// Unreadable or malformed file, bad environment values, or a config
    /// that fails [`WorkerConfig::validate`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file over the defaults
    ///
    /// # Errors
    /// Unreadable or malformed file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        let config = toml::from_str(&text).map_err(|e| ConfigError::parse_toml(path, e))?;
        tracing::debug!(path = %path.display(), "loaded worker config");
        Ok(config)
    }

    /// Apply `HELM_*` overrides read through `lookup`
    ///
    /// `HELM_AGENT_<NAME>_CMD` sets the command for agent `<name>`
    /// (underscores become dashes, e.g. `HELM_AGENT_IMPACT_ANALYSIS_CMD`).
    ///
    /// # Errors
    /// A variable holds a value of the wrong shape.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = lookup("HELM_ENV") {
            self.environment = Environment::parse(&v)
                .ok_or_else(|| ConfigError::invalid_env_var("HELM_ENV", "expected development or production"))?;
        }
        set_string(&lookup, "HELM_CONSUMER_NAME", &mut self.consumer_name);
        set_string(&lookup, "HELM_CONSUMER_GROUP", &mut self.consumer_group);
        set_string(&lookup, "HELM_TASKS_STREAM", &mut self.tasks_stream);
        set_string(&lookup, "HELM_RESULTS_STREAM", &mut self.results_stream);
        set_string(&lookup, "HELM_DLQ_STREAM", &mut self.dead_letter_stream);
        set_string(&lookup, "HELM_LOG_LEVEL", &mut self.log_level);

        set_parsed(&lookup, "HELM_BATCH_SIZE", &mut self.batch_size)?;
        set_parsed(&lookup, "HELM_BLOCK_MS", &mut self.block_ms)?;
        set_parsed(&lookup, "HELM_MAX_RETRIES", &mut self.max_retries)?;
        set_parsed(&lookup, "HELM_RETRY_BACKOFF_MS", &mut self.retry_backoff_ms)?;
        set_parsed(&lookup, "HELM_SHUTDOWN_GRACE_SECS", &mut self.shutdown_grace_secs)?;
        set_parsed(&lookup, "HELM_STATE_TTL_SECS", &mut self.state_ttl_secs)?;
        set_parsed(&lookup, "HELM_LOCK_TTL_SECS", &mut self.lock_ttl_secs)?;
        set_parsed(&lookup, "HELM_AGENT_TIMEOUT_SECS", &mut self.agent_timeout_secs)?;
        set_parsed(&lookup, "HELM_SNAPSHOT_RETENTION_SECS", &mut self.snapshot_retention_secs)?;
        set_parsed(&lookup, "HELM_SANDBOX_TIMEOUT_SECS", &mut self.sandbox.timeout_secs)?;

        if let Some(v) = lookup("HELM_STRICT_DEPENDENCIES") {
            self.strict_dependencies = parse_bool(&v)
                .ok_or_else(|| ConfigError::invalid_env_var("HELM_STRICT_DEPENDENCIES", "expected bool"))?;
        }
        if let Some(v) = lookup("HELM_LOG_FORMAT") {
            self.log_format = match v.trim().to_ascii_lowercase().as_str() {
                "text" => LogFormat::Text,
                "json" => LogFormat::Json,
                _ => return Err(ConfigError::invalid_env_var("HELM_LOG_FORMAT", "expected text or json")),
            };
        }
        if let Some(v) = lookup("HELM_SANDBOX_METHOD") {
            self.sandbox.method = Some(
                v.parse()
                    .map_err(|e: String| ConfigError::invalid_env_var("HELM_SANDBOX_METHOD", e))?,
            );
        }
        if let Some(v) = lookup("HELM_REDIS_URL") {
            self.redis_url = Some(v);
        }
        if let Some(v) = lookup("HELM_APPROVAL_DIR") {
            self.approval_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("HELM_SNAPSHOT_DIR") {
            self.snapshot_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("HELM_PLANNER_CMD") {
            self.agents.planner = Some(v);
        }
        if let Some(v) = lookup("HELM_TWIN_BUILDER_CMD") {
            self.agents.twin_builder = Some(v);
        }
        for kind in helm_core::AgentKind::ALL {
            let var = format!(
                "HELM_AGENT_{}_CMD",
                kind.as_str().replace('-', "_").to_ascii_uppercase()
            );
            if let Some(v) = lookup(&var) {
                self.agents.commands.insert(kind.as_str().to_string(), v);
            }
        }
        Ok(())
    }

    /// Check cross-field rules
    ///
    /// # Errors
    /// Empty identities or streams, a zero batch size, or production
    /// without redis.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("consumer_name", &self.consumer_name),
            ("consumer_group", &self.consumer_group),
            ("tasks_stream", &self.tasks_stream),
            ("results_stream", &self.results_stream),
            ("dead_letter_stream", &self.dead_letter_stream),
        ];
        if let Some((field, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("{field} must not be empty")));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::Invalid("max_retries must be at least 1".into()));
        }
        if self.is_production() && self.redis_url.is_none() {
            return Err(ConfigError::Invalid(
                "production requires redis_url for the queue, stores and events".into(),
            ));
        }
        Ok(())
    }

    /// Whether fail-closed rules apply
    #[must_use]
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// With consumer name
    #[must_use]
    pub fn with_consumer_name(mut self, name: impl Into<String>) -> Self {
        self.consumer_name = name.into();
        self
    }

    /// With retry attempts and backoff step
    #[must_use]
    pub fn with_retries(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With agent timeout
    #[must_use]
    pub fn with_agent_timeout(mut self, timeout: Duration) -> Self {
        self.agent_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// With snapshot directory
    #[must_use]
    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = Some(dir.into());
        self
    }

    /// Poll block timeout
    #[must_use]
    pub fn block(&self) -> Duration {
        Duration::from_millis(self.block_ms)
    }

    /// Backoff before attempt `attempt + 1` (linear)
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(u64::from(attempt)))
    }

    /// Shutdown grace period
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Paused state lifetime
    #[must_use]
    pub fn state_ttl(&self) -> Duration {
        Duration::from_secs(self.state_ttl_secs)
    }

    /// Rollback point retention
    #[must_use]
    pub fn snapshot_retention(&self) -> Duration {
        Duration::from_secs(self.snapshot_retention_secs)
    }

    /// Approval lock lease
    #[must_use]
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    /// Agent call bound
    #[must_use]
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }

    /// Retry policy mirrored onto queue-level redelivery
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        let step = Duration::from_millis(self.retry_backoff_ms);
        RetryPolicy::new(self.max_retries, step, step.saturating_mul(self.max_retries))
    }

    /// Orchestrator tunables
    #[must_use]
    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig::default()
            .with_agent_timeout(self.agent_timeout())
            .with_strict_dependencies(self.strict_dependencies)
            .with_actor(self.consumer_name.clone())
    }

    /// Store backends
    #[must_use]
    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            redis_url: self.redis_url.clone(),
            approval_dir: self.approval_dir.clone(),
            production: self.is_production(),
        }
    }

    /// Sandbox engine settings
    #[must_use]
    pub fn sandbox_settings(&self) -> SandboxSettings {
        let mut settings = SandboxSettings::default()
            .with_container_cli(self.sandbox.container_cli.clone())
            .with_default_timeout(Duration::from_secs(self.sandbox.timeout_secs))
            .with_output_limit(self.sandbox.output_limit);
        if let Some(method) = self.sandbox.method {
            settings = settings.with_method(method);
        }
        if let Some(script) = &self.sandbox.runner_script {
            settings = settings.with_runner_script(script.clone());
        }
        settings
    }
}

fn set_string(lookup: &impl Fn(&str) -> Option<String>, name: &str, field: &mut String) {
    if let Some(v) = lookup(name) {
        *field = v;
    }
}

fn set_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    field: &mut T,
) -> Result<(), ConfigError> {
    if let Some(v) = lookup(name) {
        *field = v
            .trim()
            .parse()
            .map_err(|_| ConfigError::invalid_env_var(name, "expected a non-negative integer"))?;
    }
    Ok(())
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        /// File path
        path: PathBuf,
        /// Cause
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("failed to parse config file '{path}': {source}")]
    ParseToml {
        /// File path
        path: PathBuf,
        /// Cause
        #[source]
        source: toml::de::Error,
    },

    /// Environment variable holds a bad value
    #[error("invalid value for environment variable '{name}': {message}")]
    InvalidEnvVar {
        /// Variable name
        name: String,
        /// What was expected
        message: String,
    },

    /// Values are individually fine but do not fit together
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Read file error
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadFile {
            path: path.into(),
            source,
        }
    }

    /// Parse error
    pub fn parse_toml(path: impl Into<PathBuf>, source: toml::de::Error) -> Self {
        Self::ParseToml {
            path: path.into(),
            source,
        }
    }

    /// Invalid env var error
    pub fn invalid_env_var(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEnvVar {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = WorkerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.state_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.lock_ttl(), Duration::from_secs(60));
        assert_eq!(config.snapshot_retention(), Duration::from_secs(604_800));
        assert_eq!(config.orchestrator().actor, "helm-worker");
    }

    #[test]
    fn file_layer_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.toml");
        std::fs::write(
            &path,
            r#"
consumer_name = "worker-7"
batch_size = 4
log_format = "json"

[sandbox]
method = "native"

[agents]
planner = "plan.sh"

[agents.commands]
advisor = "advise.sh"
"#,
        )
        .unwrap();

        let config = WorkerConfig::from_file(&path).unwrap();
        assert_eq!(config.consumer_name, "worker-7");
        assert_eq!(config.batch_size, 4);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.sandbox.method, Some(ExecutionMethod::Native));
        assert_eq!(config.agents.planner.as_deref(), Some("plan.sh"));
        assert_eq!(config.agents.commands["advisor"], "advise.sh");
        assert_eq!(config.tasks_stream, "helm:tasks");
    }

    #[test]
    fn malformed_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "batch_size = \"many\"").unwrap();

        let err = WorkerConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseToml { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn env_layer_overrides() {
        let mut config = WorkerConfig::default();
        config
            .apply_env(env(&[
                ("HELM_CONSUMER_NAME", "w2"),
                ("HELM_MAX_RETRIES", "5"),
                ("HELM_STRICT_DEPENDENCIES", "yes"),
                ("HELM_AGENT_IMPACT_ANALYSIS_CMD", "impact.sh"),
                ("HELM_REDIS_URL", "redis://localhost:6379"),
                ("HELM_SNAPSHOT_RETENTION_SECS", "3600"),
            ]))
            .unwrap();

        assert_eq!(config.consumer_name, "w2");
        assert_eq!(config.max_retries, 5);
        assert!(config.strict_dependencies);
        assert_eq!(config.agents.commands["impact-analysis"], "impact.sh");
        assert_eq!(config.redis_url.as_deref(), Some("redis://localhost:6379"));
        assert_eq!(config.snapshot_retention(), Duration::from_secs(3600));
    }

    #[test]
    fn bad_env_value_is_rejected() {
        let mut config = WorkerConfig::default();
        let err = config.apply_env(env(&[("HELM_BATCH_SIZE", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar { ref name, .. } if name == "HELM_BATCH_SIZE"));
    }

    #[test]
    fn production_requires_redis() {
        let mut config = WorkerConfig::default();
        config.apply_env(env(&[("HELM_ENV", "prod")])).unwrap();
        assert!(config.is_production());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.redis_url = Some("redis://localhost".into());
        config.validate().unwrap();
    }

    #[test]
    fn empty_consumer_name_is_rejected() {
        let config = WorkerConfig::default().with_consumer_name("  ");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("consumer_name"));
    }

    #[test]
    fn backoff_is_linear() {
        let config = WorkerConfig::default().with_retries(3, Duration::from_millis(200));
        assert_eq!(config.backoff(1), Duration::from_millis(200));
        assert_eq!(config.backoff(2), Duration::from_millis(400));
    }
}
