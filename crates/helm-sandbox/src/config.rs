//! Sandbox request surface and isolation policies

use helm_core::SandboxPhase;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// How a non-zero exit is reported
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    /// Non-zero exit fails the run
    #[default]
    Fail,
    /// Non-zero exit is reported as a warning
    Warn,
}

/// Network access inside the sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// No network
    None,
    /// Bridged network
    Bridge,
}

impl NetworkMode {
    /// Name understood by container runtimes
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bridge => "bridge",
        }
    }
}

/// Repository mount mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilesystemMode {
    /// Repository cannot be modified
    ReadOnly,
    /// Repository is writable
    ReadWrite,
}

impl FilesystemMode {
    /// Config name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadOnly => "read-only",
            Self::ReadWrite => "read-write",
        }
    }
}

/// Named isolation preset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationProfile {
    /// No network, read-only repository, tight limits
    #[default]
    Strict,
    /// Bridged network, writable repository, loose limits
    Permissive,
}

/// Resolved isolation knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IsolationPolicy {
    /// Network mode
    pub network: NetworkMode,
    /// Filesystem mode
    pub filesystem: FilesystemMode,
    /// Memory limit in MB
    pub memory_mb: u64,
    /// CPU quota
    pub cpus: f64,
    /// Maximum process count
    pub pids_limit: u32,
    /// Size of the scratch tmpfs in MB
    pub tmpfs_mb: u64,
}

impl IsolationPolicy {
    /// Strict preset
    #[must_use]
    pub fn strict() -> Self {
        Self {
            network: NetworkMode::None,
            filesystem: FilesystemMode::ReadOnly,
            memory_mb: 512,
            cpus: 1.0,
            pids_limit: 256,
            tmpfs_mb: 64,
        }
    }

    /// Permissive preset
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            network: NetworkMode::Bridge,
            filesystem: FilesystemMode::ReadWrite,
            memory_mb: 2048,
            cpus: 2.0,
            pids_limit: 1024,
            tmpfs_mb: 256,
        }
    }

    /// Preset for a profile
    #[must_use]
    pub fn for_profile(profile: IsolationProfile) -> Self {
        match profile {
            IsolationProfile::Strict => Self::strict(),
            IsolationProfile::Permissive => Self::permissive(),
        }
    }

    /// Apply per-request overrides on top
    #[must_use]
    pub fn with_overrides(mut self, overrides: &IsolationOverrides) -> Self {
        if let Some(network) = overrides.network {
            self.network = network;
        }
        if let Some(filesystem) = overrides.filesystem {
            self.filesystem = filesystem;
        }
        if let Some(memory_mb) = overrides.memory_mb {
            self.memory_mb = memory_mb;
        }
        if let Some(cpus) = overrides.cpus {
            self.cpus = cpus;
        }
        if let Some(pids_limit) = overrides.pids_limit {
            self.pids_limit = pids_limit;
        }
        if let Some(tmpfs_mb) = overrides.tmpfs_mb {
            self.tmpfs_mb = tmpfs_mb;
        }
        self
    }
}

impl Default for IsolationPolicy {
    fn default() -> Self {
        Self::strict()
    }
}

/// Optional per-request isolation overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IsolationOverrides {
    /// Network override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkMode>,
    /// Filesystem override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<FilesystemMode>,
    /// Memory override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,
    /// CPU override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<f64>,
    /// Pids override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pids_limit: Option<u32>,
    /// Tmpfs override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmpfs_mb: Option<u64>,
}

/// Setup, run and teardown phases
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarnessCommands {
    /// Commands run before the main step
    #[serde(default)]
    pub setup: Vec<String>,
    /// Main step
    #[serde(default)]
    pub run: Vec<String>,
    /// Commands that always run last
    #[serde(default)]
    pub teardown: Vec<String>,
    /// Extra environment
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory relative to the repository
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
}

impl HarnessCommands {
    /// Harness with only a run phase
    #[must_use]
    pub fn run_only(run: Vec<String>) -> Self {
        Self {
            run,
            ..Self::default()
        }
    }
}

/// A sandbox request
///
/// Field names follow the JSON surface, e.g.
/// `{"repoPath": "/repo", "command": "npm test", "failMode": "warn"}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxConfig {
    /// Repository to run against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_path: Option<PathBuf>,
    /// Single command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Command list, run in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,
    /// Full harness
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub harness_commands: Option<HarnessCommands>,
    /// Hard timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Non-zero exit handling
    #[serde(default)]
    pub fail_mode: FailMode,
    /// Isolation preset
    #[serde(default)]
    pub profile: IsolationProfile,
    /// Isolation overrides
    #[serde(flatten)]
    pub isolation: IsolationOverrides,
    /// Language used to pick a default command and image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_hint: Option<String>,
    /// Container image override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl SandboxConfig {
    /// Config for a repository
    #[must_use]
    pub fn for_repo(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: Some(repo_path.into()),
            ..Self::default()
        }
    }

    /// With a single command
    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// With a harness
    #[must_use]
    pub fn with_harness(mut self, harness: HarnessCommands) -> Self {
        self.harness_commands = Some(harness);
        self
    }

    /// With a timeout
    #[must_use]
    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    /// With a fail mode
    #[must_use]
    pub fn with_fail_mode(mut self, mode: FailMode) -> Self {
        self.fail_mode = mode;
        self
    }

    /// With an isolation preset
    #[must_use]
    pub fn with_profile(mut self, profile: IsolationProfile) -> Self {
        self.profile = profile;
        self
    }

    /// With a filesystem override
    #[must_use]
    pub fn with_filesystem(mut self, mode: FilesystemMode) -> Self {
        self.isolation.filesystem = Some(mode);
        self
    }

    /// Resolved isolation policy
    #[must_use]
    pub fn isolation_policy(&self) -> IsolationPolicy {
        IsolationPolicy::for_profile(self.profile).with_overrides(&self.isolation)
    }
}

/// Backend used for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMethod {
    /// Docker-compatible container runtime
    Container,
    /// External shell-runner script
    Shell,
    /// Plain child process, no isolation
    Native,
}

impl ExecutionMethod {
    /// Name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Container => "container",
            Self::Shell => "shell",
            Self::Native => "native",
        }
    }

    /// Whether a read-only repository can be enforced
    #[must_use]
    pub fn enforces_read_only(self) -> bool {
        matches!(self, Self::Container)
    }
}

impl std::str::FromStr for ExecutionMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "container" | "docker" => Ok(Self::Container),
            "shell" => Ok(Self::Shell),
            "native" => Ok(Self::Native),
            other => Err(format!("unknown execution method: {other}")),
        }
    }
}

/// Why the sandbox is being run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SandboxPurpose {
    /// Plain run
    #[default]
    General,
    /// Expected to fail; failure proves the defect
    Reproduction,
    /// Expected to pass; success proves the fix
    Verification,
}

impl From<SandboxPhase> for SandboxPurpose {
    fn from(phase: SandboxPhase) -> Self {
        match phase {
            SandboxPhase::Pre => Self::Reproduction,
            SandboxPhase::Post => Self::Verification,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn json_surface_with_flattened_overrides() {
        let config: SandboxConfig = serde_json::from_value(serde_json::json!({
            "repoPath": "/repo",
            "harnessCommands": { "setup": ["npm ci"], "run": ["npm test"], "workdir": "app" },
            "timeoutMs": 1500,
            "failMode": "warn",
            "profile": "strict",
            "network": "bridge",
            "memoryMb": 1024
        }))
        .unwrap();

        assert_eq!(config.fail_mode, FailMode::Warn);
        assert_eq!(config.timeout_ms, Some(1500));
        let harness = config.harness_commands.clone().unwrap();
        assert_eq!(harness.setup, vec!["npm ci".to_string()]);
        assert_eq!(harness.workdir.as_deref(), Some("app"));

        let policy = config.isolation_policy();
        assert_eq!(policy.network, NetworkMode::Bridge);
        assert_eq!(policy.filesystem, FilesystemMode::ReadOnly);
        assert_eq!(policy.memory_mb, 1024);
        assert_eq!(policy.pids_limit, 256);
    }

    #[test]
    fn phase_maps_to_purpose() {
        assert_eq!(SandboxPurpose::from(SandboxPhase::Pre), SandboxPurpose::Reproduction);
        assert_eq!(SandboxPurpose::from(SandboxPhase::Post), SandboxPurpose::Verification);
    }

    #[test]
    fn only_containers_enforce_read_only() {
        assert!(ExecutionMethod::Container.enforces_read_only());
        assert!(!ExecutionMethod::Shell.enforces_read_only());
        assert_eq!("docker".parse::<ExecutionMethod>(), Ok(ExecutionMethod::Container));
    }
}
