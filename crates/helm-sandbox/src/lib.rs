//! Helm Sandbox - isolated command execution
//!
//! Runs repository commands (tests, builds, reproduction scripts) behind:
//! - pre-execution screening of dangerous commands
//! - a container, shell-runner or native backend
//! - a hard timeout with kill
//! - bounded output capture
//!
//! Harnesses are composed as setup, run and teardown; teardown always runs
//! and the run's exit status is what the caller sees.
//!
//! # Example
//!
//! ```rust,no_run
//! use helm_sandbox::{SandboxConfig, SandboxEngine, SandboxPurpose, SandboxSettings};
//!
//! # async fn demo() -> Result<(), helm_sandbox::SandboxError> {
//! let engine = SandboxEngine::new(SandboxSettings::default());
//! let config = SandboxConfig::for_repo("/srv/repo").with_command("npm test");
//! let result = engine.run(&config, SandboxPurpose::General).await?;
//! println!("exit {:?} via {}", result.exit_code, result.method.as_str());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod config;
pub mod engine;
pub mod error;
pub mod harness;
mod output;
pub mod validate;

pub use config::{
    ExecutionMethod, FailMode, FilesystemMode, HarnessCommands, IsolationOverrides,
    IsolationPolicy, IsolationProfile, NetworkMode, SandboxConfig, SandboxPurpose,
};
pub use engine::{
    find_executable, SandboxEngine, SandboxResult, SandboxSettings, DEFAULT_OUTPUT_LIMIT,
    DEFAULT_TIMEOUT,
};
pub use error::SandboxError;
pub use harness::{compose_script, default_command, resolve_harness};
pub use validate::{validate_commands, ValidationReport};
