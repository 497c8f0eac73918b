//! Helm Worker - queue consumer for orchestrations, approvals and agent jobs
//!
//! Provides:
//! - Layered configuration (defaults, TOML, `HELM_*` environment)
//! - Job decoding from flat queue messages
//! - Retry, result posting and dead-lettering around each job
//! - External executables as agents, planner and twin builder
//! - Graceful shutdown on cancellation

#![warn(unreachable_pub)]

pub mod config;
pub mod error;
pub mod job;
pub mod process;
pub mod telemetry;
pub mod worker;

pub use config::{AgentCommands, ConfigError, Environment, LogFormat, SandboxSection, WorkerConfig};
pub use error::WorkerError;
pub use job::Job;
pub use process::{ProcessAgent, ProcessCommand, ProcessPlanner, ProcessTwinBuilder};
pub use worker::{Outcome, Services, Worker};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
