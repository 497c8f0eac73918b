//! Helm Orchestrator - wave-scheduled change orchestration
//!
//! Turns a request into a plan, groups the plan into dependency waves and
//! runs each wave concurrently:
//! - risky agents pass through the sandbox first
//! - executor work waits behind an approval gate on risky plans
//! - executor changes are snapshotted and restored on failure
//! - progress goes out as typed events on a channel
//!
//! A paused [`OrchestrationState`] serializes completely, so it can be
//! resumed by a different process.

#![warn(unreachable_pub)]

pub mod context;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod state;
pub mod waves;

pub use context::{ExecutionPolicy, RunContext, DEFAULT_FORBIDDEN_KEYWORDS};
pub use error::OrchestratorError;
pub use events::{channel, EventReceiver, EventSender, OrchestratorEvent};
pub use orchestrator::{
    OrchestrationRequest, Orchestrator, OrchestratorConfig, DEFAULT_AGENT_TIMEOUT,
};
pub use state::{
    allowed_transitions, validate_transition, LogEntry, LogLevel, OrchestrationState,
    OrchestrationStatus,
};
pub use waves::{compute_waves, WavePlan};
