//! Helm Core - shared model for change orchestration
//!
//! Holds everything the other Helm crates agree on:
//! - Plans, subtasks and task results
//! - The ordered result store that survives serialization
//! - Approval and rollback records with their transition rules
//! - The external agent contract and its dispatch registry
//! - The best-effort audit sink
//!
//! # Example
//!
//! ```rust
//! use helm_core::{Plan, RiskLevel, SubTask};
//!
//! let plan = Plan::new(
//!     "rotate the signing key",
//!     "advise, then review",
//!     vec![
//!         SubTask::new("advise", "advisor", "Propose a rotation procedure"),
//!         SubTask::new("review", "reviewer", "Review the procedure").depends_on("advise"),
//!     ],
//!     RiskLevel::High,
//!     false,
//! );
//! assert!(plan.requires_approval);
//! ```

#![warn(unreachable_pub)]

pub mod agent;
pub mod audit;
pub mod error;
pub mod records;
pub mod results;
pub mod types;

pub use agent::{
    Agent, AgentKind, AgentRegistry, AgentRequest, Capabilities, Planner, PlanningInput,
    TwinBuilder,
};
pub use audit::{AuditEvent, AuditSink, BestEffortAudit, TracingAuditSink};
pub use error::{AgentError, AuditError};
pub use records::{
    Approval, ApprovalRequest, ApprovalStatus, Decision, RollbackRecord, RollbackStatus,
    DEFAULT_APPROVAL_TTL_SECS,
};
pub use results::ResultMap;
pub use types::{Plan, Priority, RiskLevel, SandboxPhase, SubTask, TaskResult, TaskStatus};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
