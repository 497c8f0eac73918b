//! Helm Rollback - filesystem snapshots for risky changes
//!
//! A rollback point is a full copy of a repository taken before an
//! executor mutates it. Points are:
//! - linked optionally to an approval and a task
//! - restored at most once
//! - discardable without touching the live tree
//!
//! Dependency and build directories (`.git`, `node_modules`, `target`, ...)
//! are neither captured nor removed on restore.

#![warn(unreachable_pub)]

pub mod error;
pub mod manager;
mod tree;

pub use error::RollbackError;
pub use manager::{RollbackManager, RollbackOptions};
pub use tree::DEFAULT_EXCLUDES;
