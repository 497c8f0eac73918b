//! Helm Store - shared state between workers
//!
//! Provides:
//! - the approval store (memory, JSON directory, redis)
//! - a lease-based distributed lock with an always-release helper
//! - keyed state storage with TTL for paused orchestrations
//! - backend selection that fails closed in production

#![warn(unreachable_pub)]

pub mod approval;
pub mod error;
pub mod keys;
pub mod lock;
pub mod open;
mod redis_conn;
pub mod state;

pub use approval::{ApprovalStore, FileApprovalStore, MemoryApprovalStore, RedisApprovalStore};
pub use error::{ApprovalError, LockError, OpenError, StateStoreError};
pub use keys::{approval_lock_key, state_key};
pub use lock::{with_lock, DistributedLock, MemoryLock, RedisLock};
pub use open::{open_approval_store, StoreSettings, Stores};
pub use state::{MemoryStateStore, RedisStateStore, StateStore};
