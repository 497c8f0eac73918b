//! Helm Queue - durable work distribution
//!
//! Streams of flat string messages read through consumer groups, with
//! at-least-once delivery and explicit acknowledgement.
//!
//! Backends:
//! - [`MemoryQueue`] for tests and development
//! - [`RedisQueue`] over Redis Streams
//!
//! [`requeue_or_dead_letter`] implements the retry schedule shared by every
//! consumer.

#![warn(unreachable_pub)]

pub mod error;
pub mod queue;
pub mod redis_queue;
pub mod retry;

pub use error::QueueError;
pub use queue::{Fields, MemoryQueue, QueueMessage, TaskQueue, ATTEMPTS_FIELD};
pub use redis_queue::RedisQueue;
pub use retry::{dead_letter, requeue_or_dead_letter, RetryOutcome, RetryPolicy};
