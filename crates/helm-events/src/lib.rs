//! Helm Events - progress streaming
//!
//! A transient side channel: events are fanned out to whoever listens right
//! now and are never persisted. Backends:
//! - [`BroadcastEventBus`] in-process, over tokio broadcast
//! - [`RedisEventBus`] across processes, over redis pub/sub
//!
//! Stream clients receive [`EventEnvelope`]s as SSE `data:` frames.

#![warn(unreachable_pub)]

pub mod bus;
pub mod error;
pub mod event;
pub mod redis_bus;
pub mod sse;

pub use bus::{BroadcastEventBus, EventBus, Subscription, Topic};
pub use error::EventBusError;
pub use event::{BusEvent, EventEnvelope};
pub use redis_bus::RedisEventBus;
pub use sse::sse_frames;
