//! # beacon-bus
//!
//! Bus abstraction layer for the Beacon routing engine.
//!
//! Beacon never owns the pub/sub wire protocol. It only decides which keys to
//! publish on, subscribe to, and store presence under. This crate defines the
//! two seams it talks through:
//!
//! - **MessageBus** - publish payloads and open multiplexed subscriptions
//! - **SetStore** - a shared mapping of sets with atomic add/remove
//!
//! and ships two implementations:
//!
//! - **MemoryBus** - in-process bus for tests, benches and single-node setups
//! - **RedisBus** - Redis `PUBLISH`/`SUBSCRIBE` and `SADD`/`SREM`/`SMEMBERS`
//!
//! ```rust,ignore
//! use beacon_bus::{MessageBus, MemoryBus};
//!
//! let bus = MemoryBus::new();
//! let mut events = bus.subscribe(&["ws:broadcast:lobby".into()]).await?;
//! bus.publish("ws:broadcast:lobby", "hello".into()).await?;
//! ```

pub mod memory;
pub mod message;
pub mod traits;

#[cfg(feature = "redis")]
pub mod redis_bus;

pub use memory::MemoryBus;
pub use message::Message;
pub use traits::{BusError, BusEvent, ChannelKey, EventStream, MessageBus, SetStore};

#[cfg(feature = "redis")]
pub use redis_bus::RedisBus;
