//! Bus abstraction traits for Beacon.
//!
//! Every bus implementation provides these, so the routing core never
//! depends on a concrete client.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use std::collections::HashSet;
use thiserror::Error;

use crate::message::Message;

/// A fully derived bus channel name.
pub type ChannelKey = String;

/// Stream of events produced by one multiplexed subscription.
pub type EventStream = BoxStream<'static, Result<BusEvent, BusError>>;

/// Bus errors.
#[derive(Debug, Error)]
pub enum BusError {
    /// The connection to the bus dropped.
    #[error("Bus connection lost")]
    ConnectionLost,

    /// Redis returned an error.
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The bus was shut down.
    #[error("Bus closed")]
    Closed,

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl BusError {
    /// Whether this error means the underlying connection is gone.
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        match self {
            Self::ConnectionLost | Self::Closed => true,
            #[cfg(feature = "redis")]
            Self::Redis(e) => e.is_connection_dropped() || e.is_io_error(),
            Self::Other(_) => false,
        }
    }
}

/// An event read from a subscription.
#[derive(Debug, Clone)]
pub enum BusEvent {
    /// Subscription to `channel` confirmed; `count` is the number of
    /// channels this subscription now listens on.
    Subscribed {
        /// Confirmed channel.
        channel: ChannelKey,
        /// Active channel count after the confirmation.
        count: usize,
    },
    /// A published message.
    Message(Message),
}

impl BusEvent {
    /// Whether this is protocol acknowledgement noise rather than a message.
    #[must_use]
    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Subscribed { .. })
    }
}

/// A shared, externally owned mapping of sets.
///
/// Each operation is a single atomic call against the store, so concurrent
/// writers from different processes need no extra locking.
#[async_trait]
pub trait SetStore: Send + Sync {
    /// Add `member` to the set at `key`.
    ///
    /// Returns `true` if the member was not present before.
    async fn add(&self, key: &str, member: &str) -> Result<bool, BusError>;

    /// Remove `member` from the set at `key`.
    ///
    /// Returns `true` if the member was present. Removing a missing member
    /// is not an error.
    async fn remove(&self, key: &str, member: &str) -> Result<bool, BusError>;

    /// Snapshot of the set at `key`. Missing keys yield an empty set.
    async fn members(&self, key: &str) -> Result<HashSet<String>, BusError>;

    /// Check whether `member` is in the set at `key`.
    async fn contains(&self, key: &str, member: &str) -> Result<bool, BusError> {
        Ok(self.members(key).await?.contains(member))
    }
}

/// A publish/subscribe message bus.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish `payload` on `channel`.
    ///
    /// Returns the number of subscribers that received it.
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<usize, BusError>;

    /// Open one multiplexed subscription over `channels`.
    ///
    /// The stream yields a [`BusEvent::Subscribed`] per channel followed by
    /// messages. It yields an error and ends if the connection drops.
    async fn subscribe(&self, channels: &[ChannelKey]) -> Result<EventStream, BusError>;

    /// Get the bus name (e.g., "memory", "redis").
    fn name(&self) -> &'static str;
}
