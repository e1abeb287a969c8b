//! Redis bus implementation.
//!
//! Commands (`PUBLISH`, `SADD`, `SREM`, `SMEMBERS`, `SISMEMBER`) go through a
//! shared [`ConnectionManager`]. Every subscription gets its own pub/sub
//! connection, since a connection in subscribe mode cannot run commands.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::message::Message;
use crate::traits::{BusError, BusEvent, ChannelKey, EventStream, MessageBus, SetStore};

/// A Redis-backed bus and set store.
#[derive(Clone)]
pub struct RedisBus {
    client: Client,
    connection: ConnectionManager,
}

impl RedisBus {
    /// Connect to Redis.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the server is unreachable.
    pub async fn connect(redis_url: &str) -> Result<Self, BusError> {
        let client = Client::open(redis_url)?;
        let connection = ConnectionManager::new(client.clone()).await?;

        info!(url = %redis_url, "Connected to Redis bus");
        Ok(Self { client, connection })
    }
}

impl std::fmt::Debug for RedisBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBus")
            .field("server", &self.client.get_connection_info().addr)
            .finish()
    }
}

#[async_trait]
impl MessageBus for RedisBus {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<usize, BusError> {
        let mut conn = self.connection.clone();
        let receivers: usize = conn.publish(channel, payload.as_ref()).await?;
        debug!(channel = %channel, receivers, "Published to Redis");
        Ok(receivers)
    }

    async fn subscribe(&self, channels: &[ChannelKey]) -> Result<EventStream, BusError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        let mut acks = Vec::with_capacity(channels.len());

        // The client waits for each SUBSCRIBE reply before returning, so the
        // confirmations are replayed here in order.
        for channel in channels {
            pubsub.subscribe(channel.as_str()).await?;
            acks.push(Ok(BusEvent::Subscribed {
                channel: channel.clone(),
                count: acks.len() + 1,
            }));
        }

        debug!(channels = channels.len(), "Opened Redis subscription");

        let messages = pubsub.into_on_message().map(|msg| {
            Ok(BusEvent::Message(Message::new(
                msg.get_channel_name().to_string(),
                Bytes::copy_from_slice(msg.get_payload_bytes()),
            )))
        });

        // The message stream only ends when the pub/sub connection drops.
        let lost = stream::once(async {
            warn!("Redis subscription connection dropped");
            Err(BusError::ConnectionLost)
        });

        Ok(stream::iter(acks).chain(messages).chain(lost).boxed())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[async_trait]
impl SetStore for RedisBus {
    async fn add(&self, key: &str, member: &str) -> Result<bool, BusError> {
        let mut conn = self.connection.clone();
        let added: usize = conn.sadd(key, member).await?;
        Ok(added > 0)
    }

    async fn remove(&self, key: &str, member: &str) -> Result<bool, BusError> {
        let mut conn = self.connection.clone();
        let removed: usize = conn.srem(key, member).await?;
        Ok(removed > 0)
    }

    async fn members(&self, key: &str) -> Result<HashSet<String>, BusError> {
        let mut conn = self.connection.clone();
        Ok(conn.smembers(key).await?)
    }

    async fn contains(&self, key: &str, member: &str) -> Result<bool, BusError> {
        let mut conn = self.connection.clone();
        Ok(conn.sismember(key, member).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        let err = RedisBus::connect("not-a-url").await.unwrap_err();
        assert!(matches!(err, BusError::Redis(_)));
    }
}
