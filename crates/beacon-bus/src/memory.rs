//! In-process bus.
//!
//! One tokio broadcast channel per key plus a map of sets. Behaves like a
//! single Redis instance shared by every task in the process: subscriptions
//! are confirmed per channel, unknown channels swallow publishes, and empty
//! sets disappear.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::stream::{self, Stream, StreamExt};
use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, trace, warn};

use crate::message::Message;
use crate::traits::{BusError, BusEvent, ChannelKey, EventStream, MessageBus, SetStore};

/// Default broadcast channel capacity.
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// An in-process message bus and set store.
#[derive(Debug)]
pub struct MemoryBus {
    /// Broadcast senders indexed by channel key. Shared with open
    /// subscriptions so they can prune on drop.
    channels: Arc<DashMap<ChannelKey, broadcast::Sender<Message>>>,
    /// Sets indexed by key.
    sets: DashMap<String, HashSet<String>>,
    /// Per-channel capacity.
    capacity: usize,
}

impl MemoryBus {
    /// Create a new bus with the default channel capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new bus with a specific channel capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            sets: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Number of channels with at least one live subscription.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of live subscriptions on `channel`.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }

    /// Drop every channel.
    ///
    /// Open subscriptions observe this as a lost connection. Sets survive.
    pub fn shutdown(&self) {
        let dropped = self.channels.len();
        self.channels.clear();
        debug!(channels = dropped, "Memory bus shut down");
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One multiplexed subscription.
///
/// Dropping it releases its receivers, then removes every channel it held
/// that has no receivers left.
struct Subscription {
    events: Option<EventStream>,
    held: Vec<ChannelKey>,
    channels: Arc<DashMap<ChannelKey, broadcast::Sender<Message>>>,
}

impl Stream for Subscription {
    type Item = Result<BusEvent, BusError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.get_mut().events.as_mut() {
            Some(events) => events.poll_next_unpin(cx),
            None => Poll::Ready(None),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        drop(self.events.take());
        for channel in &self.held {
            if self
                .channels
                .remove_if(channel, |_, s| s.receiver_count() == 0)
                .is_some()
            {
                trace!(channel = %channel, "Removed channel after last unsubscribe");
            }
        }
    }
}

/// Turn one broadcast receiver into a stream of bus events.
///
/// A closed sender surfaces once as [`BusError::ConnectionLost`].
fn receiver_stream(channel: ChannelKey, rx: broadcast::Receiver<Message>) -> EventStream {
    stream::unfold(Some(rx), move |state| {
        let channel = channel.clone();
        async move {
            let mut rx = state?;
            loop {
                match rx.recv().await {
                    Ok(message) => return Some((Ok(BusEvent::Message(message)), Some(rx))),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(channel = %channel, skipped, "Subscriber lagged, skipping messages");
                    }
                    Err(RecvError::Closed) => return Some((Err(BusError::ConnectionLost), None)),
                }
            }
        }
    })
    .boxed()
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<usize, BusError> {
        let Some(sender) = self.channels.get(channel) else {
            trace!(channel = %channel, "Publish to channel without subscribers");
            return Ok(0);
        };

        let delivered = sender.send(Message::new(channel, payload)).unwrap_or(0);
        drop(sender);

        if delivered == 0 {
            self.channels
                .remove_if(channel, |_, s| s.receiver_count() == 0);
            debug!(channel = %channel, "Removed channel without subscribers");
        }

        trace!(channel = %channel, recipients = delivered, "Published message");
        Ok(delivered)
    }

    async fn subscribe(&self, channels: &[ChannelKey]) -> Result<EventStream, BusError> {
        let mut seen = HashSet::with_capacity(channels.len());
        let mut acks = Vec::with_capacity(channels.len());
        let mut receivers = Vec::with_capacity(channels.len());

        for channel in channels {
            if !seen.insert(channel.as_str()) {
                continue;
            }

            let rx = self
                .channels
                .entry(channel.clone())
                .or_insert_with(|| {
                    debug!(channel = %channel, "Creating new channel");
                    broadcast::channel(self.capacity).0
                })
                .subscribe();

            receivers.push(receiver_stream(channel.clone(), rx));
            acks.push(Ok(BusEvent::Subscribed {
                channel: channel.clone(),
                count: seen.len(),
            }));
        }

        debug!(channels = receivers.len(), "Opened memory subscription");
        let events = stream::iter(acks)
            .chain(stream::select_all(receivers))
            .boxed();
        Ok(Subscription {
            events: Some(events),
            held: seen.into_iter().map(str::to_owned).collect(),
            channels: Arc::clone(&self.channels),
        }
        .boxed())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl SetStore for MemoryBus {
    async fn add(&self, key: &str, member: &str) -> Result<bool, BusError> {
        Ok(self
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn remove(&self, key: &str, member: &str) -> Result<bool, BusError> {
        let removed = match self.sets.get_mut(key) {
            Some(mut set) => set.remove(member),
            None => return Ok(false),
        };
        self.sets.remove_if(key, |_, set| set.is_empty());
        Ok(removed)
    }

    async fn members(&self, key: &str) -> Result<HashSet<String>, BusError> {
        Ok(self
            .sets
            .get(key)
            .map(|set| set.clone())
            .unwrap_or_default())
    }

    async fn contains(&self, key: &str, member: &str) -> Result<bool, BusError> {
        Ok(self
            .sets
            .get(key)
            .map(|set| set.contains(member))
            .unwrap_or(false))
    }
}
