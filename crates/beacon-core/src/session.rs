//! Per-connection subscription session.
//!
//! A session owns one multiplexed bus subscription for the lifetime of one
//! client connection. The surrounding event loop either awaits
//! [`SubscriptionSession::read_next`] directly (it is cancel-safe, so it can
//! sit in a `tokio::select!` next to the socket) or waits on the
//! [`Readiness`] handle first.

use beacon_bus::{BusError, BusEvent, ChannelKey, EventStream, Message, MessageBus};
use futures_util::stream::{Peek, Peekable, StreamExt};
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The bus connection dropped. The session will not reconnect.
    #[error("Bus connection lost")]
    ConnectionLost,

    /// The bus reported a failure other than a dropped connection.
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}

enum State {
    /// Opened without channels. Never yields anything.
    Inert,
    Open(Peekable<EventStream>),
    Lost,
    Closed,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            Self::Inert => "inert",
            Self::Open(_) => "open",
            Self::Lost => "lost",
            Self::Closed => "closed",
        }
    }
}

/// One connection's subscription to its resolved channels.
pub struct SubscriptionSession {
    channels: Vec<ChannelKey>,
    state: State,
    cancel: CancellationToken,
}

impl SubscriptionSession {
    /// Subscribe to exactly `channels` on `bus`.
    ///
    /// With no channels the bus is not touched and the session is inert.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus refuses the subscription.
    pub async fn open(
        bus: &dyn MessageBus,
        channels: impl IntoIterator<Item = ChannelKey>,
    ) -> Result<Self, BusError> {
        let channels: Vec<ChannelKey> = channels
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let state = if channels.is_empty() {
            debug!("Opened session without channels");
            State::Inert
        } else {
            let events = bus.subscribe(&channels).await?;
            debug!(bus = bus.name(), channels = channels.len(), "Opened subscription session");
            State::Open(events.peekable())
        };

        Ok(Self {
            channels,
            state,
            cancel: CancellationToken::new(),
        })
    }

    /// Channels this session subscribed to.
    #[must_use]
    pub fn channels(&self) -> &[ChannelKey] {
        &self.channels
    }

    /// Whether a live subscription is held.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self.state, State::Open(_)) && !self.cancel.is_cancelled()
    }

    /// Handle that closes this session from another task.
    #[must_use]
    pub fn closer(&self) -> SessionCloser {
        SessionCloser {
            cancel: self.cancel.clone(),
        }
    }

    /// Wait for the next message on any subscribed channel.
    ///
    /// Subscription acknowledgements are consumed here and never returned.
    /// Returns `Ok(None)` straight away when there is no live subscription,
    /// and as soon as the session is closed while waiting.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ConnectionLost`] once the bus connection
    /// drops, and on every call after that.
    pub async fn read_next(&mut self) -> Result<Option<Message>, SessionError> {
        loop {
            if self.cancel.is_cancelled() {
                self.shut();
            }

            let events = match &mut self.state {
                State::Open(events) => events,
                State::Lost => return Err(SessionError::ConnectionLost),
                State::Inert | State::Closed => return Ok(None),
            };

            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => continue,
                event = events.next() => event,
            };

            match event {
                Some(Ok(BusEvent::Message(message))) => {
                    trace!(channel = %message.channel, size = message.payload_size(), "Message received");
                    return Ok(Some(message));
                }
                Some(Ok(ack)) => {
                    trace!(?ack, "Consumed subscription acknowledgement");
                }
                Some(Err(e)) if e.is_connection_lost() => {
                    warn!(error = %e, "Subscription connection lost");
                    self.state = State::Lost;
                    return Err(SessionError::ConnectionLost);
                }
                Some(Err(e)) => return Err(SessionError::Bus(e)),
                None => {
                    warn!("Subscription stream ended");
                    self.state = State::Lost;
                    return Err(SessionError::ConnectionLost);
                }
            }
        }
    }

    /// Readiness handle for the underlying subscription.
    ///
    /// The returned future completes once the next bus event is available,
    /// without consuming it. `None` when no subscription is open.
    pub fn readiness(&mut self) -> Option<Readiness<'_>> {
        if self.cancel.is_cancelled() {
            self.shut();
        }
        match &mut self.state {
            State::Open(events) => Some(Readiness {
                peek: Pin::new(events).peek(),
            }),
            _ => None,
        }
    }

    /// Release the subscription. Calling it again does nothing.
    pub fn close(&mut self) {
        self.cancel.cancel();
        self.shut();
    }

    fn shut(&mut self) {
        if !matches!(self.state, State::Closed) {
            debug!(channels = self.channels.len(), from = self.state.name(), "Closing subscription session");
            self.state = State::Closed;
        }
    }
}

impl Drop for SubscriptionSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for SubscriptionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionSession")
            .field("channels", &self.channels)
            .field("state", &self.state.name())
            .finish()
    }
}

/// Closes a [`SubscriptionSession`] from outside, interrupting a pending
/// [`read_next`](SubscriptionSession::read_next).
///
/// The closer only flags the session. The bus subscription itself is
/// released by the task that owns the session, on its next `read_next` or
/// `readiness` call, or when the session is dropped.
#[derive(Debug, Clone)]
pub struct SessionCloser {
    cancel: CancellationToken,
}

impl SessionCloser {
    /// Request the session to close.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether closing was requested, by this handle or by the owner.
    ///
    /// `true` does not mean the subscription is released yet.
    #[must_use]
    pub fn is_close_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Future returned by [`SubscriptionSession::readiness`].
#[must_use = "futures do nothing unless polled"]
pub struct Readiness<'a> {
    peek: Peek<'a, EventStream>,
}

impl Future for Readiness<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        Pin::new(&mut self.get_mut().peek).poll(cx).map(|_| ())
    }
}

impl fmt::Debug for Readiness<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Readiness").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_bus::MemoryBus;
    use bytes::Bytes;
    use std::time::Duration;

    fn channels(list: &[&str]) -> Vec<ChannelKey> {
        list.iter().map(|c| c.to_string()).collect()
    }

    #[tokio::test]
    async fn test_reads_messages_and_skips_acks() {
        let bus = MemoryBus::new();
        let mut session = SubscriptionSession::open(
            &bus,
            channels(&["ws:user:chatroom:42", "ws:broadcast:chatroom"]),
        )
        .await
        .unwrap();
        assert!(session.is_open());

        bus.publish("ws:broadcast:chatroom", Bytes::from_static(b"hello"))
            .await
            .unwrap();

        let message = session.read_next().await.unwrap().unwrap();
        assert_eq!(message.channel, "ws:broadcast:chatroom");
        assert_eq!(message.payload_str(), Some("hello"));
    }

    #[tokio::test]
    async fn test_preserves_order_within_channel() {
        let bus = MemoryBus::new();
        let mut session = SubscriptionSession::open(&bus, channels(&["room"])).await.unwrap();

        for payload in ["1", "2", "3"] {
            bus.publish("room", Bytes::from(payload)).await.unwrap();
        }
        for expected in ["1", "2", "3"] {
            let message = session.read_next().await.unwrap().unwrap();
            assert_eq!(message.payload_str(), Some(expected));
        }
    }

    #[tokio::test]
    async fn test_empty_session() {
        let bus = MemoryBus::new();
        let mut session = SubscriptionSession::open(&bus, Vec::new()).await.unwrap();

        assert!(!session.is_open());
        assert!(session.channels().is_empty());
        assert!(session.read_next().await.unwrap().is_none());
        assert!(session.readiness().is_none());
        assert_eq!(bus.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_double_close() {
        let bus = MemoryBus::new();
        let mut session = SubscriptionSession::open(&bus, channels(&["room"])).await.unwrap();

        session.close();
        session.close();

        assert!(!session.is_open());
        assert!(session.read_next().await.unwrap().is_none());
        assert!(session.readiness().is_none());
        assert_eq!(bus.publish("room", Bytes::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_closer_interrupts_pending_read() {
        let bus = MemoryBus::new();
        let mut session = SubscriptionSession::open(&bus, channels(&["room"])).await.unwrap();
        let closer = session.closer();

        let reader = tokio::spawn(async move { session.read_next().await });
        tokio::task::yield_now().await;
        closer.close();

        let result = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .expect("read_next was not interrupted")
            .unwrap();
        assert!(matches!(result, Ok(None)));
        assert!(closer.is_close_requested());
    }

    #[tokio::test]
    async fn test_closer_release_happens_on_owner_poll() {
        let bus = MemoryBus::new();
        let mut session = SubscriptionSession::open(&bus, channels(&["room"])).await.unwrap();
        let closer = session.closer();

        closer.close();
        assert!(closer.is_close_requested());
        assert!(!session.is_open());
        assert_eq!(bus.subscriber_count("room"), 1);

        assert!(session.read_next().await.unwrap().is_none());
        assert_eq!(bus.subscriber_count("room"), 0);
        assert_eq!(bus.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_connection_lost() {
        let bus = MemoryBus::new();
        let mut session = SubscriptionSession::open(&bus, channels(&["room"])).await.unwrap();

        bus.shutdown();

        assert!(matches!(session.read_next().await, Err(SessionError::ConnectionLost)));
        assert!(matches!(session.read_next().await, Err(SessionError::ConnectionLost)));
        assert!(session.readiness().is_none());
    }

    #[tokio::test]
    async fn test_readiness_does_not_consume() {
        let bus = MemoryBus::new();
        let mut session = SubscriptionSession::open(&bus, channels(&["room"])).await.unwrap();

        // The subscription acknowledgement is pending before any message.
        bus.publish("room", Bytes::from_static(b"first")).await.unwrap();
        session.readiness().unwrap().await;
        let first = session.read_next().await.unwrap().unwrap();
        assert_eq!(first.payload_str(), Some("first"));

        let ready = tokio::time::timeout(Duration::from_millis(50), session.readiness().unwrap()).await;
        assert!(ready.is_err());

        bus.publish("room", Bytes::from_static(b"second")).await.unwrap();
        session.readiness().unwrap().await;
        let second = session.read_next().await.unwrap().unwrap();
        assert_eq!(second.payload_str(), Some("second"));
    }

    #[tokio::test]
    async fn test_duplicate_channels_subscribe_once() {
        let bus = MemoryBus::new();
        let session = SubscriptionSession::open(&bus, channels(&["room", "room"])).await.unwrap();
        assert_eq!(session.channels(), ["room".to_string()]);
        assert_eq!(bus.subscriber_count("room"), 1);
    }
}
