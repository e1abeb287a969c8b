//! Message type carried over the bus.

use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::traits::ChannelKey;

/// A message received from (or published to) a bus channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Channel the message travelled on.
    pub channel: ChannelKey,
    /// Raw payload. Framing is left to the producer.
    pub payload: Bytes,
    /// Milliseconds since the epoch when this process saw the message.
    pub received_at: u64,
}

impl Message {
    /// Create a new message.
    #[must_use]
    pub fn new(channel: impl Into<ChannelKey>, payload: impl Into<Bytes>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
            received_at: now_millis(),
        }
    }

    /// Get the payload bytes.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Get the payload size in bytes.
    #[must_use]
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }

    /// Payload as UTF-8, if it is valid text.
    #[must_use]
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = Message::new("ws:broadcast:chatroom", "hello");
        assert_eq!(msg.channel, "ws:broadcast:chatroom");
        assert_eq!(&msg.payload[..], b"hello");
        assert_eq!(msg.payload_size(), 5);
        assert!(msg.received_at > 0);
    }

    #[test]
    fn test_payload_str() {
        let text = Message::new("c", "caf\u{e9}");
        assert_eq!(text.payload_str(), Some("caf\u{e9}"));

        let binary = Message::new("c", vec![0xff, 0xfe]);
        assert!(binary.payload_str().is_none());
    }
}
