//! Publishing onto resolved channels.

use beacon_bus::{BusError, ChannelKey, MessageBus};
use bytes::Bytes;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

use crate::keys::KeyError;
use crate::resolver::{ChannelResolver, Target};

/// Publishes payloads to a fixed set of channel keys.
#[derive(Clone)]
pub struct Publisher {
    bus: Arc<dyn MessageBus>,
    channels: BTreeSet<ChannelKey>,
}

impl Publisher {
    /// Create a publisher for `channels`, usually a connection's resolved
    /// publish keys.
    #[must_use]
    pub fn new(bus: Arc<dyn MessageBus>, channels: BTreeSet<ChannelKey>) -> Self {
        Self { bus, channels }
    }

    /// Create a publisher for server-side targets in `facility`.
    ///
    /// # Errors
    ///
    /// Returns an error if a target carries an empty identity.
    pub fn for_targets(
        bus: Arc<dyn MessageBus>,
        resolver: &ChannelResolver,
        facility: &str,
        targets: &[Target],
    ) -> Result<Self, KeyError> {
        let channels = targets
            .iter()
            .map(|target| resolver.target_key(facility, target))
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(Self::new(bus, channels))
    }

    /// Channel keys this publisher writes to.
    #[must_use]
    pub fn channels(&self) -> &BTreeSet<ChannelKey> {
        &self.channels
    }

    /// Whether there is nowhere to publish.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Publish `payload` on every channel.
    ///
    /// Returns the total number of receivers across channels. Stops at the
    /// first bus failure.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus rejects a publish.
    pub async fn publish(&self, payload: impl Into<Bytes>) -> Result<usize, BusError> {
        let payload = payload.into();
        let mut receivers = 0;
        for channel in &self.channels {
            receivers += self.bus.publish(channel, payload.clone()).await?;
        }
        trace!(channels = self.channels.len(), receivers, "Published payload");
        Ok(receivers)
    }
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("bus", &self.bus.name())
            .field("channels", &self.channels)
            .finish()
    }
}
