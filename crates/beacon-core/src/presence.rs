//! Presence tracking for Beacon.
//!
//! Presence records which authenticated users are connected to a facility.
//! The sets live in the shared store, not in process memory, so every server
//! instance on the same bus sees the same members.

use beacon_bus::{BusError, SetStore};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::identity::Identity;
use crate::keys::presence_key;

/// Online-subscriber tracker, one set per facility.
///
/// Set semantics: a user connected twice is one member, and one disconnect
/// removes them.
#[derive(Clone)]
pub struct PresenceTracker {
    store: Arc<dyn SetStore>,
    prefix: String,
}

impl PresenceTracker {
    /// Create a tracker over `store` using the key `prefix`.
    #[must_use]
    pub fn new(store: Arc<dyn SetStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    /// Key prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Record that `identity` connected to `facility`.
    ///
    /// Does nothing for connections without a session or user id. Returns
    /// `true` if the user was not already online.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached.
    pub async fn connect(&self, facility: &str, identity: &Identity) -> Result<bool, BusError> {
        let Some(user_id) = identity.authenticated_user() else {
            trace!(facility = %facility, "Presence: skipping unauthenticated connect");
            return Ok(false);
        };

        let added = self
            .store
            .add(&presence_key(&self.prefix, facility), user_id)
            .await?;
        debug!(facility = %facility, user = %user_id, new = added, "Presence: user connected");
        Ok(added)
    }

    /// Record that `identity` disconnected from `facility`.
    ///
    /// Same no-op conditions as [`connect`](Self::connect). Removing a user
    /// who is not online is not an error. Returns `true` if the user was
    /// removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached.
    pub async fn disconnect(&self, facility: &str, identity: &Identity) -> Result<bool, BusError> {
        let Some(user_id) = identity.authenticated_user() else {
            trace!(facility = %facility, "Presence: skipping unauthenticated disconnect");
            return Ok(false);
        };

        let removed = self
            .store
            .remove(&presence_key(&self.prefix, facility), user_id)
            .await?;
        debug!(facility = %facility, user = %user_id, removed, "Presence: user disconnected");
        Ok(removed)
    }

    /// Snapshot of users online in `facility`, unordered.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached.
    pub async fn online_identities(&self, facility: &str) -> Result<HashSet<String>, BusError> {
        self.store.members(&presence_key(&self.prefix, facility)).await
    }

    /// Check whether `user_id` is online in `facility`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached.
    pub async fn is_online(&self, facility: &str, user_id: &str) -> Result<bool, BusError> {
        self.store
            .contains(&presence_key(&self.prefix, facility), user_id)
            .await
    }
}

impl fmt::Debug for PresenceTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresenceTracker")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_bus::MemoryBus;

    fn user(id: &str) -> Identity {
        Identity::anonymous().with_session(format!("session-{id}")).with_user(id)
    }

    fn tracker() -> (Arc<MemoryBus>, PresenceTracker) {
        let bus = Arc::new(MemoryBus::new());
        let tracker = PresenceTracker::new(bus.clone(), "ws:");
        (bus, tracker)
    }

    #[tokio::test]
    async fn test_connect_disconnect() {
        let (_, presence) = tracker();

        assert!(presence.connect("chatroom", &user("42")).await.unwrap());
        assert!(presence.online_identities("chatroom").await.unwrap().contains("42"));
        assert!(presence.is_online("chatroom", "42").await.unwrap());

        assert!(presence.disconnect("chatroom", &user("42")).await.unwrap());
        assert!(!presence.online_identities("chatroom").await.unwrap().contains("42"));
    }

    #[tokio::test]
    async fn test_double_connect_single_disconnect() {
        let (_, presence) = tracker();

        presence.connect("chatroom", &user("42")).await.unwrap();
        assert!(!presence.connect("chatroom", &user("42")).await.unwrap());
        presence.disconnect("chatroom", &user("42")).await.unwrap();

        assert!(presence.online_identities("chatroom").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_without_connect() {
        let (_, presence) = tracker();
        assert!(!presence.disconnect("chatroom", &user("42")).await.unwrap());
    }

    #[tokio::test]
    async fn test_unauthenticated_is_noop() {
        let (bus, presence) = tracker();

        assert!(!presence.connect("chatroom", &Identity::anonymous()).await.unwrap());
        let no_session = Identity::anonymous().with_user("42");
        assert!(!presence.connect("chatroom", &no_session).await.unwrap());
        assert!(!presence.disconnect("chatroom", &no_session).await.unwrap());

        assert!(bus.members("ws:online_subscribers:chatroom").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_facilities_are_isolated() {
        let (_, presence) = tracker();
        presence.connect("chatroom", &user("42")).await.unwrap();
        presence.connect("lobby", &user("7")).await.unwrap();

        let online = presence.online_identities("chatroom").await.unwrap();
        assert_eq!(online.len(), 1);
        assert!(online.contains("42"));
    }

    #[tokio::test]
    async fn test_trackers_share_the_store() {
        let (bus, first) = tracker();
        let second = PresenceTracker::new(bus, "ws:");

        first.connect("chatroom", &user("42")).await.unwrap();
        assert!(second.is_online("chatroom", "42").await.unwrap());

        second.disconnect("chatroom", &user("42")).await.unwrap();
        assert!(first.online_identities("chatroom").await.unwrap().is_empty());
    }
}
