//! Channel resolution.
//!
//! Turns a connection's facility, audience and identity into the concrete
//! keys it publishes on and subscribes to.

use beacon_bus::ChannelKey;
use std::collections::BTreeSet;
use tracing::{debug, trace};

use crate::audience::{AudienceSpec, Direction};
use crate::identity::Identity;
use crate::keys::{channel_key, KeyError, Scope};

/// Channel keys for both directions of one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedChannels {
    /// Keys the connection publishes on.
    pub publish: BTreeSet<ChannelKey>,
    /// Keys the connection subscribes to.
    pub subscribe: BTreeSet<ChannelKey>,
}

impl ResolvedChannels {
    /// Keys for `direction`.
    #[must_use]
    pub fn get(&self, direction: Direction) -> &BTreeSet<ChannelKey> {
        match direction {
            Direction::Publish => &self.publish,
            Direction::Subscribe => &self.subscribe,
        }
    }

    fn get_mut(&mut self, direction: Direction) -> &mut BTreeSet<ChannelKey> {
        match direction {
            Direction::Publish => &mut self.publish,
            Direction::Subscribe => &mut self.subscribe,
        }
    }

    /// Whether both directions are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.publish.is_empty() && self.subscribe.is_empty()
    }
}

/// A server-side publish target.
///
/// Connections only ever reach their own channels through
/// [`ChannelResolver::resolve`]. Targets let backend producers address any
/// identity in a facility.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// Everyone in the facility.
    Broadcast,
    /// One session.
    Session(String),
    /// One user.
    User(String),
    /// One group.
    Group(String),
}

impl Target {
    /// Scope of the target channel.
    #[must_use]
    pub fn scope(&self) -> Scope {
        match self {
            Self::Broadcast => Scope::Broadcast,
            Self::Session(_) => Scope::Session,
            Self::User(_) => Scope::User,
            Self::Group(_) => Scope::Group,
        }
    }

    /// Identity of the target channel.
    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        match self {
            Self::Broadcast => None,
            Self::Session(id) | Self::User(id) | Self::Group(id) => Some(id),
        }
    }
}

/// Resolves audiences into channel keys under one prefix.
#[derive(Debug, Clone)]
pub struct ChannelResolver {
    prefix: String,
}

impl ChannelResolver {
    /// Create a resolver for the key `prefix`.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Key prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Resolve the publish and subscribe keys for one connection.
    ///
    /// Session, user and group channels are included only when requested
    /// and the connection has its own id for that scope; otherwise they are
    /// left out. Broadcast is included whenever requested.
    #[must_use]
    pub fn resolve(
        &self,
        facility: &str,
        audience: &AudienceSpec,
        identity: &Identity,
    ) -> ResolvedChannels {
        let mut resolved = ResolvedChannels::default();

        for direction in Direction::ALL {
            let keys = resolved.get_mut(direction);
            for scope in Scope::ALL.into_iter().filter(|s| audience.wants(direction, *s)) {
                match channel_key(&self.prefix, scope, facility, identity.for_scope(scope)) {
                    Ok(key) => {
                        keys.insert(key);
                    }
                    Err(e) => {
                        trace!(facility = %facility, %direction, error = %e, "Omitting channel");
                    }
                }
            }
        }

        debug!(
            facility = %facility,
            publish = resolved.publish.len(),
            subscribe = resolved.subscribe.len(),
            "Resolved channels"
        );
        resolved
    }

    /// Key for a server-side publish target.
    ///
    /// # Errors
    ///
    /// Returns an error if the target carries an empty identity.
    pub fn target_key(&self, facility: &str, target: &Target) -> Result<ChannelKey, KeyError> {
        channel_key(&self.prefix, target.scope(), facility, target.identity())
    }
}
