//! Channel and presence key derivation.
//!
//! Keys have the form `{prefix}{scope}:{facility}[:{identity}]`. They are the
//! wire contract between every process sharing a bus, so the format is fixed:
//! any two processes using the same prefix agree on every key.
//!
//! A `:` or `\` inside a facility or identity is escaped with `\`, which keeps
//! `(scope, facility, identity)` to key injective. Components without those
//! characters appear verbatim.

use beacon_bus::ChannelKey;
use std::fmt;
use thiserror::Error;

/// Reserved tag for presence sets. Never a message scope.
pub const PRESENCE_TAG: &str = "online_subscribers";

const SEPARATOR: char = ':';
const ESCAPE: char = '\\';

/// The identity dimension a channel is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    /// One browser session.
    Session,
    /// One authenticated user, across all their sessions.
    User,
    /// One group of users.
    Group,
    /// Everyone connected to the facility.
    Broadcast,
}

impl Scope {
    /// All scopes, in key-resolution order.
    pub const ALL: [Scope; 4] = [Scope::Session, Scope::User, Scope::Group, Scope::Broadcast];

    /// The tag embedded in keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::User => "user",
            Self::Group => "group",
            Self::Broadcast => "broadcast",
        }
    }

    /// Whether keys in this scope carry an identity component.
    #[must_use]
    pub const fn requires_identity(self) -> bool {
        !matches!(self, Self::Broadcast)
    }

    fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|scope| scope.as_str() == tag)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key derivation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum KeyError {
    /// A session, user or group key was requested without an identity.
    #[error("Scope '{0}' requires an identity")]
    MissingIdentity(Scope),

    /// A broadcast key was requested with an identity.
    #[error("Scope '{0}' does not take an identity")]
    UnexpectedIdentity(Scope),
}

/// Derive the channel key for `(scope, facility, identity)`.
///
/// An empty identity counts as absent.
///
/// # Errors
///
/// Returns [`KeyError::MissingIdentity`] for session/user/group scopes without
/// an identity and [`KeyError::UnexpectedIdentity`] for broadcast with one.
pub fn channel_key(
    prefix: &str,
    scope: Scope,
    facility: &str,
    identity: Option<&str>,
) -> Result<ChannelKey, KeyError> {
    let identity = identity.filter(|id| !id.is_empty());

    match (scope.requires_identity(), identity) {
        (true, None) => return Err(KeyError::MissingIdentity(scope)),
        (false, Some(_)) => return Err(KeyError::UnexpectedIdentity(scope)),
        _ => {}
    }

    let mut key = String::with_capacity(
        prefix.len() + scope.as_str().len() + facility.len() + identity.map_or(0, str::len) + 2,
    );
    key.push_str(prefix);
    key.push_str(scope.as_str());
    key.push(SEPARATOR);
    push_escaped(&mut key, facility);
    if let Some(id) = identity {
        key.push(SEPARATOR);
        push_escaped(&mut key, id);
    }
    Ok(key)
}

/// Derive the key of a facility's online-subscriber set.
#[must_use]
pub fn presence_key(prefix: &str, facility: &str) -> String {
    let mut key = String::with_capacity(prefix.len() + PRESENCE_TAG.len() + facility.len() + 1);
    key.push_str(prefix);
    key.push_str(PRESENCE_TAG);
    key.push(SEPARATOR);
    push_escaped(&mut key, facility);
    key
}

/// A channel key split back into its components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey {
    /// Scope tag.
    pub scope: Scope,
    /// Facility, unescaped.
    pub facility: String,
    /// Identity, unescaped. Absent for broadcast.
    pub identity: Option<String>,
}

/// Parse a key produced by [`channel_key`] with the same `prefix`.
///
/// Returns `None` for foreign keys, presence keys and malformed input.
#[must_use]
pub fn parse_channel_key(prefix: &str, key: &str) -> Option<ParsedKey> {
    let rest = key.strip_prefix(prefix)?;
    let (tag, rest) = rest.split_once(SEPARATOR)?;
    let scope = Scope::from_tag(tag)?;

    let mut parts = split_escaped(rest)?.into_iter();
    let facility = parts.next()?;
    let identity = parts.next();
    if parts.next().is_some() || scope.requires_identity() != identity.is_some() {
        return None;
    }

    Some(ParsedKey {
        scope,
        facility,
        identity,
    })
}

fn push_escaped(key: &mut String, component: &str) {
    for c in component.chars() {
        if c == SEPARATOR || c == ESCAPE {
            key.push(ESCAPE);
        }
        key.push(c);
    }
}

fn split_escaped(s: &str) -> Option<Vec<String>> {
    let mut parts = Vec::with_capacity(2);
    let mut current = String::with_capacity(s.len());
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        match c {
            ESCAPE => current.push(chars.next()?),
            SEPARATOR => parts.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    parts.push(current);
    Some(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_channel_key_format() {
        assert_eq!(
            channel_key("ws:", Scope::User, "chatroom", Some("42")).unwrap(),
            "ws:user:chatroom:42"
        );
        assert_eq!(
            channel_key("ws:", Scope::Broadcast, "chatroom", None).unwrap(),
            "ws:broadcast:chatroom"
        );
        assert_eq!(
            channel_key("ws:", Scope::Session, "chatroom", Some("abc")).unwrap(),
            "ws:session:chatroom:abc"
        );
    }

    #[test]
    fn test_channel_key_is_deterministic() {
        let a = channel_key("p:", Scope::Group, "Room", Some("admins"));
        let b = channel_key("p:", Scope::Group, "Room", Some("admins"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_identity_contract() {
        assert_eq!(
            channel_key("ws:", Scope::User, "chatroom", None),
            Err(KeyError::MissingIdentity(Scope::User))
        );
        assert_eq!(
            channel_key("ws:", Scope::Session, "chatroom", Some("")),
            Err(KeyError::MissingIdentity(Scope::Session))
        );
        assert_eq!(
            channel_key("ws:", Scope::Broadcast, "chatroom", Some("42")),
            Err(KeyError::UnexpectedIdentity(Scope::Broadcast))
        );
    }

    #[test]
    fn test_distinct_inputs_give_distinct_keys() {
        let mut keys = HashSet::new();
        for facility in ["chatroom", "Chatroom", "lobby", "a:b", "a"] {
            for id in ["42", "b:42", "43", "b"] {
                for scope in [Scope::Session, Scope::User, Scope::Group] {
                    assert!(keys.insert(channel_key("ws:", scope, facility, Some(id)).unwrap()));
                }
            }
            assert!(keys.insert(channel_key("ws:", Scope::Broadcast, facility, None).unwrap()));
            assert!(keys.insert(presence_key("ws:", facility)));
        }
    }

    #[test]
    fn test_separator_inside_components_does_not_collide() {
        let left = channel_key("ws:", Scope::User, "a:b", Some("c")).unwrap();
        let right = channel_key("ws:", Scope::User, "a", Some("b:c")).unwrap();
        assert_ne!(left, right);
        assert_eq!(left, r"ws:user:a\:b:c");
    }

    #[test]
    fn test_presence_key() {
        assert_eq!(presence_key("ws:", "chatroom"), "ws:online_subscribers:chatroom");
        assert!(parse_channel_key("ws:", "ws:online_subscribers:chatroom").is_none());
    }

    #[test]
    fn test_parse_channel_key() {
        let key = channel_key("ws:", Scope::Group, r"x\y:z", Some("staff")).unwrap();
        let parsed = parse_channel_key("ws:", &key).unwrap();
        assert_eq!(parsed.scope, Scope::Group);
        assert_eq!(parsed.facility, r"x\y:z");
        assert_eq!(parsed.identity.as_deref(), Some("staff"));

        let parsed = parse_channel_key("ws:", "ws:broadcast:chatroom").unwrap();
        assert_eq!(parsed.scope, Scope::Broadcast);
        assert!(parsed.identity.is_none());
    }

    #[test]
    fn test_parse_rejects_malformed_keys() {
        assert!(parse_channel_key("ws:", "other:user:chatroom:42").is_none());
        assert!(parse_channel_key("ws:", "ws:user:chatroom").is_none());
        assert!(parse_channel_key("ws:", "ws:broadcast:chatroom:42").is_none());
        assert!(parse_channel_key("ws:", "ws:team:chatroom:42").is_none());
        assert!(parse_channel_key("ws:", r"ws:user:chatroom:42\").is_none());
    }
}
