//! Audience configuration.
//!
//! An audience says which of a connection's own channels it publishes to and
//! subscribes on. Outside the process it is a list of string flags such as
//! `subscribe-user`; inside it is a closed set of eight booleans.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

use crate::keys::Scope;

/// Message direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Connection sends to the channel.
    Publish,
    /// Connection receives from the channel.
    Subscribe,
}

impl Direction {
    /// Both directions.
    pub const ALL: [Direction; 2] = [Direction::Publish, Direction::Subscribe];

    /// Flag prefix for this direction.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Publish => "publish",
            Self::Subscribe => "subscribe",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `{direction}-{scope}` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudienceFlag {
    /// Direction.
    pub direction: Direction,
    /// Scope.
    pub scope: Scope,
}

impl AudienceFlag {
    /// Create a flag.
    #[must_use]
    pub const fn new(direction: Direction, scope: Scope) -> Self {
        Self { direction, scope }
    }

    /// The flag's string form, e.g. `subscribe-broadcast`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match (self.direction, self.scope) {
            (Direction::Publish, Scope::Session) => "publish-session",
            (Direction::Publish, Scope::User) => "publish-user",
            (Direction::Publish, Scope::Group) => "publish-group",
            (Direction::Publish, Scope::Broadcast) => "publish-broadcast",
            (Direction::Subscribe, Scope::Session) => "subscribe-session",
            (Direction::Subscribe, Scope::User) => "subscribe-user",
            (Direction::Subscribe, Scope::Group) => "subscribe-group",
            (Direction::Subscribe, Scope::Broadcast) => "subscribe-broadcast",
        }
    }
}

impl fmt::Display for AudienceFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A flag outside the known vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown audience flag: {0}")]
pub struct UnknownFlag(pub String);

impl FromStr for AudienceFlag {
    type Err = UnknownFlag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (direction, scope) = s.split_once('-').ok_or_else(|| UnknownFlag(s.to_string()))?;
        let direction = Direction::ALL
            .into_iter()
            .find(|d| d.as_str() == direction)
            .ok_or_else(|| UnknownFlag(s.to_string()))?;
        let scope = Scope::ALL
            .into_iter()
            .find(|sc| sc.as_str() == scope)
            .ok_or_else(|| UnknownFlag(s.to_string()))?;
        Ok(Self::new(direction, scope))
    }
}

/// Which of its own channels a connection publishes to and subscribes on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct AudienceSpec {
    /// Subscribe to the own session channel.
    pub subscribe_session: bool,
    /// Subscribe to the own user channel.
    pub subscribe_user: bool,
    /// Subscribe to the own group channel.
    pub subscribe_group: bool,
    /// Subscribe to the facility broadcast channel.
    pub subscribe_broadcast: bool,
    /// Publish to the own session channel.
    pub publish_session: bool,
    /// Publish to the own user channel.
    pub publish_user: bool,
    /// Publish to the own group channel.
    pub publish_group: bool,
    /// Publish to the facility broadcast channel.
    pub publish_broadcast: bool,
}

impl AudienceSpec {
    /// An audience with nothing enabled.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Build from string flags. Unknown flags are ignored.
    pub fn from_flags<I, S>(flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut spec = Self::default();
        for flag in flags {
            match flag.as_ref().parse::<AudienceFlag>() {
                Ok(flag) => spec.set(flag, true),
                Err(e) => debug!(error = %e, "Ignoring audience flag"),
            }
        }
        spec
    }

    /// Enable `flag`.
    #[must_use]
    pub fn with(mut self, flag: AudienceFlag) -> Self {
        self.set(flag, true);
        self
    }

    /// Set `flag` on or off.
    pub fn set(&mut self, flag: AudienceFlag, enabled: bool) {
        *self.slot(flag.direction, flag.scope) = enabled;
    }

    /// Whether `scope` is requested in `direction`.
    #[must_use]
    pub fn wants(&self, direction: Direction, scope: Scope) -> bool {
        match (direction, scope) {
            (Direction::Publish, Scope::Session) => self.publish_session,
            (Direction::Publish, Scope::User) => self.publish_user,
            (Direction::Publish, Scope::Group) => self.publish_group,
            (Direction::Publish, Scope::Broadcast) => self.publish_broadcast,
            (Direction::Subscribe, Scope::Session) => self.subscribe_session,
            (Direction::Subscribe, Scope::User) => self.subscribe_user,
            (Direction::Subscribe, Scope::Group) => self.subscribe_group,
            (Direction::Subscribe, Scope::Broadcast) => self.subscribe_broadcast,
        }
    }

    /// Enabled flags, publish first.
    pub fn flags(&self) -> impl Iterator<Item = AudienceFlag> + '_ {
        Direction::ALL
            .into_iter()
            .flat_map(|d| Scope::ALL.into_iter().map(move |s| AudienceFlag::new(d, s)))
            .filter(|flag| self.wants(flag.direction, flag.scope))
    }

    /// Whether nothing is enabled in `direction`.
    #[must_use]
    pub fn is_empty_in(&self, direction: Direction) -> bool {
        Scope::ALL.into_iter().all(|s| !self.wants(direction, s))
    }

    /// Whether nothing is enabled at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        Direction::ALL.into_iter().all(|d| self.is_empty_in(d))
    }

    fn slot(&mut self, direction: Direction, scope: Scope) -> &mut bool {
        match (direction, scope) {
            (Direction::Publish, Scope::Session) => &mut self.publish_session,
            (Direction::Publish, Scope::User) => &mut self.publish_user,
            (Direction::Publish, Scope::Group) => &mut self.publish_group,
            (Direction::Publish, Scope::Broadcast) => &mut self.publish_broadcast,
            (Direction::Subscribe, Scope::Session) => &mut self.subscribe_session,
            (Direction::Subscribe, Scope::User) => &mut self.subscribe_user,
            (Direction::Subscribe, Scope::Group) => &mut self.subscribe_group,
            (Direction::Subscribe, Scope::Broadcast) => &mut self.subscribe_broadcast,
        }
    }
}

impl From<Vec<String>> for AudienceSpec {
    fn from(flags: Vec<String>) -> Self {
        Self::from_flags(flags)
    }
}

impl From<AudienceSpec> for Vec<String> {
    fn from(spec: AudienceSpec) -> Self {
        spec.flags().map(|f| f.as_str().to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_parsing() {
        let flag: AudienceFlag = "subscribe-user".parse().unwrap();
        assert_eq!(flag, AudienceFlag::new(Direction::Subscribe, Scope::User));

        assert!("subscribe-everyone".parse::<AudienceFlag>().is_err());
        assert!("listen-user".parse::<AudienceFlag>().is_err());
        assert!("subscribe".parse::<AudienceFlag>().is_err());
        assert!("Subscribe-User".parse::<AudienceFlag>().is_err());
    }

    #[test]
    fn test_from_flags_ignores_unknown() {
        let spec = AudienceSpec::from_flags(["subscribe-user", "echo", "publish-broadcast"]);

        assert!(spec.subscribe_user);
        assert!(spec.publish_broadcast);
        assert_eq!(spec.flags().count(), 2);
    }

    #[test]
    fn test_empty_audience() {
        let spec = AudienceSpec::from_flags(Vec::<String>::new());
        assert!(spec.is_empty());
        assert!(spec.is_empty_in(Direction::Publish));

        let spec = AudienceSpec::none().with(AudienceFlag::new(Direction::Subscribe, Scope::Group));
        assert!(!spec.is_empty());
        assert!(spec.is_empty_in(Direction::Publish));
        assert!(!spec.is_empty_in(Direction::Subscribe));
    }

    #[test]
    fn test_every_flag_maps_to_one_field() {
        for direction in Direction::ALL {
            for scope in Scope::ALL {
                let flag = AudienceFlag::new(direction, scope);
                let spec = AudienceSpec::from_flags([flag.as_str()]);
                assert_eq!(spec.flags().collect::<Vec<_>>(), vec![flag]);
            }
        }
    }

    #[test]
    fn test_serde_as_flag_list() {
        let spec: AudienceSpec =
            serde_json::from_str(r#"["subscribe-broadcast", "publish-user", "bogus"]"#).unwrap();
        assert!(spec.subscribe_broadcast);
        assert!(spec.publish_user);

        let json = serde_json::to_string(&spec).unwrap();
        assert_eq!(json, r#"["publish-user","subscribe-broadcast"]"#);
    }
}
