//! Connection identity.
//!
//! Identity is owned by the web framework's session and auth machinery. This
//! crate only reads it, once per connection.

use crate::keys::Scope;

/// The identifiers a connection arrived with. All absent means anonymous.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    /// Session id, if the request carried a session.
    pub session_id: Option<String>,
    /// Authenticated user id.
    pub user_id: Option<String>,
    /// Group the user belongs to.
    pub group_id: Option<String>,
}

impl Identity {
    /// An anonymous visitor.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Attach a session id.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Attach a user id.
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Attach a group id.
    #[must_use]
    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// The connection's own identifier for `scope`.
    ///
    /// Empty strings count as absent. Broadcast has no identifier.
    #[must_use]
    pub fn for_scope(&self, scope: Scope) -> Option<&str> {
        let id = match scope {
            Scope::Session => self.session_id.as_deref(),
            Scope::User => self.user_id.as_deref(),
            Scope::Group => self.group_id.as_deref(),
            Scope::Broadcast => None,
        };
        id.filter(|id| !id.is_empty())
    }

    /// The user id, provided there is an active session to vouch for it.
    #[must_use]
    pub fn authenticated_user(&self) -> Option<&str> {
        self.for_scope(Scope::Session)?;
        self.for_scope(Scope::User)
    }

    /// Whether no identifier is present.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        [Scope::Session, Scope::User, Scope::Group]
            .into_iter()
            .all(|scope| self.for_scope(scope).is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous() {
        let identity = Identity::anonymous();
        assert!(identity.is_anonymous());
        assert!(identity.authenticated_user().is_none());
        assert!(Identity::anonymous().with_user("").is_anonymous());
    }

    #[test]
    fn test_for_scope() {
        let identity = Identity::anonymous()
            .with_session("s1")
            .with_user("42")
            .with_group("staff");

        assert_eq!(identity.for_scope(Scope::Session), Some("s1"));
        assert_eq!(identity.for_scope(Scope::User), Some("42"));
        assert_eq!(identity.for_scope(Scope::Group), Some("staff"));
        assert_eq!(identity.for_scope(Scope::Broadcast), None);
    }

    #[test]
    fn test_authenticated_user_needs_session() {
        assert_eq!(
            Identity::anonymous().with_session("s1").with_user("42").authenticated_user(),
            Some("42")
        );
        assert!(Identity::anonymous().with_user("42").authenticated_user().is_none());
        assert!(Identity::anonymous().with_session("s1").authenticated_user().is_none());
    }
}
