//! Signed-in identity as seen by the sync layer.
//!
//! The login flow owns the tokens; this type only holds the current pair and
//! broadcasts every change so the push connection can follow it.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

impl TokenPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access", &"<redacted>")
            .field("refresh", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Librarian,
    Admin,
}

impl Role {
    /// Staff see every borrowing, not just their own.
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Librarian | Role::Admin)
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "member" | "user" => Ok(Role::Member),
            "librarian" => Ok(Role::Librarian),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub tokens: TokenPair,
    pub user: CurrentUser,
}

/// Current identity plus change notification.
pub struct Session {
    tx: watch::Sender<Option<SessionState>>,
}

impl Session {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn sign_in(&self, tokens: TokenPair, user: CurrentUser) {
        tracing::info!(user_id = %user.id, role = ?user.role, "session signed in");
        self.tx.send_replace(Some(SessionState { tokens, user }));
    }

    /// Swap in refreshed tokens. Ignored when nobody is signed in.
    pub fn refresh(&self, tokens: TokenPair) -> bool {
        self.tx.send_if_modified(|state| match state {
            Some(state) if state.tokens != tokens => {
                state.tokens = tokens;
                true
            }
            _ => false,
        })
    }

    pub fn sign_out(&self) {
        if self.tx.send_replace(None).is_some() {
            tracing::info!("session signed out");
        }
    }

    pub fn access_token(&self) -> Option<String> {
        self.tx.borrow().as_ref().map(|s| s.tokens.access.clone())
    }

    pub fn current_user(&self) -> Option<CurrentUser> {
        self.tx.borrow().as_ref().map(|s| s.user.clone())
    }

    pub fn is_signed_in(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn watch(&self) -> watch::Receiver<Option<SessionState>> {
        self.tx.subscribe()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: &str) -> CurrentUser {
        CurrentUser {
            id: id.to_string(),
            role: Role::Member,
        }
    }

    #[test]
    fn test_sign_in_and_out() {
        let session = Session::new();
        assert_eq!(session.access_token(), None);

        session.sign_in(TokenPair::new("a1", "r1"), member("u1"));
        assert_eq!(session.access_token().as_deref(), Some("a1"));
        assert_eq!(session.current_user().unwrap().id, "u1");

        session.sign_out();
        assert!(!session.is_signed_in());
    }

    #[test]
    fn test_refresh_requires_session() {
        let session = Session::new();
        assert!(!session.refresh(TokenPair::new("a2", "r2")));
        assert_eq!(session.access_token(), None);

        session.sign_in(TokenPair::new("a1", "r1"), member("u1"));
        assert!(session.refresh(TokenPair::new("a2", "r2")));
        assert!(!session.refresh(TokenPair::new("a2", "r2")));
        assert_eq!(session.access_token().as_deref(), Some("a2"));
    }

    #[tokio::test]
    async fn test_watch_sees_changes() {
        let session = Session::new();
        let mut rx = session.watch();

        session.sign_in(TokenPair::new("a1", "r1"), member("u1"));
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_some());

        session.sign_out();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_none());
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let rendered = format!("{:?}", TokenPair::new("secret", "also-secret"));
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("ADMIN".parse::<Role>().unwrap(), Role::Admin);
        assert!("Librarian".parse::<Role>().unwrap().is_staff());
        assert!(!Role::Member.is_staff());
        assert!("guest".parse::<Role>().is_err());
    }
}
