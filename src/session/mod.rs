//! Session identity source.
//!
//! Holds the credentials of the logged-in user and publishes identity
//! changes to whoever needs to react to login and logout (mainly the
//! stream supervisor). Persisting credentials is up to the caller.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Opaque identifier of an authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Credentials returned by the login endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub user_id: UserId,
    pub name: String,
    pub email: String,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("name", &self.name)
            .field("email", &self.email)
            .finish()
    }
}

/// Raw state of the session source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Credentials have not been looked up yet.
    Unresolved,
    /// Nobody is logged in.
    Absent,
    Active(Session),
}

/// What downstream consumers care about: who, if anyone, is logged in.
///
/// `Unresolved` and `Absent` are kept distinct, neither starts a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Unresolved,
    Absent,
    Present(UserId),
}

impl Identity {
    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Identity::Present(id) => Some(id),
            _ => None,
        }
    }
}

impl SessionState {
    pub fn identity(&self) -> Identity {
        match self {
            SessionState::Unresolved => Identity::Unresolved,
            SessionState::Absent => Identity::Absent,
            SessionState::Active(session) => Identity::Present(session.user_id.clone()),
        }
    }
}

/// Shared handle to the current session. Cheap to clone.
#[derive(Clone)]
pub struct SessionSource {
    state_tx: Arc<watch::Sender<SessionState>>,
}

impl Default for SessionSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionSource {
    /// Create a source in the `Unresolved` state.
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(SessionState::Unresolved);
        Self {
            state_tx: Arc::new(state_tx),
        }
    }

    /// Complete the initial lookup of stored credentials.
    pub fn resolve(&self, session: Option<Session>) {
        match session {
            Some(session) => self.login(session),
            None => {
                self.set(SessionState::Absent);
            }
        }
    }

    pub fn login(&self, session: Session) {
        info!("Session active for user {}", session.user_id);
        self.set(SessionState::Active(session));
    }

    pub fn logout(&self) {
        if self.set(SessionState::Absent) {
            info!("Session cleared");
        }
    }

    /// Drop credentials after the backend rejected them.
    pub fn invalidate(&self) {
        if self.set(SessionState::Absent) {
            warn!("Credentials rejected by the backend, session cleared");
        }
    }

    pub fn state(&self) -> SessionState {
        self.state_tx.borrow().clone()
    }

    pub fn identity(&self) -> Identity {
        self.state_tx.borrow().identity()
    }

    pub fn user_id(&self) -> Option<UserId> {
        match &*self.state_tx.borrow() {
            SessionState::Active(session) => Some(session.user_id.clone()),
            _ => None,
        }
    }

    pub fn token(&self) -> Option<String> {
        match &*self.state_tx.borrow() {
            SessionState::Active(session) => Some(session.token.clone()),
            _ => None,
        }
    }

    /// Receiver notified on every change of the session state.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Returns true if the state changed.
    fn set(&self, new_state: SessionState) -> bool {
        self.state_tx.send_if_modified(|state| {
            if *state == new_state {
                false
            } else {
                *state = new_state;
                true
            }
        })
    }
}

#[cfg(test)]
pub(crate) fn test_session(user_id: &str) -> Session {
    Session {
        token: format!("token-{}", user_id),
        user_id: UserId::new(user_id),
        name: "Test User".to_string(),
        email: format!("{}@example.com", user_id),
    }
}
