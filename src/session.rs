//! Connection session state machine.
//!
//! DESIGN
//! ======
//! Every connection walks `connecting → authenticated → closed`. The
//! legality of each client operation is decided in one place,
//! [`Session::authorize`], keyed on the current state — not scattered
//! guards in the handlers. `closed` is terminal; [`Session::close`] yields
//! the cached identity exactly once, which is what makes registry cleanup
//! and the offline broadcast run exactly once no matter which path ended
//! the connection.

use crate::event::WireCode;
use crate::presence::{ConnId, UserIdentity};

#[derive(Debug)]
enum SessionState {
    /// Transport handshake done, identity not yet proven. The only legal
    /// operation is the initial authentication attempt.
    Connecting,
    Authenticated(UserIdentity),
    /// Terminal. Reached by disconnect, transport failure, or failed auth.
    Closed,
}

impl SessionState {
    fn name(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Authenticated(_) => "authenticated",
            Self::Closed => "closed",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The client invoked an operation that is not valid in the current
    /// state. Rejected locally with no side effects.
    #[error("operation `{operation}` is not valid while {state}")]
    IllegalState {
        state: &'static str,
        operation: &'static str,
    },
}

impl WireCode for SessionError {
    fn wire_code(&self) -> &'static str {
        "E_ILLEGAL_STATE"
    }
}

/// Per-connection lifecycle, owned by the connection's task.
#[derive(Debug)]
pub struct Session {
    conn_id: ConnId,
    state: SessionState,
}

impl Session {
    #[must_use]
    pub fn new(conn_id: ConnId) -> Self {
        Self { conn_id, state: SessionState::Connecting }
    }

    #[must_use]
    pub fn conn_id(&self) -> ConnId {
        self.conn_id
    }

    #[must_use]
    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }

    /// Transition `connecting → authenticated` with the verified identity.
    ///
    /// # Errors
    ///
    /// Rejected from any other state: a connection authenticates at most
    /// once, and never after closing.
    pub fn authenticate(&mut self, user: UserIdentity) -> Result<&UserIdentity, SessionError> {
        match self.state {
            SessionState::Connecting => {
                self.state = SessionState::Authenticated(user);
                let SessionState::Authenticated(ref user) = self.state else {
                    unreachable!("state set on the previous line");
                };
                Ok(user)
            }
            _ => Err(SessionError::IllegalState { state: self.state.name(), operation: "authenticate" }),
        }
    }

    /// Transition `connecting → closed` after a failed authentication
    /// attempt. No retry within the same connection.
    pub fn reject(&mut self) {
        self.state = SessionState::Closed;
    }

    /// Single-point legality check for a client operation: returns the
    /// authenticated identity, or rejects without side effects.
    ///
    /// # Errors
    ///
    /// [`SessionError::IllegalState`] while `connecting` or `closed`.
    pub fn authorize(&self, operation: &'static str) -> Result<&UserIdentity, SessionError> {
        match &self.state {
            SessionState::Authenticated(user) => Ok(user),
            other => Err(SessionError::IllegalState { state: other.name(), operation }),
        }
    }

    #[must_use]
    pub fn user(&self) -> Option<&UserIdentity> {
        match &self.state {
            SessionState::Authenticated(user) => Some(user),
            _ => None,
        }
    }

    /// Enter the terminal state. Returns the identity the first time a live
    /// authenticated session is closed — the caller runs cleanup (registry
    /// unregister, offline broadcast) iff this returns `Some`, which bounds
    /// cleanup to exactly once per connection.
    pub fn close(&mut self) -> Option<UserIdentity> {
        match std::mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::Authenticated(user) => Some(user),
            SessionState::Connecting | SessionState::Closed => None,
        }
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
