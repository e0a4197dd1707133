//! Wire events — the messages exchanged with chat clients.
//!
//! DESIGN
//! ======
//! Every websocket payload is a named event with a flat data object:
//! `{"event": "send_message", "data": {...}}`. Client events are the four
//! operations a connection may issue; server events are everything the
//! server pushes, including presence, task announcements, and structured
//! errors.
//!
//! Errors carried on the wire get a grepable `E_*` code via [`WireCode`] so
//! clients can branch without parsing prose.

use serde::{Deserialize, Serialize};

/// The well-known room every client may send to without an explicit join.
pub const GENERAL_ROOM: &str = "general";

/// Prefix for per-user rooms used for user-scoped events.
const USER_ROOM_PREFIX: &str = "user:";

/// Name of the personal room for a user, e.g. `user:42`.
#[must_use]
pub fn user_room(user_id: i64) -> String {
    format!("{USER_ROOM_PREFIX}{user_id}")
}

/// If `room` is a personal room, returns the owning user id.
#[must_use]
pub fn user_room_owner(room: &str) -> Option<i64> {
    room.strip_prefix(USER_ROOM_PREFIX)?.parse().ok()
}

fn default_room() -> String {
    GENERAL_ROOM.to_string()
}

// =============================================================================
// CLIENT → SERVER
// =============================================================================

/// Operations a connected client may issue. Omitted rooms default to
/// [`GENERAL_ROOM`], mirroring the web client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinRoom {
        #[serde(default = "default_room")]
        room: String,
    },
    LeaveRoom {
        #[serde(default = "default_room")]
        room: String,
    },
    SendMessage {
        content: String,
        #[serde(default = "default_room")]
        room: String,
        #[serde(default)]
        reply_to: Option<i64>,
    },
    Typing {
        #[serde(default = "default_room")]
        room: String,
    },
}

impl ClientEvent {
    /// Stable operation name, used for state-machine legality checks and logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => "join_room",
            Self::LeaveRoom { .. } => "leave_room",
            Self::SendMessage { .. } => "send_message",
            Self::Typing { .. } => "typing",
        }
    }
}

// =============================================================================
// SERVER → CLIENT
// =============================================================================

/// Everything the server pushes to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    UserOnline {
        user_id: i64,
        username: String,
    },
    UserOffline {
        user_id: i64,
    },
    RoomJoined {
        room: String,
    },
    RoomLeft {
        room: String,
    },
    NewMessage {
        id: i64,
        sender_id: i64,
        sender_username: String,
        content: String,
        room: String,
        reply_to: Option<i64>,
        /// Milliseconds since Unix epoch, assigned by the message store.
        created_at: i64,
    },
    UserTyping {
        user_id: i64,
        room: String,
    },
    TaskCreated {
        id: i64,
        title: String,
        assigned_to: Option<i64>,
    },
    TaskAssigned {
        id: i64,
        title: String,
    },
    TaskUpdated {
        id: i64,
        status: String,
    },
    Error {
        code: String,
        message: String,
    },
}

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code for errors that surface on the wire.
pub trait WireCode: std::fmt::Display {
    fn wire_code(&self) -> &'static str;
}

impl ServerEvent {
    /// Build an `error` event from a typed error.
    #[must_use]
    pub fn error_from(err: &(impl WireCode + ?Sized)) -> Self {
        Self::Error { code: err.wire_code().to_string(), message: err.to_string() }
    }

    /// Build an `error` event from a bare code and message.
    pub fn error(code: &'static str, message: impl Into<String>) -> Self {
        Self::Error { code: code.to_string(), message: message.into() }
    }
}

// =============================================================================
// TESTS
// =============================================================================
