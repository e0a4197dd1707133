//! Room router — computes who receives an event and delivers it.
//!
//! DESIGN
//! ======
//! Fanout snapshots the recipient senders under a single registry read,
//! then delivers with `try_send`. A slow or dead connection drops its copy
//! instead of stalling everyone else; its own receive loop will notice the
//! broken channel and tear the connection down.
//!
//! `send_message` is persist-then-broadcast: the stored record (with its
//! store-assigned id and timestamp) is what goes on the wire, and a failed
//! write means nothing is broadcast at all.

use tracing::{debug, warn};

use crate::event::{self, ServerEvent, WireCode};
use crate::presence::{ConnId, UserIdentity};
use crate::services::message::{StoreError, StoredMessage};
use crate::services::notify::NotifyRequest;
use crate::state::AppState;

/// Truncation length for push notification previews.
const PREVIEW_LEN: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("message content is empty")]
    EmptyContent,
    #[error("not a member of room: {0}")]
    NotAMember(String),
    #[error("connection is not registered")]
    UnknownConnection,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WireCode for SendError {
    fn wire_code(&self) -> &'static str {
        match self {
            Self::EmptyContent => "E_EMPTY_MESSAGE",
            Self::NotAMember(_) => "E_NOT_A_MEMBER",
            Self::UnknownConnection => "E_NO_SESSION",
            Self::Store(e) => e.wire_code(),
        }
    }
}

// =============================================================================
// FANOUT
// =============================================================================

fn deliver(targets: Vec<(ConnId, tokio::sync::mpsc::Sender<ServerEvent>)>, event: &ServerEvent) {
    for (conn_id, tx) in targets {
        // Best effort: a full buffer means the client is too slow to keep
        // its copy, never that fanout waits.
        if let Err(e) = tx.try_send(event.clone()) {
            warn!(%conn_id, error = %e, "router: dropping event for slow or closed connection");
        }
    }
}

/// Deliver to every current member of a room, optionally excluding one
/// connection (used for typing and sender-echo suppression).
pub async fn broadcast_to_room(state: &AppState, room: &str, event: &ServerEvent, exclude: Option<ConnId>) {
    deliver(state.presence.room_senders(room, exclude).await, event);
}

/// Deliver to every live connection of a user (multi-device).
pub async fn broadcast_to_user(state: &AppState, user_id: i64, event: &ServerEvent) {
    deliver(state.presence.user_senders(user_id).await, event);
}

/// Deliver to every registered connection. Used for presence and task
/// announcements.
pub async fn broadcast_global(state: &AppState, event: &ServerEvent) {
    deliver(state.presence.all_senders().await, event);
}

// =============================================================================
// MESSAGE SEND
// =============================================================================

/// Whether `sender` may post to `room` without having joined it.
///
/// "general" is implicit for everyone; a personal room accepts messages
/// from any authenticated user (that is how direct messages work).
fn joinless_send_allowed(room: &str) -> bool {
    room == event::GENERAL_ROOM || event::user_room_owner(room).is_some()
}

/// Validate, persist, and broadcast one message.
///
/// The broadcast excludes the sending connection; the caller replies to the
/// sender directly with the stored record so the sender still gets the
/// store-assigned id.
///
/// # Errors
///
/// Returns [`SendError`] if the sender is unknown, the content is empty
/// after trimming, the sender is not a member of a join-required room, or
/// the store rejects the write. On any error nothing was broadcast.
pub async fn send_message(
    state: &AppState,
    conn_id: ConnId,
    room: &str,
    content: &str,
    reply_to: Option<i64>,
) -> Result<StoredMessage, SendError> {
    let sender = state
        .presence
        .identity_of(conn_id)
        .await
        .ok_or(SendError::UnknownConnection)?;

    let content = content.trim();
    if content.is_empty() {
        return Err(SendError::EmptyContent);
    }

    if !state.presence.is_member(conn_id, room).await {
        if !joinless_send_allowed(room) {
            return Err(SendError::NotAMember(room.to_string()));
        }
        if room == event::GENERAL_ROOM {
            // Implicit membership: first send to general joins it.
            state
                .presence
                .join(conn_id, room)
                .await
                .map_err(|_| SendError::UnknownConnection)?;
        }
    }

    // Persist first. A failed write means no broadcast at all.
    let stored = state.store.create(sender.id, content, room, reply_to).await?;
    debug!(message_id = stored.id, room, sender_id = sender.id, "router: message persisted");

    let wire = new_message_event(&stored, &sender);
    broadcast_to_room(state, room, &wire, Some(conn_id)).await;

    if let Some(owner) = event::user_room_owner(room) {
        notify_if_offline(state, owner, &sender, &stored).await;
    }

    Ok(stored)
}

fn new_message_event(stored: &StoredMessage, sender: &UserIdentity) -> ServerEvent {
    ServerEvent::NewMessage {
        id: stored.id,
        sender_id: stored.sender_id,
        sender_username: sender.username.clone(),
        content: stored.content.clone(),
        room: stored.room.clone(),
        reply_to: stored.reply_to,
        created_at: stored.created_at,
    }
}

/// Queue a push for the owner of a personal room who has no live
/// connection. Best effort; never affects the send result.
async fn notify_if_offline(state: &AppState, owner: i64, sender: &UserIdentity, stored: &StoredMessage) {
    if owner == sender.id || state.presence.user_online(owner).await {
        return;
    }
    let preview: String = stored.content.chars().take(PREVIEW_LEN).collect();
    state.notify.enqueue(NotifyRequest {
        user_id: owner,
        title: format!("Message from {}", sender.username),
        body: preview,
        tag: format!("message-{}", stored.id),
        data: serde_json::json!({ "type": "message", "room": stored.room, "message_id": stored.id }),
    });
}

// =============================================================================
// TYPING
// =============================================================================

/// Relay a typing indicator to the other members of a room. Never echoed
/// back to the typist.
///
/// # Errors
///
/// Returns [`SendError`] if the connection is unknown or not a member of a
/// join-required room.
pub async fn typing(state: &AppState, conn_id: ConnId, room: &str) -> Result<(), SendError> {
    let sender = state
        .presence
        .identity_of(conn_id)
        .await
        .ok_or(SendError::UnknownConnection)?;

    if !state.presence.is_member(conn_id, room).await && !joinless_send_allowed(room) {
        return Err(SendError::NotAMember(room.to_string()));
    }

    let event = ServerEvent::UserTyping { user_id: sender.id, room: room.to_string() };
    broadcast_to_room(state, room, &event, Some(conn_id)).await;
    Ok(())
}

// =============================================================================
// TASK ANNOUNCEMENTS
// =============================================================================

/// Announce a freshly created task to everyone, and additionally to the
/// assignee's own connections plus their push endpoints.
pub async fn announce_task_created(state: &AppState, id: i64, title: &str, assigned_to: Option<i64>) {
    let created = ServerEvent::TaskCreated { id, title: title.to_string(), assigned_to };
    broadcast_global(state, &created).await;

    if let Some(user_id) = assigned_to {
        let assigned = ServerEvent::TaskAssigned { id, title: title.to_string() };
        broadcast_to_user(state, user_id, &assigned).await;
        // Push regardless of live connections: assignment should reach the
        // device even when the user is at their desk on another tab.
        state.notify.enqueue(NotifyRequest {
            user_id,
            title: "Task assigned to you".to_string(),
            body: title.to_string(),
            tag: format!("task-{id}"),
            data: serde_json::json!({ "type": "task", "task_id": id }),
        });
    }
}

/// Announce a task status change to everyone.
pub async fn announce_task_updated(state: &AppState, id: i64, status: &str) {
    let updated = ServerEvent::TaskUpdated { id, status: status.to_string() };
    broadcast_global(state, &updated).await;
}

#[cfg(test)]
#[path = "router_test.rs"]
mod tests;
