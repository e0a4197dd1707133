//! WebSocket handler — the transport edge of the messaging core.
//!
//! DESIGN
//! ======
//! Authentication happens before the upgrade: a missing or invalid token is
//! answered with 401 and no connection state is ever created. After the
//! upgrade the connection task owns a [`Session`] and enters a `select!`
//! loop:
//! - Inbound client events → parse + dispatch, replies go to the sender
//! - Events fanned out by the router → forwarded to the socket
//!
//! `process_client_event` is pure dispatch logic returning the replies for
//! the sender, so tests exercise the full event path without a socket.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → `begin_session`: register presence, auto-join the personal
//!    room, broadcast `user_online` for the user's first connection
//! 2. Client events → dispatch → replies + router fanout
//! 3. Close (either direction) → `end_session`: unregister, broadcast
//!    `user_offline` for the user's last connection — exactly once

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::event::{ClientEvent, ServerEvent, user_room};
use crate::presence::UserIdentity;
use crate::router;
use crate::services::auth;
use crate::session::Session;
use crate::state::AppState;

/// Outbound buffer per connection. A client that falls this far behind
/// starts losing events (see the router's fanout policy).
const OUTBOUND_BUFFER: usize = 256;

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(token) = params.get("token") else {
        return (StatusCode::UNAUTHORIZED, "token required").into_response();
    };

    // Rejection happens here, before any connection state exists.
    let user = match auth::verify_token(&state.pool, token).await {
        Ok(user) => user,
        Err(e) => return (StatusCode::UNAUTHORIZED, e.to_string()).into_response(),
    };

    ws.on_upgrade(move |socket| run_ws(socket, state, user))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, user: UserIdentity) {
    let mut session = Session::new(Uuid::new_v4());

    // Per-connection channel the router fans out through.
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(OUTBOUND_BUFFER);

    if begin_session(&state, &mut session, user, tx).await.is_err() {
        return;
    }
    info!(conn_id = %session.conn_id(), "ws: connected");

    'conn: loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let replies = process_client_event(&state, &session, &text).await;
                        for reply in replies {
                            if send_event(&mut socket, &reply).await.is_err() {
                                break 'conn;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(event) = rx.recv() => {
                if send_event(&mut socket, &event).await.is_err() {
                    break;
                }
            }
        }
    }

    end_session(&state, &mut session).await;
    info!(conn_id = %session.conn_id(), "ws: disconnected");
}

/// Authenticate the session, register presence, join the personal room,
/// and announce the user if this is their first live connection.
pub(crate) async fn begin_session(
    state: &AppState,
    session: &mut Session,
    user: UserIdentity,
    tx: mpsc::Sender<ServerEvent>,
) -> Result<(), ()> {
    let conn_id = session.conn_id();
    let auth_err = session.authenticate(user.clone()).err();
    if let Some(e) = auth_err {
        error!(%conn_id, error = %e, "ws: session in unexpected state at open");
        session.reject();
        return Err(());
    }

    let first_for_user = match state.presence.register(conn_id, user.clone(), tx).await {
        Ok(first) => first,
        Err(e) => {
            // Duplicate connection id: registry consistency violation.
            error!(%conn_id, error = %e, "ws: presence registration failed");
            session.reject();
            return Err(());
        }
    };

    // Personal room for user-scoped delivery, joined for the whole life of
    // the connection.
    if let Err(e) = state.presence.join(conn_id, &user_room(user.id)).await {
        error!(%conn_id, error = %e, "ws: personal room join failed");
    }

    if first_for_user {
        let online = ServerEvent::UserOnline { user_id: user.id, username: user.username.clone() };
        router::broadcast_global(state, &online).await;
    }
    Ok(())
}

/// Tear the connection down. Safe to call on any session state; cleanup and
/// the offline broadcast run at most once.
pub(crate) async fn end_session(state: &AppState, session: &mut Session) {
    let Some(user) = session.close() else {
        return;
    };
    match state.presence.unregister(session.conn_id()).await {
        Some(gone) => {
            debug!(conn_id = %session.conn_id(), rooms = gone.rooms.len(), "ws: unregistered");
            if gone.last_for_user {
                let offline = ServerEvent::UserOffline { user_id: user.id };
                router::broadcast_global(state, &offline).await;
            }
        }
        None => {
            // close() said this session was live, so the registry should
            // have had an entry.
            error!(conn_id = %session.conn_id(), "ws: no registry entry for live session");
        }
    }
}

// =============================================================================
// EVENT DISPATCH
// =============================================================================

/// Parse and dispatch one inbound event, returning the replies for the
/// sending connection. Fanout to other connections happens inside the
/// router; senders only ever see their own replies here.
pub(crate) async fn process_client_event(state: &AppState, session: &Session, text: &str) -> Vec<ServerEvent> {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            warn!(conn_id = %session.conn_id(), error = %e, "ws: unparseable event");
            return vec![ServerEvent::error("E_BAD_EVENT", format!("invalid event: {e}"))];
        }
    };

    // Single legality gate: every operation requires an authenticated
    // session, checked before any state is touched.
    let user = match session.authorize(event.name()) {
        Ok(user) => user.clone(),
        Err(e) => return vec![ServerEvent::error_from(&e)],
    };

    let conn_id = session.conn_id();
    match event {
        ClientEvent::JoinRoom { room } => match state.presence.join(conn_id, &room).await {
            Ok(_) => vec![ServerEvent::RoomJoined { room }],
            Err(e) => {
                error!(%conn_id, error = %e, "ws: join failed");
                vec![ServerEvent::error("E_NO_SESSION", e.to_string())]
            }
        },
        ClientEvent::LeaveRoom { room } => match state.presence.leave(conn_id, &room).await {
            Ok(_) => vec![ServerEvent::RoomLeft { room }],
            Err(e) => {
                error!(%conn_id, error = %e, "ws: leave failed");
                vec![ServerEvent::error("E_NO_SESSION", e.to_string())]
            }
        },
        ClientEvent::SendMessage { content, room, reply_to } => {
            match router::send_message(state, conn_id, &room, &content, reply_to).await {
                // The sender's copy of the persisted record; peers got
                // theirs via the room broadcast.
                Ok(stored) => vec![ServerEvent::NewMessage {
                    id: stored.id,
                    sender_id: stored.sender_id,
                    sender_username: user.username,
                    content: stored.content,
                    room: stored.room,
                    reply_to: stored.reply_to,
                    created_at: stored.created_at,
                }],
                Err(e) => vec![ServerEvent::error_from(&e)],
            }
        }
        ClientEvent::Typing { room } => match router::typing(state, conn_id, &room).await {
            Ok(()) => Vec::new(),
            Err(e) => vec![ServerEvent::error_from(&e)],
        },
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> Result<(), ()> {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize event");
            return Err(());
        }
    };
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
