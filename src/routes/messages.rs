//! Message history REST endpoints.
//!
//! Reads and deletes go over HTTP; only live traffic uses the websocket.
//! Both endpoints take the same bearer token the websocket upgrade takes.
//! The axum handlers are thin: they resolve the bearer token and delegate
//! to `list_for` / `delete_for`, which tests drive directly.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::error;

use crate::presence::UserIdentity;
use crate::services::auth;
use crate::services::message::{StoreError, StoredMessage};
use crate::state::AppState;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 200;

/// Resolve the `Authorization: Bearer <token>` header to a user.
async fn bearer_user(state: &AppState, headers: &HeaderMap) -> Result<UserIdentity, Response> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| (StatusCode::UNAUTHORIZED, "bearer token required").into_response())?;

    auth::verify_token(&state.pool, token)
        .await
        .map_err(|e| (StatusCode::UNAUTHORIZED, e.to_string()).into_response())
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_room")]
    room: String,
    limit: Option<i64>,
    before_id: Option<i64>,
}

fn default_history_room() -> String {
    crate::event::GENERAL_ROOM.to_string()
}

/// GET /api/messages — newest window of a room's history, oldest-first.
pub async fn list_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<StoredMessage>>, Response> {
    let _user = bearer_user(&state, &headers).await?;
    list_for(&state, &query).await
}

async fn list_for(state: &AppState, query: &HistoryQuery) -> Result<Json<Vec<StoredMessage>>, Response> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let messages = state
        .store
        .list(&query.room, limit, query.before_id)
        .await
        .map_err(|e| {
            error!(room = %query.room, error = %e, "history query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "history unavailable").into_response()
        })?;

    Ok(Json(messages))
}

/// DELETE /api/messages/{id} — allowed for the sender and for admins.
pub async fn delete_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(message_id): Path<i64>,
) -> Result<StatusCode, Response> {
    let user = bearer_user(&state, &headers).await?;
    delete_for(&state, &user, message_id).await
}

async fn delete_for(state: &AppState, user: &UserIdentity, message_id: i64) -> Result<StatusCode, Response> {
    let message = state.store.get(message_id).await.map_err(|e| {
        error!(message_id, error = %e, "message lookup failed");
        (StatusCode::INTERNAL_SERVER_ERROR, "lookup failed").into_response()
    })?;
    let Some(message) = message else {
        return Err((StatusCode::NOT_FOUND, "no such message").into_response());
    };

    if message.sender_id != user.id && user.role != "admin" {
        return Err((StatusCode::FORBIDDEN, "not your message").into_response());
    }

    match state.store.delete(message_id).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        // Raced with another delete; the outcome is the same.
        Err(StoreError::NotFound(_)) => Ok(StatusCode::NO_CONTENT),
        Err(e) => {
            error!(message_id, error = %e, "message delete failed");
            Err((StatusCode::INTERNAL_SERVER_ERROR, "delete failed").into_response())
        }
    }
}

#[cfg(test)]
#[path = "messages_test.rs"]
mod tests;
