//! Message store — durable append-only log of chat messages per room.
//!
//! DESIGN
//! ======
//! The store is a trait so the messaging core can be exercised without
//! Postgres; the production impl is a thin sqlx layer. Ids are assigned by
//! the database sequence, which is what gives rooms their monotonic
//! broadcast order. Messages are never mutated; deletion removes the row
//! without renumbering anything.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::event::WireCode;

/// Persisted chat message. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StoredMessage {
    pub id: i64,
    pub sender_id: i64,
    pub content: String,
    pub room: String,
    pub reply_to: Option<i64>,
    /// Milliseconds since Unix epoch, assigned at persistence time.
    pub created_at: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("message not found: {0}")]
    NotFound(i64),
    /// Used by non-database impls to signal a failed write.
    #[error("message store unavailable: {0}")]
    Unavailable(String),
}

impl WireCode for StoreError {
    fn wire_code(&self) -> &'static str {
        match self {
            Self::Database(_) | Self::Unavailable(_) => "E_PERSISTENCE",
            Self::NotFound(_) => "E_NOT_FOUND",
        }
    }
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append a message and return it with its store-assigned id and
    /// timestamp.
    async fn create(
        &self,
        sender_id: i64,
        content: &str,
        room: &str,
        reply_to: Option<i64>,
    ) -> Result<StoredMessage, StoreError>;

    /// Newest window of a room's log, returned oldest-first. `before_id`
    /// pages backwards through history.
    async fn list(&self, room: &str, limit: i64, before_id: Option<i64>) -> Result<Vec<StoredMessage>, StoreError>;

    async fn get(&self, message_id: i64) -> Result<Option<StoredMessage>, StoreError>;

    /// Remove one message. Other ids are never renumbered.
    async fn delete(&self, message_id: i64) -> Result<(), StoreError>;
}

// =============================================================================
// POSTGRES IMPL
// =============================================================================

pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

type MessageRow = (i64, i64, String, String, Option<i64>, i64);

fn row_to_message((id, sender_id, content, room, reply_to, created_at): MessageRow) -> StoredMessage {
    StoredMessage { id, sender_id, content, room, reply_to, created_at }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn create(
        &self,
        sender_id: i64,
        content: &str,
        room: &str,
        reply_to: Option<i64>,
    ) -> Result<StoredMessage, StoreError> {
        let (id, created_at) = sqlx::query_as::<_, (i64, i64)>(
            "INSERT INTO messages (sender_id, content, room, reply_to)
             VALUES ($1, $2, $3, $4)
             RETURNING id, created_at",
        )
        .bind(sender_id)
        .bind(content)
        .bind(room)
        .bind(reply_to)
        .fetch_one(&self.pool)
        .await?;

        Ok(StoredMessage {
            id,
            sender_id,
            content: content.to_string(),
            room: room.to_string(),
            reply_to,
            created_at,
        })
    }

    async fn list(&self, room: &str, limit: i64, before_id: Option<i64>) -> Result<Vec<StoredMessage>, StoreError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT id, sender_id, content, room, reply_to, created_at
             FROM messages
             WHERE room = $1 AND ($3::bigint IS NULL OR id < $3)
             ORDER BY id DESC
             LIMIT $2",
        )
        .bind(room)
        .bind(limit)
        .bind(before_id)
        .fetch_all(&self.pool)
        .await?;

        // Newest window, presented oldest-first.
        Ok(rows.into_iter().rev().map(row_to_message).collect())
    }

    async fn get(&self, message_id: i64) -> Result<Option<StoredMessage>, StoreError> {
        let row = sqlx::query_as::<_, MessageRow>(
            "SELECT id, sender_id, content, room, reply_to, created_at
             FROM messages
             WHERE id = $1",
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_message))
    }

    async fn delete(&self, message_id: i64) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM messages WHERE id = $1")
            .bind(message_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(message_id));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "message_test.rs"]
mod tests;
