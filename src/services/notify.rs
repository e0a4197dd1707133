//! Notification dispatcher — best-effort push for offline recipients.
//!
//! DESIGN
//! ======
//! The messaging core never awaits push delivery. It drops a
//! [`NotifyRequest`] into a bounded queue and returns; a single worker task
//! drains the queue and hands each request to a [`PushSender`]. A stalled
//! or failing sender therefore cannot block message fanout, and a full
//! queue sheds the request with a warning rather than backpressuring the
//! send path.
//!
//! ERROR HANDLING
//! ==============
//! Delivery failures are logged and discarded — they are never surfaced to
//! the client whose action triggered the notification.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const DEFAULT_NOTIFY_QUEUE_CAPACITY: usize = 1024;
const DEFAULT_PUSH_TTL_SECONDS: u32 = 86_400;

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// One notification to deliver to all of a user's registered endpoints.
#[derive(Debug, Clone, serde::Serialize)]
pub struct NotifyRequest {
    pub user_id: i64,
    pub title: String,
    pub body: String,
    /// Collapse key: later notifications with the same tag replace earlier
    /// ones on the device.
    pub tag: String,
    pub data: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("push delivery failed: {0}")]
    Delivery(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Delivers one request to a user's push endpoints, returning the count of
/// successful deliveries. Implementations must never panic the worker.
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(&self, req: &NotifyRequest) -> Result<usize, NotifyError>;
}

// =============================================================================
// QUEUE + WORKER
// =============================================================================

/// Cloneable handle the messaging core uses to enqueue notifications.
#[derive(Clone)]
pub struct NotifyQueue {
    tx: mpsc::Sender<NotifyRequest>,
}

impl NotifyQueue {
    /// Fire-and-forget enqueue. Sheds the request if the queue is full or
    /// the worker is gone.
    pub fn enqueue(&self, req: NotifyRequest) {
        if let Err(e) = self.tx.try_send(req) {
            warn!(error = %e, "notify: queue full or closed, dropping notification");
        }
    }
}

/// Spawn the dispatch worker. Returns the queue handle and the worker's
/// join handle for shutdown.
#[must_use]
pub fn spawn_notify_worker(sender: Arc<dyn PushSender>) -> (NotifyQueue, JoinHandle<()>) {
    let capacity = env_parse("NOTIFY_QUEUE_CAPACITY", DEFAULT_NOTIFY_QUEUE_CAPACITY);
    let (tx, mut rx) = mpsc::channel::<NotifyRequest>(capacity);
    info!(capacity, "notification dispatch worker configured");

    let handle = tokio::spawn(async move {
        while let Some(req) = rx.recv().await {
            match sender.send(&req).await {
                Ok(delivered) => {
                    info!(user_id = req.user_id, delivered, tag = %req.tag, "notify: delivered");
                }
                Err(e) => {
                    warn!(user_id = req.user_id, error = %e, "notify: delivery failed");
                }
            }
        }
    });

    (NotifyQueue { tx }, handle)
}

// =============================================================================
// WEB PUSH SENDER
// =============================================================================

/// Web-push delivery against endpoints stored in `push_subscriptions`.
/// Endpoints that answer 404/410 are pruned; credential management and
/// payload encryption belong to the subscribing edge, not this core.
pub struct WebPushSender {
    pool: PgPool,
    client: reqwest::Client,
    ttl_seconds: u32,
}

impl WebPushSender {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            client: reqwest::Client::new(),
            ttl_seconds: env_parse("PUSH_TTL_SECONDS", DEFAULT_PUSH_TTL_SECONDS),
        }
    }
}

#[async_trait]
impl PushSender for WebPushSender {
    async fn send(&self, req: &NotifyRequest) -> Result<usize, NotifyError> {
        let subscriptions = sqlx::query_as::<_, (i64, String)>(
            "SELECT id, endpoint FROM push_subscriptions WHERE user_id = $1",
        )
        .bind(req.user_id)
        .fetch_all(&self.pool)
        .await?;

        let payload = serde_json::json!({
            "title": req.title,
            "body": req.body,
            "tag": req.tag,
            "data": req.data,
        });

        let mut delivered = 0usize;
        let mut dead: Vec<i64> = Vec::new();
        for (sub_id, endpoint) in subscriptions {
            let result = self
                .client
                .post(&endpoint)
                .header("TTL", self.ttl_seconds)
                .json(&payload)
                .send()
                .await;
            match result {
                Ok(resp) if resp.status().is_success() => delivered += 1,
                Ok(resp) => {
                    let status = resp.status();
                    warn!(user_id = req.user_id, %status, "notify: endpoint rejected push");
                    if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
                        dead.push(sub_id);
                    }
                }
                Err(e) => {
                    warn!(user_id = req.user_id, error = %e, "notify: push request failed");
                }
            }
        }

        if !dead.is_empty() {
            let pruned = sqlx::query("DELETE FROM push_subscriptions WHERE id = ANY($1)")
                .bind(&dead)
                .execute(&self.pool)
                .await?
                .rows_affected();
            info!(user_id = req.user_id, pruned, "notify: pruned dead subscriptions");
        }

        Ok(delivered)
    }
}

#[cfg(test)]
#[path = "notify_test.rs"]
mod tests;
