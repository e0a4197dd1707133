use super::*;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::{Duration, timeout};

struct RecordingSender {
    seen: Mutex<Vec<NotifyRequest>>,
    notify: tokio::sync::Notify,
}

impl RecordingSender {
    fn new() -> Arc<Self> {
        Arc::new(Self { seen: Mutex::new(Vec::new()), notify: tokio::sync::Notify::new() })
    }
}

#[async_trait]
impl PushSender for RecordingSender {
    async fn send(&self, req: &NotifyRequest) -> Result<usize, NotifyError> {
        self.seen.lock().expect("mutex").push(req.clone());
        self.notify.notify_one();
        Ok(1)
    }
}

struct FailingSender {
    attempts: AtomicUsize,
    notify: tokio::sync::Notify,
}

#[async_trait]
impl PushSender for FailingSender {
    async fn send(&self, _req: &NotifyRequest) -> Result<usize, NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_one();
        Err(NotifyError::Delivery("endpoint unreachable".into()))
    }
}

fn request(user_id: i64, tag: &str) -> NotifyRequest {
    NotifyRequest {
        user_id,
        title: "New task".into(),
        body: "Ship the release".into(),
        tag: tag.into(),
        data: serde_json::json!({ "type": "task", "task_id": 7 }),
    }
}

#[tokio::test]
async fn worker_drains_queue_in_order() {
    let sender = RecordingSender::new();
    let (queue, _handle) = spawn_notify_worker(sender.clone());

    queue.enqueue(request(1, "task-1"));
    queue.enqueue(request(2, "task-2"));

    for _ in 0..2 {
        timeout(Duration::from_millis(500), sender.notify.notified())
            .await
            .expect("worker should process the request");
    }

    let seen = sender.seen.lock().expect("mutex");
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].user_id, 1);
    assert_eq!(seen[1].user_id, 2);
    assert_eq!(seen[0].tag, "task-1");
}

#[tokio::test]
async fn delivery_failure_is_swallowed_and_worker_keeps_running() {
    let sender = Arc::new(FailingSender { attempts: AtomicUsize::new(0), notify: tokio::sync::Notify::new() });
    let (queue, handle) = spawn_notify_worker(sender.clone());

    queue.enqueue(request(1, "task-1"));
    timeout(Duration::from_millis(500), sender.notify.notified())
        .await
        .expect("first attempt");

    // A failure must not kill the worker; the next request is still processed.
    queue.enqueue(request(1, "task-2"));
    timeout(Duration::from_millis(500), sender.notify.notified())
        .await
        .expect("second attempt");

    assert_eq!(sender.attempts.load(Ordering::SeqCst), 2);
    assert!(!handle.is_finished());
}

#[tokio::test]
async fn enqueue_after_worker_shutdown_is_a_silent_drop() {
    let sender = RecordingSender::new();
    let (queue, handle) = spawn_notify_worker(sender.clone());
    handle.abort();
    let _ = handle.await;

    // Must not panic or block.
    queue.enqueue(request(9, "task-9"));
}
