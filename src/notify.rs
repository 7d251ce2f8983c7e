use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

/// Event names published on job state changes.
pub mod events {
    pub const JOB_QUEUED: &str = "job_queued";
    pub const JOB_STARTED: &str = "job_started";
    pub const JOB_COMPLETED: &str = "job_completed";
    pub const JOB_FAILED: &str = "job_failed";
}

/// Fire-and-forget delivery of job state changes. No acknowledgment and no
/// retries; a lost notification is acceptable, callers can always read the
/// record store.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, event: &str, payload: Value);

    async fn publish_to_user(&self, owner_id: &str, event: &str, payload: Value);
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub event: String,
    /// `None` for global-feed events.
    pub owner_id: Option<String>,
    pub payload: Value,
}

/// Broadcast-channel sink. The transport layer subscribes and forwards
/// notifications to connected clients; with no subscribers, sends are
/// silently dropped.
#[derive(Debug)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl NotificationSink for BroadcastNotifier {
    async fn publish(&self, event: &str, payload: Value) {
        let _ = self.tx.send(Notification {
            event: event.to_string(),
            owner_id: None,
            payload,
        });
    }

    async fn publish_to_user(&self, owner_id: &str, event: &str, payload: Value) {
        let _ = self.tx.send(Notification {
            event: event.to_string(),
            owner_id: Some(owner_id.to_string()),
            payload,
        });
    }
}
