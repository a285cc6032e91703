use chrono::Utc;
use redis::aio::ConnectionManager;
use tokio::sync::broadcast;

use crate::models::{AttendanceChange, ChangeKind};

const LOCAL_CHANNEL_CAPACITY: usize = 256;

/// Notify-on-write side channel for dashboards.
///
/// Changes go to an in-process broadcast channel (feeds the SSE stream) and,
/// when Redis is configured, are published on `attendance:{session_id}` for
/// other processes. Publishing never fails the write that triggered it.
#[derive(Clone)]
pub struct AttendanceNotifier {
    local: broadcast::Sender<AttendanceChange>,
    redis: Option<ConnectionManager>,
}

impl AttendanceNotifier {
    pub fn new(redis: Option<ConnectionManager>) -> Self {
        let (local, _) = broadcast::channel(LOCAL_CHANNEL_CAPACITY);
        Self { local, redis }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AttendanceChange> {
        self.local.subscribe()
    }

    pub fn notify(&self, session_id: &str, student_id: Option<&str>, kind: ChangeKind) {
        self.publish(AttendanceChange {
            session_id: session_id.to_string(),
            student_id: student_id.map(str::to_string),
            kind,
            at: Utc::now(),
        });
    }

    pub fn publish(&self, change: AttendanceChange) {
        // Err only means nobody is listening right now.
        let _ = self.local.send(change.clone());

        let Some(redis) = &self.redis else {
            return;
        };
        let mut conn = redis.clone();
        tokio::spawn(async move {
            let channel = format!("attendance:{}", change.session_id);
            let payload = match serde_json::to_string(&change) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!("Failed to encode attendance change: {}", e);
                    return;
                }
            };
            if let Err(e) = redis::cmd("PUBLISH")
                .arg(&channel)
                .arg(payload)
                .query_async::<i64>(&mut conn)
                .await
            {
                tracing::warn!("Failed to publish attendance change on {}: {}", channel, e);
            }
        });
    }
}
