//! Audit Sink.
//!
//! The core only commits to emitting these events in order per user;
//! storage is an external collaborator. [`InMemoryAuditSink`] is a
//! reference implementation so the bridge and its tests have something
//! concrete to assert against.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use hub_protocol::AuditEvent;
use hub_protocol::UserIdentity;
use tokio::sync::Mutex;
use tracing::debug;

/// Append is at-least-once; the sink may buffer but must not silently drop.
/// Ordering per `user_identity` is preserved.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, event: AuditEvent);
}

/// Bounded in-memory ring buffer per user, sufficient for tests and for a
/// development deployment with no external audit store wired up.
pub struct InMemoryAuditSink {
    capacity_per_user: usize,
    events: Mutex<HashMap<uuid::Uuid, Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn new(capacity_per_user: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity_per_user,
            events: Mutex::new(HashMap::new()),
        })
    }

    pub async fn events_for(&self, user: &UserIdentity) -> Vec<AuditEvent> {
        self.events
            .lock()
            .await
            .get(&user.user_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn append(&self, event: AuditEvent) {
        debug!(outcome = ?event.outcome, command = %event.command_id, "audit event");
        let mut events = self.events.lock().await;
        let bucket = events.entry(event.user.user_id).or_default();
        bucket.push(event);
        if bucket.len() > self.capacity_per_user {
            let overflow = bucket.len() - self.capacity_per_user;
            bucket.drain(0..overflow);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_protocol::AuditOutcome;
    use hub_protocol::CommandId;
    use hub_protocol::Scope;

    #[tokio::test]
    async fn preserves_per_user_ordering() {
        let sink = InMemoryAuditSink::new(16);
        let user = UserIdentity::new(uuid::Uuid::new_v4(), "acme").with_scopes([Scope::new("x")]);
        let command = CommandId::new("server_enable");
        let request_id = uuid::Uuid::new_v4();

        sink.append(AuditEvent::new(
            user.clone(),
            command.clone(),
            request_id,
            AuditOutcome::Admitted,
            "",
        ))
        .await;
        sink.append(AuditEvent::new(
            user.clone(),
            command.clone(),
            request_id,
            AuditOutcome::Completed,
            "",
        ))
        .await;

        let events = sink.events_for(&user).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].outcome, AuditOutcome::Admitted);
        assert_eq!(events[1].outcome, AuditOutcome::Completed);
    }
}
