//! Real-Time Connection Registry.
//!
//! Tracks which subscriber belongs to which user and stream so an
//! authorization check can run once at subscribe time rather than per
//! frame, and so an orderly shutdown can reach every open subscription.
//! A single `RwLock<HashMap<Uuid, ConnectionEntry>>`: reads (the common
//! case, per-frame authorization) never block each other.

use std::collections::HashMap;
use std::sync::Arc;

use hub_protocol::stream::Subscription;
use hub_protocol::HubError;
use hub_protocol::UserIdentity;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct ConnectionEntry {
    subscription: Subscription,
    user_id: Uuid,
    missed_pings: u32,
}

/// Authorizes and tracks live subscriber connections across all streams.
#[derive(Default)]
pub struct ConnectionRegistry {
    by_subscriber: RwLock<HashMap<Uuid, ConnectionEntry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly authorized subscription. Authorization itself
    /// (does `user` own or have read access to `stream_owner`) is the
    /// Execution Bridge's job; this registry only tracks the outcome.
    pub async fn register(&self, subscription: Subscription, user: &UserIdentity) {
        let entry = ConnectionEntry {
            subscription: subscription.clone(),
            user_id: user.user_id,
            missed_pings: 0,
        };
        self.by_subscriber
            .write()
            .await
            .insert(subscription.subscriber_id, entry);
    }

    pub async fn deregister(&self, subscriber_id: Uuid) {
        self.by_subscriber.write().await.remove(&subscriber_id);
    }

    pub async fn stream_id_for(&self, subscriber_id: Uuid) -> Option<Uuid> {
        self.by_subscriber
            .read()
            .await
            .get(&subscriber_id)
            .map(|entry| entry.subscription.stream_id)
    }

    /// Record one heartbeat tick's liveness check for `subscriber_id`:
    /// resets the missed-ping counter when `alive`, otherwise increments it.
    /// Returns whether the subscriber has now reached `missed_limit` and
    /// should be disconnected.
    pub async fn record_heartbeat(&self, subscriber_id: Uuid, alive: bool, missed_limit: u32) -> bool {
        match self.by_subscriber.write().await.get_mut(&subscriber_id) {
            Some(entry) if alive => {
                entry.missed_pings = 0;
                false
            }
            Some(entry) => {
                entry.missed_pings += 1;
                entry.missed_pings >= missed_limit
            }
            None => false,
        }
    }

    /// Confirm `subscriber_id` belongs to `user`, failing closed if the
    /// registry has no record (already deregistered, or never registered).
    pub async fn authorize(&self, subscriber_id: Uuid, user: &UserIdentity) -> Result<(), HubError> {
        match self.by_subscriber.read().await.get(&subscriber_id) {
            Some(entry) if entry.user_id == user.user_id => Ok(()),
            Some(_) => Err(HubError::Forbidden("subscription belongs to another user".into())),
            None => Err(HubError::Forbidden("no such subscription".into())),
        }
    }

    pub async fn subscriber_ids_for_stream(&self, stream_id: Uuid) -> Vec<Uuid> {
        self.by_subscriber
            .read()
            .await
            .values()
            .filter(|entry| entry.subscription.stream_id == stream_id)
            .map(|entry| entry.subscription.subscriber_id)
            .collect()
    }

    /// All subscriber ids currently registered, for an orderly shutdown
    /// sweep.
    pub async fn all_subscriber_ids(&self) -> Vec<Uuid> {
        self.by_subscriber.read().await.keys().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.by_subscriber.read().await.len()
    }
}

pub type SharedConnectionRegistry = Arc<ConnectionRegistry>;

#[cfg(test)]
mod tests {
    use super::*;
    use hub_protocol::Scope;

    fn user(id: Uuid) -> UserIdentity {
        UserIdentity::new(id, "acme").with_scopes([Scope::new("x")])
    }

    #[tokio::test]
    async fn authorize_fails_for_a_different_user() {
        let registry = ConnectionRegistry::new();
        let owner = user(Uuid::new_v4());
        let subscription = Subscription::new(Uuid::new_v4());
        registry.register(subscription.clone(), &owner).await;

        let stranger = user(Uuid::new_v4());
        let err = registry
            .authorize(subscription.subscriber_id, &stranger)
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Forbidden(_)));
    }

    #[tokio::test]
    async fn authorize_succeeds_for_the_owner() {
        let registry = ConnectionRegistry::new();
        let owner = user(Uuid::new_v4());
        let subscription = Subscription::new(Uuid::new_v4());
        registry.register(subscription.clone(), &owner).await;

        assert!(registry
            .authorize(subscription.subscriber_id, &owner)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn deregister_removes_the_entry() {
        let registry = ConnectionRegistry::new();
        let owner = user(Uuid::new_v4());
        let subscription = Subscription::new(Uuid::new_v4());
        registry.register(subscription.clone(), &owner).await;
        registry.deregister(subscription.subscriber_id).await;
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn record_heartbeat_resets_on_alive_and_trips_past_the_limit() {
        let registry = ConnectionRegistry::new();
        let owner = user(Uuid::new_v4());
        let subscription = Subscription::new(Uuid::new_v4());
        registry.register(subscription.clone(), &owner).await;

        assert!(!registry.record_heartbeat(subscription.subscriber_id, false, 2).await);
        assert!(registry.record_heartbeat(subscription.subscriber_id, false, 2).await);

        assert!(!registry.record_heartbeat(subscription.subscriber_id, true, 2).await);
        assert!(!registry.record_heartbeat(subscription.subscriber_id, false, 2).await);
    }

    #[tokio::test]
    async fn record_heartbeat_ignores_an_unregistered_subscriber() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.record_heartbeat(Uuid::new_v4(), false, 1).await);
    }
}
