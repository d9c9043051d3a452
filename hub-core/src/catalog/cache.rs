//! Resolution Cache.
//!
//! TTL-bounded, per-user cache of `ResolvedCatalog`s with single-flight
//! stampede avoidance: a `Mutex<HashMap<UserId, Arc<OnceCell<..>>>>` guard
//! map locks one slot at a time rather than the whole map.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hub_protocol::HubError;
use hub_protocol::ResolvedCatalog;
use hub_protocol::UserIdentity;
use tokio::sync::Mutex;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use uuid::Uuid;

use super::store::CatalogStore;
use super::resolver::resolve;

struct CacheEntry {
    resolved: ResolvedCatalog,
    loaded_at: Instant,
}

/// One in-flight-or-complete resolution slot per user. A second caller for
/// the same user awaits the first's `OnceCell` rather than re-resolving.
/// The error is stored as a rendered string rather than `HubError` itself
/// since the latter wraps non-`Clone` sources (`io::Error`, `JoinError`)
/// and every waiter on the cell needs its own owned copy of the outcome.
type Slot = Arc<OnceCell<Result<ResolvedCatalog, String>>>;

pub struct ResolutionCache {
    ttl: Duration,
    entries: Mutex<HashMap<Uuid, CacheEntry>>,
    inflight: Mutex<HashMap<Uuid, Slot>>,
}

impl ResolutionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve `user`'s catalog, serving a fresh cache entry if one exists,
    /// otherwise resolving via `store` with at most one concurrent
    /// resolution per user.
    pub async fn resolve_cached(
        &self,
        store: &dyn CatalogStore,
        user: &UserIdentity,
    ) -> Result<ResolvedCatalog, HubError> {
        if let Some(cached) = self.fresh_entry(user.user_id).await {
            return Ok(cached);
        }

        let slot = {
            let mut inflight = self.inflight.lock().await;
            inflight
                .entry(user.user_id)
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let result = slot
            .get_or_init(|| async { resolve(store, user).await.map_err(|e| e.to_string()) })
            .await
            .clone();

        // Whoever wins the OnceCell race is responsible for publishing the
        // result to the TTL cache and clearing the in-flight slot so the
        // next call after TTL expiry resolves fresh rather than replaying
        // this stale `OnceCell`.
        self.inflight.lock().await.remove(&user.user_id);
        if let Ok(resolved) = &result {
            self.entries.lock().await.insert(
                user.user_id,
                CacheEntry {
                    resolved: resolved.clone(),
                    loaded_at: Instant::now(),
                },
            );
        }

        result.map_err(HubError::ResolveError)
    }

    async fn fresh_entry(&self, user_id: Uuid) -> Option<ResolvedCatalog> {
        let entries = self.entries.lock().await;
        let entry = entries.get(&user_id)?;
        if entry.loaded_at.elapsed() < self.ttl {
            Some(entry.resolved.clone())
        } else {
            None
        }
    }

    pub async fn invalidate(&self, user_id: Uuid) {
        self.entries.lock().await.remove(&user_id);
    }

    pub async fn invalidate_all(&self) {
        self.entries.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hub_protocol::CatalogDocument;
    use hub_protocol::Scope;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    #[derive(Default)]
    struct CountingStore {
        personal_loads: AtomicUsize,
    }

    #[async_trait]
    impl CatalogStore for CountingStore {
        async fn load_system_default(&self) -> Result<Option<CatalogDocument>, HubError> {
            Ok(None)
        }
        async fn load_admin_base(&self) -> Result<Vec<CatalogDocument>, HubError> {
            Ok(Vec::new())
        }
        async fn load_team_catalogs_for(&self, _user: &UserIdentity) -> Result<Vec<CatalogDocument>, HubError> {
            Ok(Vec::new())
        }
        async fn load_user_personal(&self, _user: &UserIdentity) -> Result<Option<CatalogDocument>, HubError> {
            self.personal_loads.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
        async fn load_user_customizations(&self, _user: &UserIdentity) -> Result<Option<CatalogDocument>, HubError> {
            Ok(None)
        }
        async fn save_user_personal(&self, _user: &UserIdentity, _doc: CatalogDocument) -> Result<(), HubError> {
            Ok(())
        }
        async fn save_admin_base(&self, _doc: CatalogDocument) -> Result<(), HubError> {
            Ok(())
        }
    }

    fn user() -> UserIdentity {
        UserIdentity::new(Uuid::new_v4(), "acme").with_scopes([Scope::new("x")])
    }

    #[tokio::test]
    async fn second_call_within_ttl_is_a_cache_hit() {
        let store = CountingStore::default();
        let cache = ResolutionCache::new(Duration::from_secs(60));
        let user = user();

        cache.resolve_cached(&store, &user).await.unwrap();
        cache.resolve_cached(&store, &user).await.unwrap();

        assert_eq!(store.personal_loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_a_fresh_resolution() {
        let store = CountingStore::default();
        let cache = ResolutionCache::new(Duration::from_secs(60));
        let user = user();

        cache.resolve_cached(&store, &user).await.unwrap();
        cache.invalidate(user.user_id).await;
        cache.resolve_cached(&store, &user).await.unwrap();

        assert_eq!(store.personal_loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn expired_ttl_is_treated_as_a_miss() {
        let store = CountingStore::default();
        let cache = ResolutionCache::new(Duration::from_millis(10));
        let user = user();

        cache.resolve_cached(&store, &user).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        cache.resolve_cached(&store, &user).await.unwrap();

        assert_eq!(store.personal_loads.load(Ordering::SeqCst), 2);
    }
}
