//! Catalog Resolution Engine.
//!
//! A pure merge over layers collected via the Catalog Store: lower
//! precedence number wins, later layers in processing order overwrite
//! earlier ones, and every decision is recorded either as an installed
//! server or a `ConflictRecord`. The merge itself never touches the
//! resolution cache or the store directly — callers (the bridge, or
//! `resolve_cached` below) own that composition, keeping the merge itself a
//! pure function of its collected layers.

use std::collections::BTreeMap;
use std::time::Instant;

use hub_protocol::CatalogDocument;
use hub_protocol::CatalogKind;
use hub_protocol::CatalogSource;
use hub_protocol::ConflictRecord;
use hub_protocol::HubError;
use hub_protocol::ResolvedCatalog;
use hub_protocol::ServerDefinition;
use hub_protocol::UserIdentity;

use super::store::CatalogStore;

struct Layer {
    kind: CatalogKind,
    name: String,
    precedence: i64,
    doc: CatalogDocument,
}

/// Collect every layer that applies to `user` via `store`, in authoring
/// order (precedence is assigned here, sorted by the caller).
async fn collect_layers(store: &dyn CatalogStore, user: &UserIdentity) -> Result<Vec<Layer>, HubError> {
    let mut layers = Vec::new();

    if let Some(doc) = store.load_system_default().await? {
        layers.push(Layer {
            kind: CatalogKind::SystemDefault,
            name: doc.name.clone(),
            precedence: 1000,
            doc,
        });
    }

    for (i, doc) in store.load_admin_base().await?.into_iter().enumerate() {
        layers.push(Layer {
            kind: CatalogKind::AdminBase,
            name: doc.name.clone(),
            precedence: 500 - i as i64,
            doc,
        });
    }

    for (i, doc) in store.load_team_catalogs_for(user).await?.into_iter().enumerate() {
        layers.push(Layer {
            kind: CatalogKind::Team,
            name: doc.name.clone(),
            precedence: 200 - i as i64,
            doc,
        });
    }

    if let Some(doc) = store.load_user_personal(user).await? {
        layers.push(Layer {
            kind: CatalogKind::Personal,
            name: doc.name.clone(),
            precedence: 50,
            doc,
        });
    }

    if let Some(doc) = store.load_user_customizations(user).await? {
        layers.push(Layer {
            kind: CatalogKind::Customizations,
            name: doc.name.clone(),
            precedence: 10,
            doc,
        });
    }

    Ok(layers)
}

/// Run the resolution algorithm against `store` for `user`.
pub async fn resolve(store: &dyn CatalogStore, user: &UserIdentity) -> Result<ResolvedCatalog, HubError> {
    let started = Instant::now();
    let mut layers = collect_layers(store, user).await?;
    // Processing order: lowest-priority first (highest precedence number
    // first) so that higher-priority layers overwrite later in the loop.
    layers.sort_by(|a, b| b.precedence.cmp(&a.precedence));

    let mut registry: BTreeMap<String, ServerDefinition> = BTreeMap::new();
    let mut installed_from: BTreeMap<String, String> = BTreeMap::new();
    let mut conflicts = Vec::new();
    let mut sources = Vec::new();

    for layer in &layers {
        let mut contributed = 0usize;

        for (name, definition) in &layer.doc.registry {
            if let Some(previous_source) = installed_from.get(name) {
                conflicts.push(ConflictRecord {
                    server_name: name.clone(),
                    winning_source: layer.name.clone(),
                    overridden_source: previous_source.clone(),
                    reason: format!("higher precedence ({})", layer.precedence),
                });
            }
            registry.insert(name.clone(), definition.clone());
            installed_from.insert(name.clone(), layer.name.clone());
            contributed += 1;
        }

        for name in &layer.doc.disabled {
            match registry.get(name) {
                Some(existing) if existing.mandatory => {
                    conflicts.push(ConflictRecord {
                        server_name: name.clone(),
                        winning_source: installed_from
                            .get(name)
                            .cloned()
                            .unwrap_or_else(|| "unknown".to_string()),
                        overridden_source: layer.name.clone(),
                        reason: "cannot disable mandatory server".to_string(),
                    });
                }
                Some(_) => {
                    registry.remove(name);
                    installed_from.remove(name);
                }
                None => {}
            }
        }

        sources.push(CatalogSource {
            kind: layer.kind,
            name: layer.name.clone(),
            precedence: layer.precedence,
            contributed_server_count: contributed,
        });
    }

    for (name, definition) in &registry {
        if !definition.is_valid() {
            return Err(HubError::ResolveError(format!(
                "server '{name}' has an empty image after merge"
            )));
        }
    }

    // Provenance is emitted in descending priority, i.e. ascending
    // precedence number.
    sources.sort_by(|a, b| a.precedence.cmp(&b.precedence));

    Ok(ResolvedCatalog {
        registry,
        sources,
        conflicts,
        resolution_duration: started.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use hub_protocol::Scope;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    fn def(image: &str, mandatory: bool) -> ServerDefinition {
        ServerDefinition {
            image: image.to_string(),
            command: Vec::new(),
            env: BTreeMap::new(),
            ports: Vec::new(),
            volumes: Vec::new(),
            mandatory,
            enabled: true,
            metadata: HashMap::new(),
        }
    }

    fn doc(name: &str, kind: CatalogKind, registry: &[(&str, ServerDefinition)], disabled: &[&str]) -> CatalogDocument {
        CatalogDocument {
            name: name.to_string(),
            kind,
            owner: None,
            registry: registry.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            disabled: disabled.iter().map(|s| s.to_string()).collect(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[derive(Default)]
    struct FixtureStore {
        system_default: Mutex<Option<CatalogDocument>>,
        admin_base: Mutex<Vec<CatalogDocument>>,
        team: Mutex<Vec<CatalogDocument>>,
        personal: Mutex<Option<CatalogDocument>>,
        customizations: Mutex<Option<CatalogDocument>>,
    }

    #[async_trait]
    impl CatalogStore for FixtureStore {
        async fn load_system_default(&self) -> Result<Option<CatalogDocument>, HubError> {
            Ok(self.system_default.lock().await.clone())
        }
        async fn load_admin_base(&self) -> Result<Vec<CatalogDocument>, HubError> {
            Ok(self.admin_base.lock().await.clone())
        }
        async fn load_team_catalogs_for(&self, _user: &UserIdentity) -> Result<Vec<CatalogDocument>, HubError> {
            Ok(self.team.lock().await.clone())
        }
        async fn load_user_personal(&self, _user: &UserIdentity) -> Result<Option<CatalogDocument>, HubError> {
            Ok(self.personal.lock().await.clone())
        }
        async fn load_user_customizations(&self, _user: &UserIdentity) -> Result<Option<CatalogDocument>, HubError> {
            Ok(self.customizations.lock().await.clone())
        }
        async fn save_user_personal(&self, _user: &UserIdentity, doc: CatalogDocument) -> Result<(), HubError> {
            *self.personal.lock().await = Some(doc);
            Ok(())
        }
        async fn save_admin_base(&self, doc: CatalogDocument) -> Result<(), HubError> {
            self.admin_base.lock().await.push(doc);
            Ok(())
        }
    }

    fn user() -> UserIdentity {
        UserIdentity::new(uuid::Uuid::new_v4(), "acme").with_scopes([Scope::new("x")])
    }

    #[tokio::test]
    async fn empty_store_resolves_to_empty_registry_without_error() {
        let store = FixtureStore::default();
        let resolved = resolve(&store, &user()).await.unwrap();
        assert!(resolved.registry.is_empty());
        assert!(resolved.conflicts.is_empty());
    }

    #[tokio::test]
    async fn personal_addition_with_no_conflict() {
        let store = FixtureStore::default();
        *store.personal.lock().await = Some(doc(
            "personal",
            CatalogKind::Personal,
            &[("bar", def("nginx:1.25", false))],
            &[],
        ));
        let resolved = resolve(&store, &user()).await.unwrap();
        assert_eq!(resolved.registry["bar"].image, "nginx:1.25");
        assert!(resolved.conflicts.is_empty());
    }

    #[tokio::test]
    async fn personal_overrides_team_and_records_conflict() {
        let store = FixtureStore::default();
        store
            .team
            .lock()
            .await
            .push(doc("team", CatalogKind::Team, &[("baz", def("x:1", false))], &[]));
        *store.personal.lock().await = Some(doc(
            "personal",
            CatalogKind::Personal,
            &[("baz", def("x:2", false))],
            &[],
        ));

        let resolved = resolve(&store, &user()).await.unwrap();
        assert_eq!(resolved.registry["baz"].image, "x:2");
        assert_eq!(resolved.conflicts.len(), 1);
        assert_eq!(resolved.conflicts[0].winning_source, "personal");
    }

    #[tokio::test]
    async fn mandatory_server_cannot_be_disabled() {
        let store = FixtureStore::default();
        store.admin_base.lock().await.push(doc(
            "base",
            CatalogKind::AdminBase,
            &[("core", def("alpine:1", true))],
            &[],
        ));
        *store.personal.lock().await = Some(doc("personal", CatalogKind::Personal, &[], &["core"]));

        let resolved = resolve(&store, &user()).await.unwrap();
        assert!(resolved.registry.contains_key("core"));
        assert_eq!(resolved.conflicts.len(), 1);
        assert_eq!(resolved.conflicts[0].reason, "cannot disable mandatory server");
    }

    #[tokio::test]
    async fn non_mandatory_server_can_be_disabled() {
        let store = FixtureStore::default();
        store.admin_base.lock().await.push(doc(
            "base",
            CatalogKind::AdminBase,
            &[("core", def("alpine:1", false))],
            &[],
        ));
        *store.personal.lock().await = Some(doc("personal", CatalogKind::Personal, &[], &["core"]));

        let resolved = resolve(&store, &user()).await.unwrap();
        assert!(!resolved.registry.contains_key("core"));
    }

    #[tokio::test]
    async fn empty_image_after_merge_is_a_resolve_error() {
        let store = FixtureStore::default();
        *store.personal.lock().await = Some(doc(
            "personal",
            CatalogKind::Personal,
            &[("bad", def("", false))],
            &[],
        ));
        let err = resolve(&store, &user()).await.unwrap_err();
        assert!(matches!(err, HubError::ResolveError(_)));
    }

    #[tokio::test]
    async fn sources_are_ordered_by_descending_priority() {
        let store = FixtureStore::default();
        *store.personal.lock().await = Some(doc("personal", CatalogKind::Personal, &[], &[]));
        store.admin_base.lock().await.push(doc("base", CatalogKind::AdminBase, &[], &[]));

        let resolved = resolve(&store, &user()).await.unwrap();
        let precedences: Vec<i64> = resolved.sources.iter().map(|s| s.precedence).collect();
        let mut sorted = precedences.clone();
        sorted.sort();
        assert_eq!(precedences, sorted);
    }
}
