//! File-backed `CatalogStore`.
//!
//! One YAML document per catalog, keyed by `name`, `display_name`,
//! `registry`, `disabled_servers`, `metadata`, written atomically
//! (write-to-temp, rename). Layout on disk:
//!
//! ```text
//! <root>/system_default.yaml
//! <root>/admin_base/<name>.yaml            (sorted filename = authoring order)
//! <root>/tenants/<tenant>/teams/<name>.yaml
//! <root>/tenants/<tenant>/users/<user_id>/personal.yaml
//! <root>/tenants/<tenant>/users/<user_id>/customizations.yaml
//! ```
//!
//! Team membership is resolved by tenant only: every team catalog filed
//! under a tenant applies to every user in that tenant. Finer-grained
//! membership belongs to a future backend, not this reference one.

#![deny(clippy::print_stdout, clippy::print_stderr)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

use std::path::Path;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use hub_core::catalog::CatalogStore;
use hub_protocol::CatalogDocument;
use hub_protocol::CatalogKind;
use hub_protocol::HubError;
use hub_protocol::ServerDefinition;
use hub_protocol::UserIdentity;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use tracing::debug;
use tracing::warn;
use uuid::Uuid;

/// `CatalogDocument`'s on-disk shape, which tracks `kind`/`owner` from the
/// document's location on disk rather than from the file itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CatalogFile {
    name: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    registry: BTreeMap<String, ServerDefinition>,
    #[serde(default)]
    disabled_servers: HashSet<String>,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    updated_at: DateTime<Utc>,
}

impl CatalogFile {
    fn into_document(self, kind: CatalogKind, owner: Option<String>) -> CatalogDocument {
        CatalogDocument {
            name: self.name,
            kind,
            owner,
            registry: self.registry,
            disabled: self.disabled_servers,
            metadata: self.metadata,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn from_document(doc: &CatalogDocument) -> Self {
        Self {
            name: doc.name.clone(),
            display_name: Some(doc.name.clone()),
            registry: doc.registry.clone(),
            disabled_servers: doc.disabled.clone(),
            metadata: doc.metadata.clone(),
            created_at: doc.created_at,
            updated_at: Utc::now(),
        }
    }
}

pub struct FileCatalogStore {
    root: PathBuf,
}

impl FileCatalogStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn admin_base_dir(&self) -> PathBuf {
        self.root.join("admin_base")
    }

    fn team_dir(&self, tenant: &str) -> PathBuf {
        self.root.join("tenants").join(tenant).join("teams")
    }

    fn user_dir(&self, tenant: &str, user_id: Uuid) -> PathBuf {
        self.root
            .join("tenants")
            .join(tenant)
            .join("users")
            .join(user_id.to_string())
    }

    async fn read_file(path: &Path) -> Result<Option<CatalogFile>, HubError> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => {
                let file: CatalogFile = serde_yaml::from_str(&contents)
                    .map_err(|e| HubError::StoreError(format!("{}: {e}", path.display())))?;
                Ok(Some(file))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(HubError::Io(e)),
        }
    }

    /// Read every `*.yaml` file directly under `dir`, sorted by filename so
    /// authoring order is stable across runs.
    async fn read_dir_sorted(dir: &Path) -> Result<Vec<CatalogFile>, HubError> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(HubError::Io(e)),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("yaml") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            if let Some(file) = Self::read_file(&path).await? {
                files.push(file);
            } else {
                warn!(path = %path.display(), "catalog file vanished during directory scan");
            }
        }
        Ok(files)
    }

    /// Write `doc` to `path` atomically: serialize to a sibling temp file,
    /// then rename over the destination.
    async fn write_atomic(path: &Path, file: &CatalogFile) -> Result<(), HubError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let yaml = serde_yaml::to_string(file)
            .map_err(|e| HubError::StoreError(format!("serializing {}: {e}", path.display())))?;
        let tmp_path = path.with_extension("yaml.tmp");
        tokio::fs::write(&tmp_path, yaml).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        debug!(path = %path.display(), "wrote catalog document");
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for FileCatalogStore {
    async fn load_system_default(&self) -> Result<Option<CatalogDocument>, HubError> {
        let path = self.root.join("system_default.yaml");
        Ok(Self::read_file(&path)
            .await?
            .map(|f| f.into_document(CatalogKind::SystemDefault, None)))
    }

    async fn load_admin_base(&self) -> Result<Vec<CatalogDocument>, HubError> {
        Ok(Self::read_dir_sorted(&self.admin_base_dir())
            .await?
            .into_iter()
            .map(|f| f.into_document(CatalogKind::AdminBase, None))
            .collect())
    }

    async fn load_team_catalogs_for(&self, user: &UserIdentity) -> Result<Vec<CatalogDocument>, HubError> {
        Ok(Self::read_dir_sorted(&self.team_dir(&user.tenant))
            .await?
            .into_iter()
            .map(|f| f.into_document(CatalogKind::Team, None))
            .collect())
    }

    async fn load_user_personal(&self, user: &UserIdentity) -> Result<Option<CatalogDocument>, HubError> {
        let path = self.user_dir(&user.tenant, user.user_id).join("personal.yaml");
        Ok(Self::read_file(&path)
            .await?
            .map(|f| f.into_document(CatalogKind::Personal, Some(user.to_string()))))
    }

    async fn load_user_customizations(&self, user: &UserIdentity) -> Result<Option<CatalogDocument>, HubError> {
        let path = self
            .user_dir(&user.tenant, user.user_id)
            .join("customizations.yaml");
        Ok(Self::read_file(&path)
            .await?
            .map(|f| f.into_document(CatalogKind::Customizations, Some(user.to_string()))))
    }

    async fn save_user_personal(&self, user: &UserIdentity, doc: CatalogDocument) -> Result<(), HubError> {
        let path = self.user_dir(&user.tenant, user.user_id).join("personal.yaml");
        Self::write_atomic(&path, &CatalogFile::from_document(&doc)).await
    }

    async fn save_admin_base(&self, doc: CatalogDocument) -> Result<(), HubError> {
        let path = self.admin_base_dir().join(format!("{}.yaml", doc.name));
        Self::write_atomic(&path, &CatalogFile::from_document(&doc)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_protocol::Scope;
    use std::collections::BTreeMap as Map;
    use tempfile::tempdir;

    fn user() -> UserIdentity {
        UserIdentity::new(Uuid::new_v4(), "acme").with_scopes([Scope::new("x")])
    }

    fn doc(name: &str) -> CatalogDocument {
        CatalogDocument {
            name: name.to_string(),
            kind: CatalogKind::Personal,
            owner: None,
            registry: Map::from([(
                "web".to_string(),
                ServerDefinition {
                    image: "nginx:1.25".to_string(),
                    command: Vec::new(),
                    env: Map::new(),
                    ports: Vec::new(),
                    volumes: Vec::new(),
                    mandatory: false,
                    enabled: true,
                    metadata: HashMap::new(),
                },
            )]),
            disabled: HashSet::new(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn round_trips_a_personal_catalog() {
        let dir = tempdir().unwrap();
        let store = FileCatalogStore::new(dir.path());
        let user = user();

        assert!(store.load_user_personal(&user).await.unwrap().is_none());

        store.save_user_personal(&user, doc("personal")).await.unwrap();
        let loaded = store.load_user_personal(&user).await.unwrap().unwrap();
        assert_eq!(loaded.registry["web"].image, "nginx:1.25");
        assert_eq!(loaded.kind, CatalogKind::Personal);
    }

    #[tokio::test]
    async fn admin_base_catalogs_are_returned_in_filename_order() {
        let dir = tempdir().unwrap();
        let store = FileCatalogStore::new(dir.path());

        store.save_admin_base(doc("b_second")).await.unwrap();
        store.save_admin_base(doc("a_first")).await.unwrap();

        let loaded = store.load_admin_base().await.unwrap();
        let names: Vec<_> = loaded.iter().map(|d| d.name.clone()).collect();
        assert_eq!(names, vec!["a_first", "b_second"]);
    }

    #[tokio::test]
    async fn missing_system_default_is_none_not_an_error() {
        let dir = tempdir().unwrap();
        let store = FileCatalogStore::new(dir.path());
        assert!(store.load_system_default().await.unwrap().is_none());
    }
}
