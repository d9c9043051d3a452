//! Catalog data model: `CatalogDocument`, `ServerDefinition`,
//! `ResolvedCatalog`, and the provenance types the resolution engine emits.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// The tier a `CatalogDocument` belongs to; also its precedence family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogKind {
    SystemDefault,
    AdminBase,
    Team,
    Personal,
    Customizations,
    Resolved,
}

/// A named, versioned document mapping server names to definitions, plus a
/// disabled set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogDocument {
    pub name: String,
    pub kind: CatalogKind,
    /// Absent for system-default and admin-base documents.
    pub owner: Option<String>,
    pub registry: BTreeMap<String, ServerDefinition>,
    pub disabled: HashSet<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CatalogDocument {
    /// A document is ill-formed if a server name appears in both `registry`
    /// and `disabled`.
    pub fn is_well_formed(&self) -> bool {
        !self
            .registry
            .keys()
            .any(|name| self.disabled.contains(name))
    }
}

/// A named runnable server. Invariant: `image` is non-empty,
/// checked by callers via [`ServerDefinition::is_valid`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDefinition {
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    #[serde(default)]
    pub volumes: Vec<VolumeMapping>,
    /// A `mandatory` server cannot be suppressed by a downstream layer's
    /// `disabled` entry.
    #[serde(default)]
    pub mandatory: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

fn default_true() -> bool {
    true
}

impl ServerDefinition {
    pub fn is_valid(&self) -> bool {
        !self.image.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortMapping {
    pub host_port: u16,
    pub container_port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeMapping {
    pub host_path: String,
    pub container_path: String,
    #[serde(default)]
    pub read_only: bool,
}

/// One per override or suppressed disable. Records decisions,
/// not errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub server_name: String,
    pub winning_source: String,
    pub overridden_source: String,
    pub reason: String,
}

/// One contributing layer, in the order the merge processed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogSource {
    pub kind: CatalogKind,
    pub name: String,
    pub precedence: i64,
    pub contributed_server_count: usize,
}

/// The output of the resolution engine for one user at one point in time.
/// Not persisted; cached by the Resolution Cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedCatalog {
    pub registry: BTreeMap<String, ServerDefinition>,
    pub sources: Vec<CatalogSource>,
    pub conflicts: Vec<ConflictRecord>,
    #[serde(skip)]
    pub resolution_duration: Duration,
}

impl Default for ResolvedCatalog {
    fn default() -> Self {
        Self {
            registry: BTreeMap::new(),
            sources: Vec::new(),
            conflicts: Vec::new(),
            resolution_duration: Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(image: &str) -> ServerDefinition {
        ServerDefinition {
            image: image.to_string(),
            command: Vec::new(),
            env: BTreeMap::new(),
            ports: Vec::new(),
            volumes: Vec::new(),
            mandatory: false,
            enabled: true,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn ill_formed_when_name_in_both_registry_and_disabled() {
        let mut doc = CatalogDocument {
            name: "personal".into(),
            kind: CatalogKind::Personal,
            owner: Some("u1".into()),
            registry: BTreeMap::from([("foo".to_string(), def("alpine:1"))]),
            disabled: HashSet::new(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(doc.is_well_formed());
        doc.disabled.insert("foo".to_string());
        assert!(!doc.is_well_formed());
    }

    #[test]
    fn server_definition_requires_non_empty_image() {
        assert!(def("alpine:1").is_valid());
        assert!(!def("").is_valid());
    }
}
