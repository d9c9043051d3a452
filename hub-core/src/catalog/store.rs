//! Catalog Store Interface.
//!
//! The resolution engine's only door to durable storage. Implementations
//! (file-backed YAML, a relational table with row-level security) live
//! outside this crate; `hub-store` provides the file-backed one.

use async_trait::async_trait;
use hub_protocol::CatalogDocument;
use hub_protocol::HubError;
use hub_protocol::UserIdentity;

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn load_system_default(&self) -> Result<Option<CatalogDocument>, HubError>;

    /// Zero or more, order preserved as authoring order.
    async fn load_admin_base(&self) -> Result<Vec<CatalogDocument>, HubError>;

    async fn load_team_catalogs_for(&self, user: &UserIdentity) -> Result<Vec<CatalogDocument>, HubError>;

    async fn load_user_personal(&self, user: &UserIdentity) -> Result<Option<CatalogDocument>, HubError>;

    async fn load_user_customizations(&self, user: &UserIdentity) -> Result<Option<CatalogDocument>, HubError>;

    async fn save_user_personal(&self, user: &UserIdentity, doc: CatalogDocument) -> Result<(), HubError>;

    async fn save_admin_base(&self, doc: CatalogDocument) -> Result<(), HubError>;
}
