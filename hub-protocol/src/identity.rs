//! The authenticated caller identity the core consumes at its boundary.
//!
//! Provider, token format, and refresh are external; the core
//! only ever sees the result of that exchange.

use std::collections::HashSet;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// An opaque permission string matched against a command's required scopes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope(pub String);

impl Scope {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Scope {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A stable opaque identity: a UUID, a tenant tag, and the set of scopes the
/// caller currently holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub user_id: Uuid,
    pub tenant: String,
    pub scopes: HashSet<Scope>,
}

impl UserIdentity {
    pub fn new(user_id: Uuid, tenant: impl Into<String>) -> Self {
        Self {
            user_id,
            tenant: tenant.into(),
            scopes: HashSet::new(),
        }
    }

    pub fn with_scopes(mut self, scopes: impl IntoIterator<Item = Scope>) -> Self {
        self.scopes.extend(scopes);
        self
    }

    pub fn has_scope(&self, scope: &Scope) -> bool {
        self.scopes.contains(scope)
    }

    pub fn has_all_scopes(&self, required: &[Scope]) -> bool {
        required.iter().all(|s| self.has_scope(s))
    }
}

impl fmt::Display for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant, self.user_id)
    }
}
