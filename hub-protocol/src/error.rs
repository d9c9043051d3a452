//! Error taxonomy shared by every component.
//!
//! Each variant names a *kind*, not a type: validation and authorization
//! errors carry enough detail to render a client response; infrastructure
//! failures wrap the underlying `io`/`serde` error via `#[from]`.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, HubError>;

/// One failing field from input validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub reason: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

#[derive(Error, Debug)]
pub enum HubError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("invalid arguments: {}", join_field_errors(.0))]
    InvalidArguments(Vec<FieldError>),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("rate limited, retry after {0:?}")]
    RateLimited(Duration),

    #[error("failed to spawn external tool: {0}")]
    SpawnFailed(String),

    #[error("external tool is missing or not executable: {0}")]
    ExecFailed(String),

    #[error("command exceeded its deadline")]
    Timeout,

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("catalog store error: {0}")]
    StoreError(String),

    #[error("catalog resolution failed: {0}")]
    ResolveError(String),

    #[error("subscriber queue full, dropped as slow")]
    DroppedSlow,

    #[error("stream not found: {0}")]
    StreamNotFound(Uuid),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    TokioJoin(#[from] tokio::task::JoinError),
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
