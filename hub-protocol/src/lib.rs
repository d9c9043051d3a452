//! Shared value types for the catalog resolution engine and command
//! execution bridge.
//!
//! This crate carries no behavior beyond simple constructors and
//! `Display`/`serde` impls: every type here is a plain data carrier that
//! crosses the boundary between `hub-core` and whatever HTTP layer,
//! persistence layer, or CLI consumes it.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod audit;
pub mod catalog;
pub mod command;
pub mod error;
pub mod execution;
pub mod identity;
pub mod stream;

pub use audit::AuditEvent;
pub use audit::AuditOutcome;
pub use catalog::CatalogDocument;
pub use catalog::CatalogKind;
pub use catalog::CatalogSource;
pub use catalog::ConflictRecord;
pub use catalog::ResolvedCatalog;
pub use catalog::ServerDefinition;
pub use command::ArgSpec;
pub use command::ArgType;
pub use command::CommandId;
pub use command::CommandSpec;
pub use error::HubError;
pub use error::Result;
pub use execution::ExecutionRequest;
pub use execution::ExecutionResult;
pub use identity::Scope;
pub use identity::UserIdentity;
pub use stream::Frame;
pub use stream::FrameChannel;
pub use stream::StreamHandle;
pub use stream::StreamState;
pub use stream::Subscription;
