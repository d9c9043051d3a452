//! Root of the `hub-core` library.
//!
//! Implements the admission pipeline (C1–C4), the subprocess execution
//! layer (C5, C6, C11) behind the Execution Bridge (C7), and the catalog
//! resolution stack (C8–C10). All wire types, errors, and identities live
//! in `hub_protocol`; this crate only implements behavior.

#![deny(clippy::print_stdout, clippy::print_stderr)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod audit;
pub mod bridge;
pub mod catalog;
pub mod command_registry;
pub mod config;
pub mod connections;
pub mod rate_limiter;
pub mod runner;
pub mod stream;
pub mod util;
pub mod validator;

pub use audit::AuditSink;
pub use audit::InMemoryAuditSink;
pub use bridge::CommandMapper;
pub use bridge::ExecutionBridge;
pub use catalog::CatalogStore;
pub use catalog::ResolutionCache;
pub use command_registry::CommandRegistry;
pub use config::ConfigOverrides;
pub use config::ConfigToml;
pub use config::CoreConfig;
pub use connections::ConnectionRegistry;
pub use rate_limiter::RateLimiter;
pub use runner::Runner;
pub use stream::StreamMultiplexer;
pub use validator::Validator;
