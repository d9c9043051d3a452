//! `hubctl`: a thin, non-interactive binary over `hub-core`.
//!
//! Not the HTTP layer — the web surface is a separate, external RPC
//! service. Exists to give the workspace a runnable surface for
//! integration tests and local exploration: resolve a user's catalog, or
//! execute one whitelisted command and print its result.

#![deny(clippy::print_stdout, clippy::print_stderr)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod cli;
mod mapper;

use std::collections::HashMap;
use std::sync::Arc;

use hub_core::bridge::ExecutionBridge;
use hub_core::catalog::ResolutionCache;
use hub_core::command_registry::default_whitelist;
use hub_core::command_registry::CommandRegistry;
use hub_core::config::ConfigOverrides;
use hub_core::config::CoreConfig;
use hub_core::InMemoryAuditSink;
use hub_protocol::execution::ExecutionRequest;
use hub_protocol::CommandId;
use hub_protocol::Scope;
use hub_protocol::UserIdentity;
use hub_store::FileCatalogStore;

pub use cli::Cli;
pub use cli::Command;

pub async fn run_main(cli: Cli) -> anyhow::Result<()> {
    let store = FileCatalogStore::new(cli.catalog_root);
    let config = match &cli.config {
        Some(path) => CoreConfig::load(path, ConfigOverrides::default()).await?,
        None => CoreConfig::default(),
    };

    match cli.command {
        Command::Resolve(args) => {
            let user = UserIdentity::new(args.user_id, args.tenant);
            let cache = ResolutionCache::new(config.resolution_cache_ttl);
            let resolved = cache.resolve_cached(&store, &user).await?;
            println!("{}", serde_json::to_string_pretty(&resolved)?);
        }
        Command::Exec(args) => {
            let user = UserIdentity::new(args.user_id, args.tenant)
                .with_scopes(args.scopes.iter().map(|s| Scope::new(s.clone())));

            let raw_args = parse_kv_args(&args.args)?;

            let registry = CommandRegistry::from_specs(default_whitelist());
            let audit = InMemoryAuditSink::new(64);
            let mapper = Arc::new(mapper::ToolBinaryMapper::new(args.tool_binary));
            let bridge = ExecutionBridge::new(config, registry, audit, mapper);

            let mut request = ExecutionRequest::new(CommandId::new(args.command_id), user);
            for (key, value) in raw_args {
                request = request.with_arg(key, value);
            }

            let result = bridge.execute(request).await?;
            println!(
                "{}",
                serde_json::json!({
                    "success": result.success,
                    "exit_code": result.exit_code,
                    "stdout": result.stdout_lossy(),
                    "stderr": result.stderr_lossy(),
                    "output_truncated": result.output_truncated,
                })
            );
        }
    }

    Ok(())
}

fn parse_kv_args(pairs: &[String]) -> anyhow::Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("argument '{pair}' is not in key=value form"))?;
        map.insert(key.to_string(), value.to_string());
    }
    Ok(map)
}
