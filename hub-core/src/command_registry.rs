//! Command Specification Registry.
//!
//! The whitelist is static at process start; there is no dynamic
//! registration. Any `command_id` not present here is rejected before any
//! other check runs — the registry's presence defines the attack surface.

use std::collections::HashMap;

use hub_protocol::ArgSpec;
use hub_protocol::ArgType;
use hub_protocol::CommandId;
use hub_protocol::CommandSpec;
use hub_protocol::Scope;

/// Looked up once at the boundary; everything downstream carries the typed
/// `&'static CommandSpec`, never the raw command id string.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    specs: HashMap<CommandId, CommandSpec>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            specs: HashMap::new(),
        }
    }

    /// Build the registry from a fixed list of specs. Intended to be called
    /// once at process start with a hard-coded whitelist; there is no API to
    /// add specs afterward.
    pub fn from_specs(specs: impl IntoIterator<Item = CommandSpec>) -> Self {
        let mut registry = Self::new();
        for spec in specs {
            registry.specs.insert(spec.command_id.clone(), spec);
        }
        registry
    }

    pub fn lookup(&self, command_id: &CommandId) -> Option<&CommandSpec> {
        self.specs.get(command_id)
    }

    /// Enumerate every permitted command id, for admin/CLI discovery
    /// surfaces.
    pub fn command_ids(&self) -> impl Iterator<Item = &CommandId> {
        self.specs.keys()
    }
}

/// The whitelist consumed by `hub-cli` and the integration tests: the
/// handful of catalog-management invocations the web layer is permitted to
/// trigger against the underlying CLI tool.
pub fn default_whitelist() -> Vec<CommandSpec> {
    vec![
        CommandSpec {
            command_id: CommandId::new("server_enable"),
            args: vec![ArgSpec::required("server", ArgType::String).with_pattern(r"^[a-zA-Z0-9_.-]{1,128}$")],
            max_runtime: std::time::Duration::from_secs(10),
            streaming_capable: false,
            required_scopes: vec![Scope::new("server:enable")],
        },
        CommandSpec {
            command_id: CommandId::new("server_disable"),
            args: vec![ArgSpec::required("server", ArgType::String).with_pattern(r"^[a-zA-Z0-9_.-]{1,128}$")],
            max_runtime: std::time::Duration::from_secs(10),
            streaming_capable: false,
            required_scopes: vec![Scope::new("server:disable")],
        },
        CommandSpec {
            command_id: CommandId::new("server_logs"),
            args: vec![
                ArgSpec::required("server", ArgType::String).with_pattern(r"^[a-zA-Z0-9_.-]{1,128}$"),
                ArgSpec::optional("follow", ArgType::Enum(vec!["true", "false"])),
            ],
            max_runtime: std::time::Duration::from_secs(300),
            streaming_capable: true,
            required_scopes: vec![Scope::new("server:logs")],
        },
        CommandSpec {
            command_id: CommandId::new("catalog_sync"),
            args: vec![ArgSpec::required("catalog_id", ArgType::Uuid)],
            max_runtime: std::time::Duration::from_secs(30),
            streaming_capable: false,
            required_scopes: vec![Scope::new("catalog:write")],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_command_id_is_a_miss() {
        let registry = CommandRegistry::from_specs(default_whitelist());
        assert!(registry.lookup(&CommandId::new("rm_rf")).is_none());
        assert!(registry.lookup(&CommandId::new("server_enable")).is_some());
    }

    #[test]
    fn command_ids_enumerates_the_whole_whitelist() {
        let registry = CommandRegistry::from_specs(default_whitelist());
        let ids: Vec<_> = registry.command_ids().map(CommandId::as_str).collect();
        assert!(ids.contains(&"server_enable"));
        assert!(ids.contains(&"catalog_sync"));
    }
}
