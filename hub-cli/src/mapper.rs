//! Maps a validated `CommandSpec` invocation onto the configured external
//! tool binary. `hubctl` has no built-in knowledge of what that tool is —
//! its identity and wire protocol live outside this workspace — so the
//! binary path is supplied by the caller and arguments are passed
//! positionally in `CommandSpec`-declared order.

use std::collections::HashMap;
use std::time::Duration;

use hub_core::bridge::CommandMapper;
use hub_core::runner::ExecParams;
use hub_core::validator::ValidatedArg;
use hub_protocol::CommandSpec;
use hub_protocol::UserIdentity;

pub struct ToolBinaryMapper {
    tool_binary: String,
}

impl ToolBinaryMapper {
    pub fn new(tool_binary: String) -> Self {
        Self { tool_binary }
    }
}

impl CommandMapper for ToolBinaryMapper {
    fn map(&self, spec: &CommandSpec, user: &UserIdentity, validated: &[(String, ValidatedArg)]) -> ExecParams {
        let mut args: Vec<String> = validated
            .iter()
            .map(|(_, value)| value.as_arg_string())
            .collect();
        // Every invocation carries the caller it was made on behalf of, so
        // the downstream tool can attribute its own side effects.
        args.push("--as-user".to_string());
        args.push(user.to_string());
        ExecParams {
            program: self.tool_binary.clone(),
            args,
            env: HashMap::new(),
            timeout: spec.max_runtime,
        }
    }
}
