//! Runtime values passed to and returned from the Execution Bridge.

use std::collections::HashMap;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use uuid::Uuid;

use crate::command::CommandId;
use crate::identity::UserIdentity;

/// Transient value passed to `ExecutionBridge::execute`/`execute_stream`.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub command_id: CommandId,
    pub raw_args: HashMap<String, String>,
    pub user: UserIdentity,
    pub request_id: Uuid,
    /// May only *shorten* the spec's `max_runtime`, never lengthen it.
    pub deadline_override: Option<Duration>,
    pub expect_stream: bool,
}

impl ExecutionRequest {
    pub fn new(command_id: CommandId, user: UserIdentity) -> Self {
        Self {
            command_id,
            raw_args: HashMap::new(),
            user,
            request_id: Uuid::new_v4(),
            deadline_override: None,
            expect_stream: false,
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.raw_args.insert(key.into(), value.into());
        self
    }
}

/// Outcome of a synchronous execution. A non-zero exit code is
/// not an error: `success` reflects only whether the process ran to
/// completion without infrastructure failure.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub output_truncated: bool,
}

impl ExecutionResult {
    pub fn wall_time(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}
