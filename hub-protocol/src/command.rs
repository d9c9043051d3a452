//! `CommandSpec` and its argument schema.
//!
//! `CommandId` is kept as a string for logging and wire compatibility, but
//! is resolved once at the registry boundary; downstream code in `hub-core`
//! carries `&'static CommandSpec` references, never raw strings, past that
//! point.

use std::fmt;

use crate::identity::Scope;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(pub String);

impl CommandId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CommandId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// The declared type of one positional argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgType {
    String,
    Uuid,
    Enum(Vec<&'static str>),
    Integer { min: i64, max: i64 },
    Path,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgSpec {
    pub name: &'static str,
    pub arg_type: ArgType,
    pub required: bool,
    /// Extra regex constraint for `String` arguments, in addition to the
    /// global forbidden-character screen.
    pub pattern: Option<&'static str>,
}

impl ArgSpec {
    pub const fn required(name: &'static str, arg_type: ArgType) -> Self {
        Self {
            name,
            arg_type,
            required: true,
            pattern: None,
        }
    }

    pub const fn optional(name: &'static str, arg_type: ArgType) -> Self {
        Self {
            name,
            arg_type,
            required: false,
            pattern: None,
        }
    }

    pub const fn with_pattern(mut self, pattern: &'static str) -> Self {
        self.pattern = Some(pattern);
        self
    }
}

/// A static descriptor for one permitted external-tool invocation
///. Immutable after process start.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub command_id: CommandId,
    pub args: Vec<ArgSpec>,
    pub max_runtime: std::time::Duration,
    pub streaming_capable: bool,
    pub required_scopes: Vec<Scope>,
}
