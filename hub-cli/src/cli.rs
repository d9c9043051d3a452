use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "hubctl", version)]
pub struct Cli {
    /// Root directory of the file-backed catalog store.
    #[arg(long = "catalog-root", value_name = "DIR", global = true)]
    pub catalog_root: PathBuf,

    /// Optional TOML file overriding the process-wide tunables (rate
    /// limits, timeouts, buffer sizes). Missing is not an error.
    #[arg(long = "config", value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Specifies color settings for use in the output.
    #[arg(long = "color", value_enum, default_value_t = Color::Auto, global = true)]
    pub color: Color,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve a user's merged catalog and print it as JSON.
    Resolve(ResolveArgs),
    /// Execute one whitelisted command against the core and print the result.
    Exec(ExecArgs),
}

#[derive(Parser, Debug)]
pub struct ResolveArgs {
    /// Tenant the user belongs to.
    #[arg(long)]
    pub tenant: String,

    /// Caller's opaque user id.
    #[arg(long)]
    pub user_id: Uuid,
}

#[derive(Parser, Debug)]
pub struct ExecArgs {
    /// Tenant the user belongs to.
    #[arg(long)]
    pub tenant: String,

    /// Caller's opaque user id.
    #[arg(long)]
    pub user_id: Uuid,

    /// Scopes the caller currently holds, repeatable.
    #[arg(long = "scope", value_name = "SCOPE")]
    pub scopes: Vec<String>,

    /// Whitelisted command id, e.g. `server_enable`.
    pub command_id: String,

    /// `key=value` argument, repeatable.
    #[arg(long = "arg", value_name = "KEY=VALUE")]
    pub args: Vec<String>,

    /// Path to the external tool binary the command maps onto.
    #[arg(long = "tool-binary", default_value = "true")]
    pub tool_binary: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum Color {
    Always,
    Never,
    #[default]
    Auto,
}
