//! Process-wide tunables for the core, loaded as two layers: an optional
//! TOML file (`ConfigToml`) merged with explicit `ConfigOverrides`,
//! overrides always winning. Every numeric knob the admission pipeline and
//! catalog resolver depend on is a named constant with a
//! config-overridable default.

use std::time::Duration;

use serde::Deserialize;

/// Values as loaded from an optional on-disk TOML file. Every field is
/// optional so a partial file is valid; missing fields fall back to
/// [`CoreConfig::default`]'s values.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigToml {
    pub rate_limit_capacity: Option<u32>,
    pub rate_limit_refill_per_sec: Option<u32>,
    pub resolution_cache_ttl_secs: Option<u64>,
    pub runner_default_timeout_ms: Option<u64>,
    pub runner_kill_grace_ms: Option<u64>,
    pub stream_ring_buffer_len: Option<usize>,
    pub stream_subscriber_queue_len: Option<usize>,
    pub stream_post_terminal_grace_secs: Option<u64>,
    pub heartbeat_interval_secs: Option<u64>,
    pub heartbeat_missed_pings_limit: Option<u32>,
    pub max_stdout_bytes: Option<usize>,
    pub max_stderr_bytes: Option<usize>,
    pub max_arg_len_bytes: Option<usize>,
    pub max_aggregate_arg_len_bytes: Option<usize>,
}

/// Explicit overrides a caller constructs in code (e.g. from CLI flags or
/// environment variables); these always win over `ConfigToml`.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub rate_limit_capacity: Option<u32>,
    pub rate_limit_refill_per_sec: Option<u32>,
    pub resolution_cache_ttl: Option<Duration>,
}

/// The fully-resolved, process-wide configuration consumed by every
/// component.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreConfig {
    /// Token-bucket capacity and refill rate for the Rate Limiter (C3).
    pub rate_limit_capacity: u32,
    pub rate_limit_refill_per_sec: u32,

    /// TTL for the Resolution Cache (C10). Default 5 minutes.
    pub resolution_cache_ttl: Duration,

    /// Default wall-clock timeout applied when a `CommandSpec` doesn't
    /// specify one, and the fixed grace interval between graceful and
    /// forcible termination.
    pub runner_default_timeout: Duration,
    pub runner_kill_grace: Duration,

    /// Ring buffer length `R` and per-subscriber queue depth for the Stream
    /// Multiplexer (C6). Defaults 1024 and 256.
    pub stream_ring_buffer_len: usize,
    pub stream_subscriber_queue_len: usize,
    /// Post-terminal grace window before a multiplexer is reaped. Default 60s.
    pub stream_post_terminal_grace: Duration,

    /// Connection Registry heartbeat cadence and missed-ping disconnect
    /// threshold. Defaults 30s / 2 pings.
    pub heartbeat_interval: Duration,
    pub heartbeat_missed_pings_limit: u32,

    /// Synchronous-execution output caps.
    pub max_stdout_bytes: usize,
    pub max_stderr_bytes: usize,

    /// Validator length caps.
    pub max_arg_len_bytes: usize,
    pub max_aggregate_arg_len_bytes: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            rate_limit_capacity: 5,
            rate_limit_refill_per_sec: 1,
            resolution_cache_ttl: Duration::from_secs(5 * 60),
            runner_default_timeout: Duration::from_secs(10),
            runner_kill_grace: Duration::from_secs(5),
            stream_ring_buffer_len: 1024,
            stream_subscriber_queue_len: 256,
            stream_post_terminal_grace: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_missed_pings_limit: 2,
            max_stdout_bytes: 1024 * 1024,
            max_stderr_bytes: 1024 * 1024,
            max_arg_len_bytes: 4 * 1024,
            max_aggregate_arg_len_bytes: 64 * 1024,
        }
    }
}

impl CoreConfig {
    /// Load `path` as a TOML `ConfigToml` layer and merge it with
    /// `overrides`. A missing file is treated as an empty layer rather than
    /// an error, so the process runs on defaults until an operator drops a
    /// config file in place.
    pub async fn load(
        path: &std::path::Path,
        overrides: ConfigOverrides,
    ) -> Result<Self, hub_protocol::HubError> {
        let toml = match tokio::fs::read_to_string(path).await {
            Ok(contents) => toml::from_str(&contents).map_err(|e| {
                hub_protocol::HubError::StoreError(format!("{}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ConfigToml::default(),
            Err(e) => return Err(hub_protocol::HubError::Io(e)),
        };
        Ok(Self::from_toml_and_overrides(toml, overrides))
    }

    /// Merge an on-disk layer with explicit overrides; overrides always win.
    pub fn from_toml_and_overrides(toml: ConfigToml, overrides: ConfigOverrides) -> Self {
        let mut config = Self::default();

        if let Some(v) = toml.rate_limit_capacity {
            config.rate_limit_capacity = v;
        }
        if let Some(v) = toml.rate_limit_refill_per_sec {
            config.rate_limit_refill_per_sec = v;
        }
        if let Some(v) = toml.resolution_cache_ttl_secs {
            config.resolution_cache_ttl = Duration::from_secs(v);
        }
        if let Some(v) = toml.runner_default_timeout_ms {
            config.runner_default_timeout = Duration::from_millis(v);
        }
        if let Some(v) = toml.runner_kill_grace_ms {
            config.runner_kill_grace = Duration::from_millis(v);
        }
        if let Some(v) = toml.stream_ring_buffer_len {
            config.stream_ring_buffer_len = v;
        }
        if let Some(v) = toml.stream_subscriber_queue_len {
            config.stream_subscriber_queue_len = v;
        }
        if let Some(v) = toml.stream_post_terminal_grace_secs {
            config.stream_post_terminal_grace = Duration::from_secs(v);
        }
        if let Some(v) = toml.heartbeat_interval_secs {
            config.heartbeat_interval = Duration::from_secs(v);
        }
        if let Some(v) = toml.heartbeat_missed_pings_limit {
            config.heartbeat_missed_pings_limit = v;
        }
        if let Some(v) = toml.max_stdout_bytes {
            config.max_stdout_bytes = v;
        }
        if let Some(v) = toml.max_stderr_bytes {
            config.max_stderr_bytes = v;
        }
        if let Some(v) = toml.max_arg_len_bytes {
            config.max_arg_len_bytes = v;
        }
        if let Some(v) = toml.max_aggregate_arg_len_bytes {
            config.max_aggregate_arg_len_bytes = v;
        }

        // Overrides win over both the on-disk layer and the defaults.
        if let Some(v) = overrides.rate_limit_capacity {
            config.rate_limit_capacity = v;
        }
        if let Some(v) = overrides.rate_limit_refill_per_sec {
            config.rate_limit_refill_per_sec = v;
        }
        if let Some(v) = overrides.resolution_cache_ttl {
            config.resolution_cache_ttl = v;
        }

        config
    }
}
