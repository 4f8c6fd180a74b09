use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Raw configuration as written in `idanss.toml`.
///
/// ```toml
/// [redis]
/// url = "redis://localhost:6379"
///
/// [logging]
/// level = "debug"
/// format = "json"
///
/// [orchestrator]
/// topic_prefix = "scan"
/// worker_pool_size = 32
/// scan_timeout = "2h"
/// deadline_sweep_interval = "30s"
/// shutdown_grace = "45s"
/// duplicate_policy = "replace"
/// ```
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct FileConfig {
    pub redis: Option<FileRedisConfig>,
    #[serde(default)]
    pub logging: FileLoggingConfig,
    #[serde(default)]
    pub orchestrator: FileOrchestratorConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileRedisConfig {
    pub url: String,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileLoggingConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// Durations are humantime strings (`"90s"`, `"2h"`); `"0s"` disables the
/// scan timeout.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileOrchestratorConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_pool_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline_sweep_interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutdown_grace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_buffer: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_updates: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_policy: Option<String>,
}

/// Environment-derived values, still unparsed so the loader can report bad
/// input as warnings.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub redis_url: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
    pub topic_prefix: Option<String>,
    pub worker_pool_size: Option<String>,
    pub scan_timeout_secs: Option<String>,
    pub deadline_sweep_secs: Option<String>,
    pub shutdown_grace_secs: Option<String>,
    pub publish_updates: Option<String>,
    pub duplicate_policy: Option<String>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable source. Blank values
    /// count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        Self {
            config_path: var("IDANSS_CONFIG").map(PathBuf::from),
            redis_url: var("REDIS_URL"),
            log_level: var("LOG_LEVEL"),
            log_format: var("LOG_FORMAT"),
            topic_prefix: var("SCAN_TOPIC_PREFIX"),
            worker_pool_size: var("SCAN_WORKER_POOL_SIZE"),
            scan_timeout_secs: var("SCAN_TIMEOUT_SECS"),
            deadline_sweep_secs: var("SCAN_DEADLINE_SWEEP_SECS"),
            shutdown_grace_secs: var("SCAN_SHUTDOWN_GRACE_SECS"),
            publish_updates: var("SCAN_PUBLISH_UPDATES"),
            duplicate_policy: var("SCAN_DUPLICATE_POLICY"),
        }
    }
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
