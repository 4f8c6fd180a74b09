use std::{fmt, path::PathBuf, str::FromStr};

use idanss_core::OrchestratorConfig;
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Levels accepted for `LOG_LEVEL`.
pub const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Fully resolved configuration.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub redis: RedisConfig,
    pub logging: LoggingConfig,
    pub orchestrator: OrchestratorConfig,
    #[serde(skip)]
    pub metadata: ConfigMetadata,
}

#[derive(Clone, Serialize)]
pub struct RedisConfig {
    pub url: String,
}

impl RedisConfig {
    /// URL with any password replaced, safe to log.
    pub fn redacted_url(&self) -> String {
        match Url::parse(&self.url) {
            Ok(mut url) if url.password().is_some() => {
                let _ = url.set_password(Some("****"));
                url.to_string()
            }
            Ok(url) => url.to_string(),
            Err(_) => "<invalid>".to_string(),
        }
    }
}

impl fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisConfig")
            .field("url", &self.redacted_url())
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoggingConfig {
    /// One of [`LOG_LEVELS`]. `RUST_LOG` takes precedence when set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Where the configuration came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}

impl Config {
    /// TOML rendering with the Redis password masked.
    pub fn to_redacted_toml(&self) -> Result<String, toml::ser::Error> {
        let mut printable = self.clone();
        printable.redis.url = self.redis.redacted_url();
        toml::to_string_pretty(&printable)
    }
}
