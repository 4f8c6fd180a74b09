use std::{
    fmt::Display,
    fs,
    path::PathBuf,
    time::Duration,
};

use idanss_core::{DuplicateScanPolicy, OrchestratorConfig};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
    models::{
        Config, ConfigMetadata, DEFAULT_LOG_LEVEL, DEFAULT_REDIS_URL, LOG_LEVELS, LogFormat,
        LoggingConfig, RedisConfig,
    },
    sources::{EnvConfig, FileConfig, parse_bool},
    validation::{self, ConfigWarnings},
};

const DEFAULT_CONFIG_LOCATIONS: [&str; 2] = ["idanss.toml", "config/idanss.toml"];

const REDIS_SCHEMES: [&str; 4] = ["redis", "rediss", "redis+unix", "unix"];

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    /// Command-line overrides; these beat every other source.
    pub redis_url: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid Redis URL: {source}")]
    InvalidRedisUrl {
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported Redis URL scheme '{scheme}'")]
    UnsupportedRedisScheme { scheme: String },
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    /// Loads `.env` into the process environment, then resolves the full
    /// configuration from it.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(
                |err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                },
            )?,
            None => dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
        };

        self.load_from_env(EnvConfig::gather(), env_file_loaded)
    }

    /// Resolves the configuration against an already gathered environment.
    pub fn load_from_env(
        &self,
        env: EnvConfig,
        env_file_loaded: bool,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let (file_config, config_path) = self.load_file_config(&env)?;
        let mut warnings = ConfigWarnings::default();

        let config = self.compose_config(
            file_config.unwrap_or_default(),
            env,
            ConfigMetadata {
                config_path,
                env_file_loaded,
            },
            &mut warnings,
        )?;

        warnings.extend(validation::apply_guard_rails(&config));
        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        // An explicitly requested file must exist; defaults are optional.
        let (path, explicit) = match (&self.options.config_path, &env.config_path) {
            (Some(path), _) | (None, Some(path)) => (path.clone(), true),
            (None, None) => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .map(PathBuf::from)
                .find(|candidate| candidate.exists())
            {
                Some(path) => (path, false),
                None => {
                    debug!("No configuration file found; using environment and defaults");
                    return Ok((None, None));
                }
            },
        };

        if !path.exists() {
            if explicit {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        let contents = fs::read_to_string(&path).map_err(|source| ConfigLoadError::Io {
            path: path.clone(),
            source,
        })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
                path: path.clone(),
                source,
            })?;

        Ok((Some(file_config), Some(path)))
    }

    fn compose_config(
        &self,
        file: FileConfig,
        env: EnvConfig,
        metadata: ConfigMetadata,
        warnings: &mut ConfigWarnings,
    ) -> Result<Config, ConfigLoadError> {
        let FileConfig {
            redis: file_redis,
            logging: file_logging,
            orchestrator: file_orch,
        } = file;

        let redis_url = self
            .options
            .redis_url
            .clone()
            .or(env.redis_url)
            .or(file_redis.map(|redis| redis.url))
            .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string());
        validate_redis_url(&redis_url)?;

        let level = pick(
            warnings,
            &[
                ("--log-level", self.options.log_level.clone()),
                ("LOG_LEVEL", env.log_level),
                ("logging.level", file_logging.level),
            ],
            parse_log_level,
        )
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        let format = pick(
            warnings,
            &[
                ("LOG_FORMAT", env.log_format),
                ("logging.format", file_logging.format),
            ],
            str::parse::<LogFormat>,
        )
        .unwrap_or_default();

        let defaults = OrchestratorConfig::default();

        let topic_prefix = env
            .topic_prefix
            .or(file_orch.topic_prefix)
            .map(|prefix| prefix.trim().to_string())
            .filter(|prefix| !prefix.is_empty())
            .unwrap_or_else(|| defaults.topic_prefix.clone());

        let worker_pool_size = pick(
            warnings,
            &[
                ("SCAN_WORKER_POOL_SIZE", env.worker_pool_size),
                (
                    "orchestrator.worker_pool_size",
                    file_orch.worker_pool_size.map(|size| size.to_string()),
                ),
            ],
            parse_positive,
        )
        .unwrap_or(defaults.worker_pool_size);

        let subscription_buffer = pick(
            warnings,
            &[(
                "orchestrator.subscription_buffer",
                file_orch.subscription_buffer.map(|size| size.to_string()),
            )],
            parse_positive,
        )
        .unwrap_or(defaults.subscription_buffer);

        let scan_timeout = pick_duration(
            warnings,
            ("SCAN_TIMEOUT_SECS", env.scan_timeout_secs),
            ("orchestrator.scan_timeout", file_orch.scan_timeout),
        )
        .unwrap_or(Duration::from_secs(defaults.scan_timeout_secs));

        let deadline_sweep_interval = pick_duration(
            warnings,
            ("SCAN_DEADLINE_SWEEP_SECS", env.deadline_sweep_secs),
            (
                "orchestrator.deadline_sweep_interval",
                file_orch.deadline_sweep_interval,
            ),
        )
        .filter(|interval| !interval.is_zero())
        .unwrap_or(defaults.deadline_sweep_interval());

        let shutdown_grace = pick_duration(
            warnings,
            ("SCAN_SHUTDOWN_GRACE_SECS", env.shutdown_grace_secs),
            ("orchestrator.shutdown_grace", file_orch.shutdown_grace),
        )
        .unwrap_or(defaults.shutdown_grace());

        let publish_updates = pick(
            warnings,
            &[
                ("SCAN_PUBLISH_UPDATES", env.publish_updates),
                (
                    "orchestrator.publish_updates",
                    file_orch.publish_updates.map(|flag| flag.to_string()),
                ),
            ],
            |raw| parse_bool(raw).ok_or("expected true or false"),
        )
        .unwrap_or(defaults.publish_updates);

        let duplicate_policy = pick(
            warnings,
            &[
                ("SCAN_DUPLICATE_POLICY", env.duplicate_policy),
                ("orchestrator.duplicate_policy", file_orch.duplicate_policy),
            ],
            str::parse::<DuplicateScanPolicy>,
        )
        .unwrap_or(defaults.duplicate_policy);

        Ok(Config {
            redis: RedisConfig { url: redis_url },
            logging: LoggingConfig { level, format },
            orchestrator: OrchestratorConfig {
                topic_prefix,
                worker_pool_size,
                scan_timeout_secs: scan_timeout.as_secs(),
                deadline_sweep_interval_ms: millis(deadline_sweep_interval),
                shutdown_grace_ms: millis(shutdown_grace),
                subscription_buffer,
                publish_updates,
                duplicate_policy,
            },
            metadata,
        })
    }
}

/// First value, in precedence order, that parses. Values that do not parse
/// become warnings and the next source is tried.
fn pick<T, E, F>(
    warnings: &mut ConfigWarnings,
    sources: &[(&str, Option<String>)],
    parse: F,
) -> Option<T>
where
    F: Fn(&str) -> Result<T, E>,
    E: Display,
{
    for (name, raw) in sources {
        let Some(raw) = raw else { continue };
        match parse(raw) {
            Ok(value) => return Some(value),
            Err(err) => warnings.push_with_hint(
                format!("Ignoring invalid {name} value '{raw}': {err}"),
                "The next configuration source or the built-in default is used instead",
            ),
        }
    }
    None
}

/// Environment durations are whole seconds, file durations humantime
/// strings.
fn pick_duration(
    warnings: &mut ConfigWarnings,
    env: (&str, Option<String>),
    file: (&str, Option<String>),
) -> Option<Duration> {
    pick(warnings, &[env], |raw| {
        raw.trim().parse::<u64>().map(Duration::from_secs)
    })
    .or_else(|| pick(warnings, &[file], |raw| humantime::parse_duration(raw.trim())))
}

fn parse_positive(raw: &str) -> Result<usize, String> {
    match raw.trim().parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(value) => Ok(value),
        Err(err) => Err(err.to_string()),
    }
}

fn parse_log_level(raw: &str) -> Result<String, String> {
    let level = raw.trim().to_ascii_lowercase();
    let level = if level == "warning" { "warn".to_string() } else { level };
    if LOG_LEVELS.contains(&level.as_str()) {
        Ok(level)
    } else {
        Err(format!("expected one of {}", LOG_LEVELS.join(", ")))
    }
}

fn validate_redis_url(raw: &str) -> Result<(), ConfigLoadError> {
    let url = Url::parse(raw).map_err(|source| ConfigLoadError::InvalidRedisUrl { source })?;
    if !REDIS_SCHEMES.contains(&url.scheme()) {
        return Err(ConfigLoadError::UnsupportedRedisScheme {
            scheme: url.scheme().to_string(),
        });
    }
    Ok(())
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
