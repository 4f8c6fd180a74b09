use std::{collections::HashMap, io::Write, time::Duration};

use idanss_config::{
    ConfigLoadError, ConfigLoader, LogFormat,
    sources::EnvConfig,
};
use idanss_core::DuplicateScanPolicy;
use tempfile::NamedTempFile;

fn env(vars: &[(&str, &str)]) -> EnvConfig {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    EnvConfig::from_lookup(|name| vars.get(name).cloned())
}

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn defaults_apply_without_file_or_env() {
    let load = ConfigLoader::new().load_from_env(env(&[]), false).unwrap();
    let config = load.config;

    assert_eq!(config.redis.url, "redis://localhost:6379");
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.logging.format, LogFormat::Pretty);
    assert_eq!(config.orchestrator.topic_prefix, "scan");
    assert_eq!(config.orchestrator.worker_pool_size, 16);
    assert_eq!(config.orchestrator.scan_timeout(), Some(Duration::from_secs(7_200)));
    assert!(config.orchestrator.publish_updates);
    assert_eq!(config.orchestrator.duplicate_policy, DuplicateScanPolicy::Ignore);
    assert!(config.metadata.config_path.is_none());
    assert!(load.warnings.is_empty());
}

#[test]
fn environment_overrides_file() {
    let file = config_file(
        r#"
[redis]
url = "redis://file-host:6379"

[logging]
level = "debug"
format = "json"

[orchestrator]
topic_prefix = "tenant-a"
worker_pool_size = 8
scan_timeout = "30m"
shutdown_grace = "5s"
duplicate_policy = "replace"
"#,
    );

    let load = ConfigLoader::new()
        .with_config_path(file.path())
        .load_from_env(
            env(&[
                ("REDIS_URL", "redis://127.0.0.1:6380"),
                ("SCAN_WORKER_POOL_SIZE", "4"),
                ("SCAN_PUBLISH_UPDATES", "off"),
            ]),
            false,
        )
        .unwrap();
    let config = load.config;

    assert_eq!(config.redis.url, "redis://127.0.0.1:6380");
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, LogFormat::Json);
    assert_eq!(config.orchestrator.topic_prefix, "tenant-a");
    assert_eq!(config.orchestrator.worker_pool_size, 4);
    assert_eq!(config.orchestrator.scan_timeout_secs, 1_800);
    assert_eq!(config.orchestrator.shutdown_grace(), Duration::from_secs(5));
    assert!(!config.orchestrator.publish_updates);
    assert_eq!(config.orchestrator.duplicate_policy, DuplicateScanPolicy::Replace);
    assert_eq!(config.metadata.config_path.as_deref(), Some(file.path()));
}

#[test]
fn invalid_values_warn_and_fall_back() {
    let load = ConfigLoader::new()
        .load_from_env(
            env(&[
                ("LOG_LEVEL", "chatty"),
                ("SCAN_WORKER_POOL_SIZE", "0"),
                ("SCAN_TIMEOUT_SECS", "soon"),
                ("SCAN_DUPLICATE_POLICY", "merge"),
            ]),
            false,
        )
        .unwrap();

    assert_eq!(load.config.logging.level, "info");
    assert_eq!(load.config.orchestrator.worker_pool_size, 16);
    assert_eq!(load.config.orchestrator.scan_timeout_secs, 7_200);
    assert_eq!(load.config.orchestrator.duplicate_policy, DuplicateScanPolicy::Ignore);
    assert_eq!(load.warnings.len(), 4);
    assert!(
        load.warnings
            .iter()
            .any(|warning| warning.message.contains("SCAN_WORKER_POOL_SIZE"))
    );
}

#[test]
fn zero_timeout_disables_deadlines_with_warning() {
    let load = ConfigLoader::new()
        .load_from_env(env(&[("SCAN_TIMEOUT_SECS", "0")]), false)
        .unwrap();

    assert_eq!(load.config.orchestrator.scan_timeout(), None);
    assert!(
        load.warnings
            .iter()
            .any(|warning| warning.message.contains("deadlines are disabled"))
    );
}

#[test]
fn missing_explicit_file_is_an_error() {
    let err = ConfigLoader::new()
        .with_config_path("/definitely/not/here/idanss.toml")
        .load_from_env(env(&[]), false)
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::MissingConfig { .. }));

    let err = ConfigLoader::new()
        .load_from_env(env(&[("IDANSS_CONFIG", "/also/missing.toml")]), false)
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::MissingConfig { .. }));
}

#[test]
fn malformed_file_is_an_error() {
    let file = config_file("[orchestrator\nworker_pool_size = ");
    let err = ConfigLoader::new()
        .with_config_path(file.path())
        .load_from_env(env(&[]), false)
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::Parse { .. }));
}

#[test]
fn bad_redis_url_is_an_error() {
    let err = ConfigLoader::new()
        .load_from_env(env(&[("REDIS_URL", "http://localhost:6379")]), false)
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::UnsupportedRedisScheme { .. }));

    let err = ConfigLoader::new()
        .load_from_env(env(&[("REDIS_URL", "not a url")]), false)
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::InvalidRedisUrl { .. }));
}

#[test]
fn redacted_output_hides_password() {
    let load = ConfigLoader::new()
        .load_from_env(env(&[("REDIS_URL", "redis://:hunter2@localhost:6379/0")]), false)
        .unwrap();

    let rendered = load.config.to_redacted_toml().unwrap();
    assert!(!rendered.contains("hunter2"));
    assert!(rendered.contains("topic_prefix"));
    assert!(!format!("{:?}", load.config.redis).contains("hunter2"));
}
