//! Layered configuration for the IDANSS orchestrator: built-in defaults, an
//! optional TOML file, the process environment (with `.env` support) and
//! command-line overrides, in increasing order of precedence.
#![allow(missing_docs)]

pub mod loader;
pub mod models;
pub mod sources;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions};
pub use models::{Config, ConfigMetadata, LogFormat, LoggingConfig, RedisConfig};
pub use validation::{ConfigWarning, ConfigWarnings};
