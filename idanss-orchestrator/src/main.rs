//! # IDANSS scan orchestrator
//!
//! Long-running worker that sits between the API and the scanner backends:
//!
//! - consumes `start_scan` requests from `scan:requests`, validates and
//!   registers them, and forwards them to `scan:requests:<sast|dast|api>`
//! - consumes backend reports from `scan:status` and keeps the
//!   `scan:progress:<scanId>` record current for pollers
//! - fails scans that never report back within the configured deadline
//!
//! Exit status is 0 after a signal-driven shutdown and 1 when startup fails.

mod logging;

use std::{path::PathBuf, process::ExitCode, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use idanss_config::{Config, ConfigLoad, ConfigLoader, ConfigLoaderOptions, ConfigWarnings};
use idanss_core::{MessageBus, OrchestratorRuntime, RedisMessageBus, RedisProgressStore};
use idanss_model::ScanKeys;
use tokio::signal;
use tracing::{error, info, warn};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "idanss-orchestrator")]
#[command(about = "Routes security scan requests to scanner backends and tracks their progress")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to the TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// .env file to load before reading the environment
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Redis connection URL (overrides REDIS_URL and the config file)
    #[arg(long, global = true)]
    redis_url: Option<String>,

    /// Log level: error, warn, info, debug or trace (overrides LOG_LEVEL)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the resolved configuration and any warnings, then exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let ConfigLoad { config, warnings } = match load_config(&cli) {
        Ok(load) => load,
        Err(err) => {
            eprintln!("idanss-orchestrator: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(Command::CheckConfig) = cli.command {
        return check_config(&config, &warnings);
    }

    if let Err(err) = logging::init(&config.logging) {
        eprintln!("idanss-orchestrator: failed to initialize logging: {err:#}");
        return ExitCode::FAILURE;
    }

    match run(config, warnings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("orchestrator terminated: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<ConfigLoad> {
    ConfigLoader::with_options(ConfigLoaderOptions {
        config_path: cli.config.clone(),
        env_file: cli.env_file.clone(),
        redis_url: cli.redis_url.clone(),
        log_level: cli.log_level.clone(),
    })
    .load()
    .context("failed to load configuration")
}

fn check_config(config: &Config, warnings: &ConfigWarnings) -> ExitCode {
    match config.to_redacted_toml() {
        Ok(rendered) => println!("{rendered}"),
        Err(err) => {
            eprintln!("idanss-orchestrator: failed to render configuration: {err}");
            return ExitCode::FAILURE;
        }
    }

    match &config.metadata.config_path {
        Some(path) => println!("# loaded from {}", path.display()),
        None => println!("# no configuration file; environment and defaults only"),
    }
    for warning in warnings.iter() {
        println!("# warning: {warning}");
    }
    ExitCode::SUCCESS
}

async fn run(config: Config, warnings: ConfigWarnings) -> anyhow::Result<()> {
    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "loaded configuration file");
    }
    for warning in warnings.iter() {
        match &warning.hint {
            Some(hint) => warn!(message = %warning.message, hint = %hint, "configuration warning"),
            None => warn!(message = %warning.message, "configuration warning"),
        }
    }

    info!(
        redis = %config.redis.redacted_url(),
        prefix = %config.orchestrator.topic_prefix,
        workers = config.orchestrator.worker_pool_size,
        "Starting scan orchestrator"
    );

    let bus = Arc::new(
        RedisMessageBus::new(&config.redis.url, config.orchestrator.subscription_buffer)
            .context("invalid Redis configuration")?,
    );
    bus.connect()
        .await
        .context("failed to connect to Redis message bus")?;

    let connection = bus
        .connection_manager()
        .await
        .context("Redis connection closed during startup")?;
    let store = Arc::new(RedisProgressStore::from_connection(
        connection,
        ScanKeys::new(config.orchestrator.topic_prefix.as_str()),
    ));

    let runtime = OrchestratorRuntime::builder()
        .with_config(config.orchestrator)
        .with_bus(bus)
        .with_store(store)
        .build()
        .context("failed to assemble orchestrator runtime")?;

    runtime
        .start()
        .await
        .context("failed to start orchestrator runtime")?;
    info!("Scan orchestrator running; waiting for shutdown signal");

    shutdown_signal().await;
    info!("Shutdown signal received");

    runtime
        .shutdown()
        .await
        .context("orchestrator shutdown failed")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
