//! CLI module for cadence
//!
//! This module provides the command-line interface:
//! - Argument parsing with clap
//! - Configuration loading and logger setup
//! - Command dispatch to the scheduler, worker and export handlers

pub mod context;
pub mod executor;
pub mod handlers;
pub mod parser;
pub mod validation;

pub use context::CommandContext;
pub use executor::execute_command;
pub use parser::{Cli, Commands, Environment, ExportFormat, TaskStateArg};

use std::io::{self, Write};
use std::path::Path;

use tracing::debug;

use crate::config::settings::Settings;
use crate::config::ConfigLoader;
use crate::error::{AppError, AppResult};
use crate::logger::{init_logger, LogLevelHandle};
use handlers::Output;

/// Run a parsed command line and return the process exit code
///
/// Reports go to stdout; errors are printed as `[ERROR]`, or `[WARNING]`
/// for "nothing to do" outcomes, and map to a non-zero exit code.
pub async fn run(cli: Cli) -> i32 {
    match run_command(&cli).await {
        Ok(()) => 0,
        Err(e) => {
            let prefix = if e.is_warning() { "[WARNING]" } else { "[ERROR]" };
            let _ = writeln!(io::stdout(), "{} {}", prefix, e);
            e.exit_code()
        }
    }
}

async fn run_command(cli: &Cli) -> AppResult<()> {
    let settings = load_config(cli)?;
    let log_handle = init_logger_from_settings(&settings, cli.log_level_override())?;
    debug!(command = ?cli.command, "Configuration loaded");

    // Long-running workers pick up logger.level changes on SIGHUP
    #[cfg(unix)]
    let level_reload = match cli.command {
        Commands::Consume { .. } if cli.log_level_override().is_none() => Some(
            signals::spawn_log_level_reload(log_handle, cli.config.clone(), cli.env)?,
        ),
        _ => None,
    };
    #[cfg(not(unix))]
    drop(log_handle);

    let mut stdout = io::stdout();
    let result = execute_command(&cli.command, settings, &mut Output::new(&mut stdout)).await;

    #[cfg(unix)]
    if let Some(task) = level_reload {
        task.abort();
    }
    result
}

/// Load configuration as selected by the command line
///
/// `--config` reads a single file; otherwise the layered files under the
/// configuration directory are merged, with `--env` overriding
/// `CADENCE_APP_ENV`.
pub fn load_config(cli: &Cli) -> AppResult<Settings> {
    load_settings(cli.config.as_deref(), cli.env)
}

fn load_settings(config: Option<&Path>, env: Option<Environment>) -> AppResult<Settings> {
    let loader = match config {
        Some(path) => ConfigLoader::from_file(path),
        None => ConfigLoader::new()?,
    };
    let loader = match env {
        Some(env) => loader.with_environment(env.into()),
        None => loader,
    };
    Ok(loader.load()?)
}

/// Re-read the configuration and apply its `logger.level`
///
/// Returns the level now in effect. On error the current level is kept.
pub fn reload_log_level(
    handle: &LogLevelHandle,
    config: Option<&Path>,
    env: Option<Environment>,
) -> AppResult<String> {
    let settings = load_settings(config, env)?;
    handle.set_level(&settings.logger.level)?;
    Ok(settings.logger.level)
}

#[cfg(unix)]
mod signals {
    use std::path::PathBuf;

    use anyhow::Context;
    use tokio::signal::unix::{SignalKind, signal};
    use tokio::task::JoinHandle;
    use tracing::{info, warn};

    use super::{Environment, reload_log_level};
    use crate::error::AppResult;
    use crate::logger::LogLevelHandle;

    /// Reload the configured log level every time the process gets SIGHUP
    pub fn spawn_log_level_reload(
        handle: LogLevelHandle,
        config: Option<PathBuf>,
        env: Option<Environment>,
    ) -> AppResult<JoinHandle<()>> {
        let mut hangup = signal(SignalKind::hangup()).context("Failed to listen for SIGHUP")?;

        Ok(tokio::spawn(async move {
            while hangup.recv().await.is_some() {
                match reload_log_level(&handle, config.as_deref(), env) {
                    Ok(level) => info!(level = %level, "Log level reloaded"),
                    Err(e) => warn!(error = %e, "Log level reload failed, keeping current level"),
                }
            }
        }))
    }
}

/// Initialize logger from settings
///
/// `level_override` replaces the configured level, used by `--verbose`
/// and `--quiet`.
pub fn init_logger_from_settings(settings: &Settings, level_override: Option<&str>) -> AppResult<LogLevelHandle> {
    let mut config = settings.logger.to_logger_config()?;
    if let Some(level) = level_override {
        config = config.with_level(level);
    }
    init_logger(&config).map_err(|e| AppError::Internal {
        source: e.context("Logger initialization failed"),
    })
}
