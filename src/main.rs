use args::{parse_args, Args};
use log::info;
use stacksync::{
    config::{self, ConfigError},
    start::{start, StartError, StartOptions},
};
use std::{
    path::{Path, PathBuf},
    process,
    time::Duration,
};
use thiserror::Error;

mod args;
mod logger;

/// A custom error implementation for the main function
#[derive(Debug, Error)]
pub enum MainError {
    #[error("cannot initialize the logger")]
    FailedLogger(#[from] log::SetLoggerError),
    #[error("cannot use local timezones for logging")]
    FailedLoggerTimezones,
    #[error("{0}")]
    Misconfigured(#[from] ConfigError),
    #[error("{0}")]
    Failed(#[from] StartError),
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        process::exit(1);
    }
}

fn run() -> Result<(), MainError> {
    let args = parse_args();

    if args.version {
        println!("stacksync {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    logger::init_logger(&args)?;

    let workspace = PathBuf::from(args.directory.clone().unwrap_or_else(|| String::from(".")));
    let config_path = resolve_config_path(&args, &workspace);

    if let Some(name) = &args.enable_auto_sync {
        return toggle_auto_sync(&config_path, name, true);
    }
    if let Some(name) = &args.disable_auto_sync {
        return toggle_auto_sync(&config_path, name, false);
    }

    start(StartOptions {
        workspace,
        config_path,
        repository: args.repo.clone(),
        once: args.once,
        check: args.check,
        interval_override: args.every.map(Into::<Duration>::into),
    })?;

    Ok(())
}

/// The configuration file: the explicit flag, a stacksync.json in the
/// workspace, or the user-wide configuration directory.
fn resolve_config_path(args: &Args, workspace: &Path) -> PathBuf {
    if let Some(config) = &args.config {
        return PathBuf::from(config);
    }
    let local = workspace.join("stacksync.json");
    if local.exists() {
        return local;
    }
    dirs::config_dir()
        .map(|dir| dir.join("stacksync").join("config.json"))
        .unwrap_or(local)
}

fn toggle_auto_sync(config_path: &Path, name: &str, enabled: bool) -> Result<(), MainError> {
    let mut config = config::load(config_path)?;
    config.set_auto_sync(name, enabled)?;
    config::save(&config, config_path)?;
    info!(
        "{} auto-sync for {name}.",
        if enabled { "Enabled" } else { "Disabled" }
    );

    Ok(())
}
