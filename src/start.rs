use crate::{
    config::{self, Config, ConfigError, Repository},
    history::{FileHistory, SyncKind},
    scheduler::Scheduler,
    sync::{SyncEngine, SyncOutcome},
};
use log::{error, info};
use std::{fs, path::PathBuf, sync::Arc, time::Duration};
use thiserror::Error;

/// Everything the main program needs to run, already resolved from the
/// command line.
pub struct StartOptions {
    /// The local project root, used to resolve relative target and command
    /// directories.
    pub workspace: PathBuf,
    /// The configuration file to read (and re-read on reload).
    pub config_path: PathBuf,
    /// Sync only this repository once and exit.
    pub repository: Option<String>,
    /// Sync every repository once and exit.
    pub once: bool,
    /// Only report which repositories have changes, don't copy anything.
    pub check: bool,
    /// Override the auto-sync interval of every auto-synced repository.
    pub interval_override: Option<Duration>,
}

/// A custom error implementation for the start function
#[derive(Debug, Error)]
pub enum StartError {
    #[error("the workspace directory {0} does not exist")]
    MissingWorkspace(String),
    #[error("{0}")]
    Misconfigured(#[from] ConfigError),
    #[error("there are no repositories configured")]
    NoRepositories,
    #[error("repository {0} is not configured")]
    UnknownRepository(String),
    #[error("{0} repositories failed")]
    FailedRuns(usize),
    #[error("cannot listen for signals: {0}")]
    FailedSignals(#[from] std::io::Error),
}

/// The main program: load the configuration, build the engine, then either
/// run the requested syncs once or keep the per-repository timers running
/// until a termination signal arrives.
pub fn start(options: StartOptions) -> Result<(), StartError> {
    let workspace = fs::canonicalize(&options.workspace)
        .map_err(|_| StartError::MissingWorkspace(options.workspace.display().to_string()))?;
    let config = config::load(&options.config_path)?;
    if config.repositories.is_empty() {
        return Err(StartError::NoRepositories);
    }

    let history = FileHistory::new(workspace.join(".stacksync").join("history.jsonl"));
    let engine = Arc::new(SyncEngine::new(workspace, Box::new(history)));
    let repositories = apply_interval_override(&config, options.interval_override);

    if let Some(name) = &options.repository {
        let repository = repositories
            .iter()
            .find(|repository| &repository.name == name)
            .ok_or_else(|| StartError::UnknownRepository(name.clone()))?;
        let failed = run_once(&engine, std::slice::from_ref(repository), options.check);
        return finish(failed);
    }

    if options.once || options.check {
        let failed = run_once(&engine, &repositories, options.check);
        return finish(failed);
    }

    let mut scheduler = Scheduler::new(engine.clone());
    scheduler.reconcile(&repositories);

    wait_for_signals(&engine, &mut scheduler, &options)?;

    Ok(())
}

/// Sync (or just check) every given repository one time. Failures are
/// logged per repository and don't stop the remaining ones; the number of
/// failed repositories is returned.
pub fn run_once(engine: &SyncEngine, repositories: &[Repository], check_only: bool) -> usize {
    let mut failed = 0;
    for repository in repositories {
        let result = if check_only {
            engine.check_for_changes(repository).map(|changed| {
                if changed {
                    info!("[{}] Updates are available.", repository.name);
                } else {
                    info!("[{}] Up to date.", repository.name);
                }
            })
        } else {
            engine
                .check_and_sync(repository, SyncKind::Manual)
                .map(|outcome| {
                    if outcome == SyncOutcome::UpToDate {
                        info!("[{}] Up to date.", repository.name);
                    }
                })
        };

        if let Err(err) = result {
            error!("[{}] Failed: {err}.", repository.name);
            failed += 1;
        }
    }
    failed
}

fn finish(failed: usize) -> Result<(), StartError> {
    if failed > 0 {
        Err(StartError::FailedRuns(failed))
    } else {
        Ok(())
    }
}

/// Replace the interval of every auto-synced repository, e.g. from the
/// command line.
fn apply_interval_override(config: &Config, interval: Option<Duration>) -> Vec<Repository> {
    let mut repositories = config.repositories.clone();
    if let Some(interval) = interval {
        for repository in &mut repositories {
            if let Some(auto_sync) = &mut repository.auto_sync {
                if auto_sync.enabled {
                    auto_sync.interval = interval.as_secs();
                }
            }
        }
    }
    repositories
}

/// Block until a termination signal arrives, reloading the configuration
/// and reconciling the timers on SIGHUP. The first termination signal
/// cancels running syncs and stops every timer.
#[cfg(unix)]
fn wait_for_signals(
    engine: &Arc<SyncEngine>,
    scheduler: &mut Scheduler,
    options: &StartOptions,
) -> Result<(), StartError> {
    use signal_hook::{
        consts::{SIGHUP, TERM_SIGNALS},
        iterator::Signals,
    };

    let mut signals: Vec<i32> = TERM_SIGNALS.to_vec();
    signals.push(SIGHUP);
    let mut signals = Signals::new(signals)?;

    for signal in signals.forever() {
        if signal == SIGHUP {
            info!("Received SIGHUP, reloading the configuration.");
            match config::load(&options.config_path) {
                Ok(config) => {
                    let repositories =
                        apply_interval_override(&config, options.interval_override);
                    scheduler.reconcile(&repositories);
                }
                Err(err) => {
                    error!("Cannot reload the configuration, keeping the current timers: {err}.");
                }
            }
        } else {
            info!("Received signal {signal}, shutting down.");
            break;
        }
    }

    engine.cancel();
    scheduler.stop_all();

    Ok(())
}

#[cfg(not(unix))]
fn wait_for_signals(
    _engine: &Arc<SyncEngine>,
    _scheduler: &mut Scheduler,
    _options: &StartOptions,
) -> Result<(), StartError> {
    // No signal handling here; the timers run until the process is killed.
    loop {
        std::thread::park();
    }
}
