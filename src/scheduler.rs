use crate::{
    config::Repository,
    history::SyncKind,
    sync::{SyncError, SyncOutcome},
};
use duration_string::DurationString;
use log::{debug, error, info, warn};
use mockall::automock;
use std::{
    collections::HashMap,
    sync::{
        mpsc::{self, RecvTimeoutError, Sender},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

/// Something that can run one sync for one repository. The engine
/// implements this; the indirection keeps the scheduler testable.
#[automock]
pub trait SyncRunner: Send + Sync {
    fn sync(&self, repository: &Repository, kind: SyncKind) -> Result<SyncOutcome, SyncError>;
}

struct TimerHandle {
    interval: Duration,
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

/// One recurring timer per auto-sync repository, each on its own thread.
///
/// Timers are reconciled against the configured repository list whenever
/// the configuration changes; [Scheduler::reconcile] is idempotent. A
/// failure in one repository's run is logged on its own timer thread and
/// never affects another repository's timer.
pub struct Scheduler {
    runner: Arc<dyn SyncRunner>,
    timers: HashMap<String, TimerHandle>,
}

impl Scheduler {
    pub fn new(runner: Arc<dyn SyncRunner>) -> Self {
        Scheduler {
            runner,
            timers: HashMap::new(),
        }
    }

    /// Bring the running timers in line with the repository list: stop
    /// timers for repositories that are gone or no longer auto-synced,
    /// restart timers whose interval changed, start missing ones.
    pub fn reconcile(&mut self, repositories: &[Repository]) {
        let stale: Vec<String> = self
            .timers
            .iter()
            .filter(|(name, handle)| {
                let interval = repositories
                    .iter()
                    .find(|repository| &repository.name == *name)
                    .and_then(Repository::auto_sync_interval);
                interval != Some(handle.interval)
            })
            .map(|(name, _)| name.clone())
            .collect();
        for name in stale {
            self.stop_timer(&name);
        }

        for repository in repositories {
            if let Some(interval) = repository.auto_sync_interval() {
                if !self.timers.contains_key(&repository.name) {
                    self.start_timer(repository, interval);
                }
            }
        }
    }

    /// Stop every timer unconditionally, waiting for running syncs to
    /// finish their current run.
    pub fn stop_all(&mut self) {
        let names: Vec<String> = self.timers.keys().cloned().collect();
        for name in names {
            self.stop_timer(&name);
        }
    }

    fn start_timer(&mut self, repository: &Repository, interval: Duration) {
        info!(
            "[{}] Starting auto-sync in every {}.",
            repository.name,
            DurationString::new(interval)
        );

        let (stop, stopped) = mpsc::channel::<()>();
        let runner = Arc::clone(&self.runner);
        let name = repository.name.clone();
        let repository = repository.clone();
        let thread = thread::spawn(move || loop {
            match stopped.recv_timeout(interval) {
                // Stopped explicitly, or the scheduler is gone.
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    debug!("[{}] Timer fired.", repository.name);
                    match runner.sync(&repository, SyncKind::Auto) {
                        Ok(SyncOutcome::Synced(files)) => {
                            debug!("[{}] Synced {} files.", repository.name, files.len());
                        }
                        Ok(SyncOutcome::UpToDate) => {}
                        Err(SyncError::AlreadyRunning(_)) => {
                            warn!(
                                "[{}] The previous sync is still running, skipping this tick.",
                                repository.name
                            );
                        }
                        Err(err) => {
                            error!("[{}] Scheduled sync failed: {err}.", repository.name);
                        }
                    }
                }
            }
        });

        self.timers.insert(
            name,
            TimerHandle {
                interval,
                stop,
                thread,
            },
        );
    }

    fn stop_timer(&mut self, name: &str) {
        if let Some(handle) = self.timers.remove(name) {
            info!("[{name}] Stopping auto-sync.");
            // The thread may have exited already; sending is best-effort.
            let _ = handle.stop.send(());
            if handle.thread.join().is_err() {
                error!("[{name}] The auto-sync timer panicked.");
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop_all();
    }
}
