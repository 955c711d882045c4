use crate::{
    changes::BaselineCache,
    config::Repository,
    history::{HistorySink, SyncHistoryEntry, SyncKind},
    hooks,
    materialize::{materialize, MaterializeError, Selection},
    patterns::PatternFilter,
    scheduler::SyncRunner,
    sources::{git::GitSource, local::LocalSource, Source, SourceError},
    walk,
};
use log::{debug, info, warn};
use std::{
    collections::HashSet,
    env, fs, io,
    path::{Path, PathBuf},
    process,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::{Instant, SystemTime, UNIX_EPOCH},
};
use thiserror::Error;

/// A custom error describing the error cases for a sync run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The repository is misconfigured, e.g. an invalid pattern or an
    /// uncreatable target directory.
    #[error("not configured correctly: {0}")]
    Misconfigured(String),
    /// Another run for the same repository is still active.
    #[error("a sync for {0} is already running")]
    AlreadyRunning(String),
    /// Staging the source files failed.
    #[error("cannot stage the source files: {0}")]
    FailedFetch(String),
    /// Inspecting the staged files failed.
    #[error("cannot inspect the staged files: {0}")]
    FailedCheck(String),
    /// Copying files into the target failed. Files already copied stay.
    #[error("cannot copy files into the target: {0}")]
    FailedCopy(String),
    /// The run was cancelled between two steps.
    #[error("the sync was cancelled")]
    Cancelled,
}

impl From<SourceError> for SyncError {
    fn from(value: SourceError) -> Self {
        match value {
            SourceError::Misconfigured(_) => SyncError::Misconfigured(value.to_string()),
            SourceError::FetchFailed(_) | SourceError::PathMissing(_) => {
                SyncError::FailedFetch(value.to_string())
            }
        }
    }
}

impl From<MaterializeError> for SyncError {
    fn from(value: MaterializeError) -> Self {
        match value {
            MaterializeError::Cancelled => SyncError::Cancelled,
            MaterializeError::Walk(_)
            | MaterializeError::CreateDir(_, _)
            | MaterializeError::Copy(_, _) => SyncError::FailedCopy(value.to_string()),
        }
    }
}

/// The result of one completed run.
#[derive(Debug, PartialEq)]
pub enum SyncOutcome {
    /// Changes were found and these relative paths were copied.
    Synced(Vec<String>),
    /// Nothing was newer than the last sync.
    UpToDate,
}

/// The sync engine, tying the whole chain together for each repository:
/// stage the source, detect changes, copy into the target, run post-sync
/// commands, record history, remove the staging area.
///
/// One engine owns the change baseline, the in-flight guards and the
/// history sink; it is shared (behind an [Arc]) between the scheduler
/// timers and manual triggers. Runs for different repositories are
/// independent; a second run for the *same* repository is refused while
/// one is active.
pub struct SyncEngine {
    workspace_root: PathBuf,
    history: Box<dyn HistorySink + Send + Sync>,
    baseline: Mutex<BaselineCache>,
    in_flight: Mutex<HashSet<String>>,
    cancelled: Arc<AtomicBool>,
}

impl SyncEngine {
    pub fn new(workspace_root: PathBuf, history: Box<dyn HistorySink + Send + Sync>) -> Self {
        SyncEngine {
            workspace_root,
            history,
            baseline: Mutex::new(BaselineCache::new()),
            in_flight: Mutex::new(HashSet::new()),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Ask every running and future step to stop at the next opportunity.
    /// Copies are not interrupted mid-file.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Run the full chain for one repository.
    pub fn check_and_sync(
        &self,
        repository: &Repository,
        kind: SyncKind,
    ) -> Result<SyncOutcome, SyncError> {
        let source = build_source(repository);
        self.sync_with_source(repository, source.as_ref(), kind)
    }

    /// Run the full chain with an explicit source. The staging area is
    /// removed on every exit path, and one history record is written for
    /// both the synced and the failed case.
    pub fn sync_with_source(
        &self,
        repository: &Repository,
        source: &dyn Source,
        kind: SyncKind,
    ) -> Result<SyncOutcome, SyncError> {
        let _guard = InFlightGuard::begin(&self.in_flight, &repository.name)
            .ok_or_else(|| SyncError::AlreadyRunning(repository.name.clone()))?;

        let started = Instant::now();
        let staging = staging_path();
        let result = self.run_stages(repository, source, &staging);

        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(SyncOutcome::Synced(files)) => {
                info!("[{}] Synced {} files.", repository.name, files.len());
                self.record_history(SyncHistoryEntry::success(
                    &repository.name,
                    &repository.branch,
                    kind,
                    files.clone(),
                    duration_ms,
                ));
            }
            Ok(SyncOutcome::UpToDate) => {}
            Err(err) => {
                self.record_history(SyncHistoryEntry::failure(
                    &repository.name,
                    &repository.branch,
                    kind,
                    err.to_string(),
                    duration_ms,
                ));
            }
        }

        remove_staging(&staging);

        result
    }

    /// Stage the source and report whether anything is newer than the last
    /// sync, without copying and without touching the baseline. Useful as
    /// a preview before asking the user to sync.
    pub fn check_for_changes(&self, repository: &Repository) -> Result<bool, SyncError> {
        let source = build_source(repository);
        let staging = staging_path();

        let result: Result<bool, SyncError> = (|| {
            let staged_root = source.stage(&staging)?;
            lock(&self.baseline)
                .has_changes(&source.identity(), &staged_root)
                .map_err(|err| SyncError::FailedCheck(err.to_string()))
        })();

        remove_staging(&staging);

        result
    }

    /// Stage the source and list the relative paths the patterns would
    /// include, e.g. to offer a file selection.
    pub fn list_files(&self, repository: &Repository) -> Result<Vec<String>, SyncError> {
        let source = build_source(repository);
        let staging = staging_path();

        let result: Result<Vec<String>, SyncError> = (|| {
            let staged_root = source.stage(&staging)?;
            let filter =
                PatternFilter::new(&repository.file_patterns, &repository.exclude_patterns)
                    .map_err(|err| SyncError::Misconfigured(err.to_string()))?;

            let mut files: Vec<String> = vec![];
            walk::visit_files(&staged_root, &mut |_: &Path, relative: &Path| {
                let relative_path = walk::relative_slash(relative);
                if filter.is_included(&relative_path) {
                    files.push(relative_path);
                }
                Ok::<bool, io::Error>(true)
            })
            .map_err(|err| SyncError::FailedCheck(err.to_string()))?;

            Ok(files)
        })();

        remove_staging(&staging);

        result
    }

    fn run_stages(
        &self,
        repository: &Repository,
        source: &dyn Source,
        staging: &Path,
    ) -> Result<SyncOutcome, SyncError> {
        if self.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        info!("[{}] Checking for updates.", repository.name);
        let staged_root = source.stage(staging)?;
        let identity = source.identity();

        let changed = lock(&self.baseline)
            .has_changes(&identity, &staged_root)
            .map_err(|err| SyncError::FailedCheck(err.to_string()))?;
        if !changed {
            debug!("[{}] No changes detected.", repository.name);
            return Ok(SyncOutcome::UpToDate);
        }

        if self.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let target_root = self.resolve_target(repository)?;
        let selection = Selection::from_repository(repository)
            .map_err(|err| SyncError::Misconfigured(err.to_string()))?;

        info!(
            "[{}] Changes detected, copying into {}.",
            repository.name,
            target_root.display()
        );
        let files = materialize(&staged_root, &target_root, &selection, Some(&self.cancelled))?;
        for file in &files {
            debug!("[{}] Updated {file}.", repository.name);
        }

        if let Err(err) = lock(&self.baseline).record(&identity, &staged_root) {
            warn!(
                "[{}] Cannot remember the synced state, the next check will sync again: {err}.",
                repository.name
            );
        }

        if !repository.post_sync_commands.is_empty() {
            info!(
                "[{}] Running {} post-sync commands.",
                repository.name,
                repository.post_sync_commands.len()
            );
            hooks::run_post_sync_commands(
                &self.workspace_root,
                &repository.name,
                &repository.post_sync_commands,
            );
        }

        Ok(SyncOutcome::Synced(files))
    }

    /// The target directory resolves against the workspace root and has to
    /// exist before any file is copied.
    fn resolve_target(&self, repository: &Repository) -> Result<PathBuf, SyncError> {
        let target = PathBuf::from(&repository.target_directory);
        let target = if target.is_absolute() {
            target
        } else {
            self.workspace_root.join(target)
        };
        fs::create_dir_all(&target).map_err(|err| {
            SyncError::Misconfigured(format!(
                "cannot create the target directory {}: {err}",
                target.display()
            ))
        })?;

        Ok(target)
    }

    fn record_history(&self, entry: SyncHistoryEntry) {
        if let Err(err) = self.history.append(&entry) {
            warn!("[{}] Cannot record the sync history: {err}.", entry.repository);
        }
    }
}

impl SyncRunner for SyncEngine {
    fn sync(&self, repository: &Repository, kind: SyncKind) -> Result<SyncOutcome, SyncError> {
        self.check_and_sync(repository, kind)
    }
}

/// Pick the source mode for a repository: a directly readable directory
/// when internal sync is enabled, a narrow git fetch otherwise.
fn build_source(repository: &Repository) -> Box<dyn Source> {
    if repository.uses_internal_sync() {
        let path = repository
            .internal_sync
            .as_ref()
            .map(|internal| internal.path.as_str())
            .unwrap_or_default();
        Box::new(LocalSource::new(path))
    } else {
        Box::new(GitSource::new(
            repository.url.clone(),
            repository.branch.clone(),
            repository.source_directory.clone(),
        ))
    }
}

static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A fresh staging path for one run, never shared between runs.
fn staging_path() -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos())
        .unwrap_or(0);
    let count = STAGING_COUNTER.fetch_add(1, Ordering::Relaxed);
    env::temp_dir().join(format!("stacksync-{}-{nanos}-{count}", process::id()))
}

/// Remove the staging area. A failure here is logged and never changes
/// the result of the run.
fn remove_staging(staging: &Path) {
    if !staging.exists() {
        return;
    }
    match fs::remove_dir_all(staging) {
        Ok(()) => debug!("Removed the staging directory {}.", staging.display()),
        Err(err) => warn!(
            "Cannot remove the staging directory {}: {err}.",
            staging.display()
        ),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Marks one repository as having a run in flight, releasing the mark on
/// drop. Only one guard per name can exist at a time.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    name: String,
}

impl<'a> InFlightGuard<'a> {
    fn begin(in_flight: &'a Mutex<HashSet<String>>, name: &str) -> Option<Self> {
        if lock(in_flight).insert(name.to_string()) {
            Some(InFlightGuard {
                in_flight,
                name: name.to_string(),
            })
        } else {
            None
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock(self.in_flight).remove(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{InternalSyncConfig, PostSyncCommand},
        history::{HistoryError, SyncStatus},
        sources::MockSource,
    };
    use rand::distributions::{Alphanumeric, DistString};
    use std::{error::Error, sync::Arc};

    /// A history sink keeping the entries in memory for assertions.
    #[derive(Clone, Default)]
    struct MemoryHistory {
        entries: Arc<Mutex<Vec<SyncHistoryEntry>>>,
    }

    impl MemoryHistory {
        fn entries(&self) -> Vec<SyncHistoryEntry> {
            lock(&self.entries).clone()
        }
    }

    impl HistorySink for MemoryHistory {
        fn append(&self, entry: &SyncHistoryEntry) -> Result<(), HistoryError> {
            lock(&self.entries).push(entry.clone());
            Ok(())
        }
    }

    fn create_fixture(files: &[&str]) -> Result<(PathBuf, PathBuf), Box<dyn Error>> {
        let id = Alphanumeric.sample_string(&mut rand::thread_rng(), 16);
        let base = PathBuf::from(format!("test_directories/{id}"));
        let workspace = base.join("workspace");
        let source = base.join("source");
        fs::create_dir_all(&workspace)?;
        for file in files {
            let path = source.join(file);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, *file)?;
        }
        Ok((base, source))
    }

    fn local_repository(name: &str, source: &Path) -> Repository {
        Repository {
            name: String::from(name),
            url: String::new(),
            branch: String::new(),
            source_directory: String::new(),
            target_directory: String::from("target"),
            file_patterns: vec![String::from("**/*.proto")],
            exclude_patterns: vec![String::from("**/backend/**")],
            post_sync_commands: vec![],
            auto_sync: None,
            internal_sync: Some(InternalSyncConfig {
                enabled: true,
                path: source.display().to_string(),
            }),
            selected_files: None,
        }
    }

    fn create_engine(base: &Path) -> (SyncEngine, MemoryHistory) {
        let history = MemoryHistory::default();
        let engine = SyncEngine::new(base.join("workspace"), Box::new(history.clone()));
        (engine, history)
    }

    #[test]
    fn it_should_sync_matching_files_and_record_history() -> Result<(), Box<dyn Error>> {
        let (base, source) =
            create_fixture(&["user/a.proto", "backend/b.proto", "user/c.txt"])?;
        let (engine, history) = create_engine(&base);
        let repository = local_repository("protos", &source);

        let outcome = engine.check_and_sync(&repository, SyncKind::Manual)?;
        assert_eq!(
            SyncOutcome::Synced(vec![String::from("user/a.proto")]),
            outcome
        );
        assert!(base.join("workspace/target/user/a.proto").exists());
        assert!(!base.join("workspace/target/backend/b.proto").exists());

        let entries = history.entries();
        assert_eq!(1, entries.len());
        assert_eq!(SyncStatus::Success, entries[0].status);
        assert_eq!(vec![String::from("user/a.proto")], entries[0].files);
        assert_eq!("protos", entries[0].repository);

        fs::remove_dir_all(base)?;

        Ok(())
    }

    #[test]
    fn it_should_be_up_to_date_on_the_second_run() -> Result<(), Box<dyn Error>> {
        let (base, source) = create_fixture(&["user/a.proto"])?;
        let (engine, history) = create_engine(&base);
        let repository = local_repository("protos", &source);

        engine.check_and_sync(&repository, SyncKind::Manual)?;
        let outcome = engine.check_and_sync(&repository, SyncKind::Manual)?;

        assert_eq!(SyncOutcome::UpToDate, outcome);
        // Only the first run was recorded.
        assert_eq!(1, history.entries().len());

        fs::remove_dir_all(base)?;

        Ok(())
    }

    #[test]
    fn it_should_record_a_failed_run() -> Result<(), Box<dyn Error>> {
        let (base, _) = create_fixture(&[])?;
        let (engine, history) = create_engine(&base);
        let repository = local_repository("protos", Path::new("/path/to/nowhere"));

        let error = engine
            .check_and_sync(&repository, SyncKind::Auto)
            .err()
            .unwrap();
        assert!(
            matches!(error, SyncError::FailedFetch(_)),
            "{error:?} should be FailedFetch"
        );

        let entries = history.entries();
        assert_eq!(1, entries.len());
        assert_eq!(SyncStatus::Failed, entries[0].status);
        assert!(entries[0].error.as_ref().unwrap().contains("does not exist"));

        fs::remove_dir_all(base)?;

        Ok(())
    }

    #[test]
    fn it_should_record_fatal_source_errors_from_a_mock() -> Result<(), Box<dyn Error>> {
        let (base, _) = create_fixture(&[])?;
        let (engine, history) = create_engine(&base);
        let repository = local_repository("protos", Path::new("unused"));

        let mut source = MockSource::new();
        source
            .expect_identity()
            .returning(|| String::from("mock://protos"));
        source
            .expect_stage()
            .returning(|_| Err(SourceError::FetchFailed(String::from("cannot fetch"))));

        let error = engine
            .sync_with_source(&repository, &source, SyncKind::Auto)
            .err()
            .unwrap();
        assert!(
            matches!(error, SyncError::FailedFetch(_)),
            "{error:?} should be FailedFetch"
        );
        assert_eq!(1, history.entries().len());

        fs::remove_dir_all(base)?;

        Ok(())
    }

    #[test]
    fn it_should_not_touch_the_baseline_when_checking_only() -> Result<(), Box<dyn Error>> {
        let (base, source) = create_fixture(&["user/a.proto"])?;
        let (engine, history) = create_engine(&base);
        let repository = local_repository("protos", &source);

        assert!(engine.check_for_changes(&repository)?);
        // The preview didn't sync anything, the real run still finds changes.
        let outcome = engine.check_and_sync(&repository, SyncKind::Manual)?;
        assert!(matches!(outcome, SyncOutcome::Synced(_)));
        // And after the real run the preview agrees there is nothing new.
        assert!(!engine.check_for_changes(&repository)?);
        assert_eq!(1, history.entries().len());

        fs::remove_dir_all(base)?;

        Ok(())
    }

    #[test]
    fn it_should_restrict_to_the_selected_files() -> Result<(), Box<dyn Error>> {
        let (base, source) = create_fixture(&["a/x.proto", "a/y.proto"])?;
        let (engine, _) = create_engine(&base);
        let mut repository = local_repository("protos", &source);
        repository.selected_files = Some(vec![String::from("a/x.proto")]);

        let outcome = engine.check_and_sync(&repository, SyncKind::Manual)?;
        assert_eq!(SyncOutcome::Synced(vec![String::from("a/x.proto")]), outcome);
        assert!(!base.join("workspace/target/a/y.proto").exists());

        fs::remove_dir_all(base)?;

        Ok(())
    }

    #[test]
    fn it_should_list_the_included_files() -> Result<(), Box<dyn Error>> {
        let (base, source) =
            create_fixture(&["user/a.proto", "backend/b.proto", "user/c.txt"])?;
        let (engine, _) = create_engine(&base);
        let repository = local_repository("protos", &source);

        let files = engine.list_files(&repository)?;
        assert_eq!(vec![String::from("user/a.proto")], files);

        fs::remove_dir_all(base)?;

        Ok(())
    }

    #[test]
    fn it_should_run_the_post_sync_commands() -> Result<(), Box<dyn Error>> {
        let (base, source) = create_fixture(&["user/a.proto"])?;
        let (engine, _) = create_engine(&base);
        let mut repository = local_repository("protos", &source);
        repository.post_sync_commands = vec![PostSyncCommand {
            directory: String::from("."),
            command: String::from("touch hook-ran"),
        }];

        engine.check_and_sync(&repository, SyncKind::Manual)?;
        assert!(base.join("workspace/hook-ran").exists());

        fs::remove_dir_all(base)?;

        Ok(())
    }

    #[test]
    fn it_should_refuse_a_second_run_for_the_same_name() {
        let in_flight = Mutex::new(HashSet::new());

        let guard = InFlightGuard::begin(&in_flight, "protos");
        assert!(guard.is_some());
        assert!(InFlightGuard::begin(&in_flight, "protos").is_none());
        assert!(InFlightGuard::begin(&in_flight, "other").is_some());

        drop(guard);
        assert!(InFlightGuard::begin(&in_flight, "protos").is_some());
    }

    #[test]
    fn it_should_fail_fast_when_cancelled() -> Result<(), Box<dyn Error>> {
        let (base, source) = create_fixture(&["user/a.proto"])?;
        let (engine, history) = create_engine(&base);
        let repository = local_repository("protos", &source);

        engine.cancel();
        let error = engine
            .check_and_sync(&repository, SyncKind::Manual)
            .err()
            .unwrap();
        assert!(
            matches!(error, SyncError::Cancelled),
            "{error:?} should be Cancelled"
        );
        assert_eq!(1, history.entries().len());
        assert_eq!(SyncStatus::Failed, history.entries()[0].status);

        fs::remove_dir_all(base)?;

        Ok(())
    }

    #[test]
    fn it_should_generate_unique_staging_paths() {
        let first = staging_path();
        let second = staging_path();
        assert_ne!(first, second);
    }
}
