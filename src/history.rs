use mockall::automock;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{self, Display},
    fs::{self, OpenOptions},
    io::Write,
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};
use thiserror::Error;

/// A custom error describing the error cases for the history sink.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// The history file cannot be written.
    #[error("cannot write the history file: {0}")]
    Unwritable(#[from] std::io::Error),
    /// The history entry cannot be serialized.
    #[error("cannot serialize the history entry: {0}")]
    Unserializable(#[from] serde_json::Error),
}

/// Whether a run synced successfully or failed.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Success,
    Failed,
}

/// What triggered a run: a user action or a timer.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncKind {
    Manual,
    Auto,
}

impl Display for SyncKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncKind::Manual => write!(f, "manual"),
            SyncKind::Auto => write!(f, "auto"),
        }
    }
}

/// The immutable record of one completed sync run.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncHistoryEntry {
    pub id: String,
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
    pub repository: String,
    pub branch: String,
    /// The relative paths that were copied.
    pub files: Vec<String>,
    pub status: SyncStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock duration in milliseconds.
    pub duration: u64,
    pub sync_type: SyncKind,
}

impl SyncHistoryEntry {
    pub fn success(
        repository: &str,
        branch: &str,
        kind: SyncKind,
        files: Vec<String>,
        duration_ms: u64,
    ) -> Self {
        SyncHistoryEntry {
            id: generate_id(),
            timestamp: now_ms(),
            repository: repository.to_string(),
            branch: branch.to_string(),
            files,
            status: SyncStatus::Success,
            error: None,
            duration: duration_ms,
            sync_type: kind,
        }
    }

    pub fn failure(
        repository: &str,
        branch: &str,
        kind: SyncKind,
        error: String,
        duration_ms: u64,
    ) -> Self {
        SyncHistoryEntry {
            id: generate_id(),
            timestamp: now_ms(),
            repository: repository.to_string(),
            branch: branch.to_string(),
            files: vec![],
            status: SyncStatus::Failed,
            error: Some(error),
            duration: duration_ms,
            sync_type: kind,
        }
    }
}

/// Aggregated numbers over a set of history entries.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatistics {
    pub total_syncs: usize,
    pub successful_syncs: usize,
    pub failed_syncs: usize,
    pub total_files: usize,
    /// Average run duration in milliseconds.
    pub average_duration: u64,
    /// The timestamp of the newest entry, in milliseconds.
    pub last_sync: u64,
}

impl SyncStatistics {
    pub fn from_entries(entries: &[SyncHistoryEntry]) -> Self {
        if entries.is_empty() {
            return SyncStatistics::default();
        }

        let successful_syncs = entries
            .iter()
            .filter(|entry| entry.status == SyncStatus::Success)
            .count();
        let total_duration: u64 = entries.iter().map(|entry| entry.duration).sum();

        SyncStatistics {
            total_syncs: entries.len(),
            successful_syncs,
            failed_syncs: entries.len() - successful_syncs,
            total_files: entries.iter().map(|entry| entry.files.len()).sum(),
            average_duration: total_duration / entries.len() as u64,
            last_sync: entries.iter().map(|entry| entry.timestamp).max().unwrap_or(0),
        }
    }
}

/// An append-only consumer of sync run records. The engine only ever
/// writes records, it never reads them back.
#[automock]
pub trait HistorySink {
    /// Append one record for a completed run.
    fn append(&self, entry: &SyncHistoryEntry) -> Result<(), HistoryError>;
}

/// A history sink appending one JSON document per line to a file.
pub struct FileHistory {
    path: PathBuf,
}

impl FileHistory {
    pub fn new(path: PathBuf) -> Self {
        FileHistory { path }
    }
}

impl HistorySink for FileHistory {
    fn append(&self, entry: &SyncHistoryEntry) -> Result<(), HistoryError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(entry)?;
        writeln!(file, "{line}")?;

        Ok(())
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

fn generate_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.subsec_nanos())
        .unwrap_or(0);
    format!("{}-{:08x}", now_ms(), nanos)
}
