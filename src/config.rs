use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fs, path::Path, time::Duration};
use thiserror::Error;

/// The file patterns used when a repository doesn't configure any.
pub const DEFAULT_FILE_PATTERNS: &[&str] = &["**/*.proto"];
/// The exclude patterns used when a repository doesn't configure any.
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &["**/backend/**"];
/// The auto-sync interval in seconds used when a repository enables
/// auto-sync without one.
pub const DEFAULT_AUTO_SYNC_INTERVAL: u64 = 300;

/// A custom error for describing the error cases for the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file cannot be read from disk.
    #[error("cannot read the configuration file {0}: {1}")]
    Unreadable(String, String),
    /// The configuration file cannot be written back to disk.
    #[error("cannot write the configuration file {0}: {1}")]
    Unwritable(String, String),
    /// The configuration file is not valid JSON for the expected shape.
    #[error("cannot parse the configuration file: {0}")]
    Invalid(#[from] serde_json::Error),
    /// A repository entry has an empty name.
    #[error("every repository needs a name")]
    MissingName,
    /// Two repository entries share the same name.
    #[error("repository names have to be unique, {0} is duplicated")]
    DuplicateName(String),
    /// A repository entry is missing a required field for its source mode.
    #[error("repository {0} is missing the {1} field")]
    MissingField(String, &'static str),
    /// A repository enables auto-sync with a zero interval.
    #[error("repository {0} has an invalid auto-sync interval")]
    InvalidInterval(String),
    /// A repository name is not present in the configuration.
    #[error("repository {0} is not configured")]
    UnknownRepository(String),
}

/// The periodic sync setting of one repository.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct AutoSyncConfig {
    pub enabled: bool,
    /// The sync interval in seconds.
    #[serde(default = "default_interval")]
    pub interval: u64,
}

/// The alternate source mode reading from a readable directory instead of
/// fetching from a remote repository.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalSyncConfig {
    pub enabled: bool,
    /// A local or network directory, e.g. `/mnt/proto` or `//files/proto`.
    #[serde(default, alias = "networkPath")]
    pub path: String,
}

/// One post-sync shell command with the directory it runs in.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct PostSyncCommand {
    pub directory: String,
    pub command: String,
}

/// The configuration of one sync target.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    /// A unique key, used for timer bookkeeping and history grouping.
    pub name: String,
    /// The remote repository URL, unused in internal-sync mode.
    #[serde(default)]
    pub url: String,
    /// The remote branch, unused in internal-sync mode.
    #[serde(default)]
    pub branch: String,
    /// The directory inside the repository (or the internal-sync root)
    /// to narrow the fetch to.
    #[serde(default)]
    pub source_directory: String,
    /// The local destination, absolute or relative to the workspace root.
    pub target_directory: String,
    #[serde(default = "default_file_patterns")]
    pub file_patterns: Vec<String>,
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_sync_commands: Vec<PostSyncCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_sync: Option<AutoSyncConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_sync: Option<InternalSyncConfig>,
    /// An explicit allow-list of relative paths. When present, only these
    /// files are copied and the patterns are ignored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_files: Option<Vec<String>>,
}

impl Repository {
    /// Whether this repository reads from a readable directory instead of
    /// fetching from a remote.
    pub fn uses_internal_sync(&self) -> bool {
        self.internal_sync
            .as_ref()
            .map(|internal| internal.enabled)
            .unwrap_or(false)
    }

    /// The auto-sync interval, if auto-sync is enabled.
    pub fn auto_sync_interval(&self) -> Option<Duration> {
        self.auto_sync
            .as_ref()
            .filter(|auto_sync| auto_sync.enabled && auto_sync.interval > 0)
            .map(|auto_sync| Duration::from_secs(auto_sync.interval))
    }
}

/// The whole configuration file.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Config {
    #[serde(default)]
    pub repositories: Vec<Repository>,
}

impl Config {
    /// Enable or disable auto-sync for one repository, keeping the
    /// configured interval (or falling back to the default one).
    pub fn set_auto_sync(&mut self, name: &str, enabled: bool) -> Result<(), ConfigError> {
        let repository = self
            .repositories
            .iter_mut()
            .find(|repository| repository.name == name)
            .ok_or_else(|| ConfigError::UnknownRepository(name.to_string()))?;

        let interval = repository
            .auto_sync
            .as_ref()
            .map(|auto_sync| auto_sync.interval)
            .unwrap_or(DEFAULT_AUTO_SYNC_INTERVAL);
        repository.auto_sync = Some(AutoSyncConfig { enabled, interval });

        Ok(())
    }
}

fn default_interval() -> u64 {
    DEFAULT_AUTO_SYNC_INTERVAL
}

fn default_file_patterns() -> Vec<String> {
    DEFAULT_FILE_PATTERNS.iter().map(ToString::to_string).collect()
}

fn default_exclude_patterns() -> Vec<String> {
    DEFAULT_EXCLUDE_PATTERNS.iter().map(ToString::to_string).collect()
}

/// Read and validate the configuration file.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let contents = fs::read_to_string(path)
        .map_err(|err| ConfigError::Unreadable(path.display().to_string(), err.to_string()))?;
    let config: Config = serde_json::from_str(&contents)?;
    validate(&config)?;
    Ok(config)
}

/// Write the configuration file back, creating parent directories if needed.
pub fn save(config: &Config, path: &Path) -> Result<(), ConfigError> {
    let contents = serde_json::to_string_pretty(config)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| ConfigError::Unwritable(path.display().to_string(), err.to_string()))?;
    }
    fs::write(path, contents + "\n")
        .map_err(|err| ConfigError::Unwritable(path.display().to_string(), err.to_string()))
}

/// Check the invariants the engine assumes after this boundary: unique
/// non-empty names, a target directory, and the fields of the active
/// source mode present.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    let mut names: HashSet<&str> = HashSet::new();
    for repository in &config.repositories {
        if repository.name.is_empty() {
            return Err(ConfigError::MissingName);
        }
        if !names.insert(&repository.name) {
            return Err(ConfigError::DuplicateName(repository.name.clone()));
        }
        if repository.target_directory.is_empty() {
            return Err(ConfigError::MissingField(
                repository.name.clone(),
                "targetDirectory",
            ));
        }

        if repository.uses_internal_sync() {
            let internal = repository.internal_sync.as_ref();
            if internal.map(|internal| internal.path.is_empty()).unwrap_or(true) {
                return Err(ConfigError::MissingField(
                    repository.name.clone(),
                    "internalSync.path",
                ));
            }
        } else {
            if repository.url.is_empty() {
                return Err(ConfigError::MissingField(repository.name.clone(), "url"));
            }
            if repository.branch.is_empty() {
                return Err(ConfigError::MissingField(repository.name.clone(), "branch"));
            }
            if repository.source_directory.is_empty() {
                return Err(ConfigError::MissingField(
                    repository.name.clone(),
                    "sourceDirectory",
                ));
            }
        }

        if let Some(auto_sync) = &repository.auto_sync {
            if auto_sync.enabled && auto_sync.interval == 0 {
                return Err(ConfigError::InvalidInterval(repository.name.clone()));
            }
        }
    }

    Ok(())
}
