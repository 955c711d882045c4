use super::{Source, SourceError};
use log::debug;
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

/// A source that reads directly from an accessible directory, e.g. a
/// mounted network share, skipping the remote fetch entirely.
///
/// The configured path is used as the staged root as-is; nothing is copied
/// into the staging area and nothing of the source is ever removed.
pub struct LocalSource {
    path: PathBuf,
}

/// A custom error describing the error cases for the LocalSource.
#[derive(Debug, Error)]
pub enum LocalError {
    /// The configured path does not exist.
    #[error("{0} does not exist")]
    NotFound(String),
    /// The configured path exists but is not a directory.
    #[error("{0} is not a directory")]
    NotADirectory(String),
    /// The configured path cannot be read.
    #[error("cannot read {0}: {1}")]
    Unreadable(String, String),
}

impl From<LocalError> for SourceError {
    fn from(value: LocalError) -> Self {
        match value {
            LocalError::NotFound(_) | LocalError::NotADirectory(_) => {
                SourceError::PathMissing(value.to_string())
            }
            LocalError::Unreadable(_, _) => SourceError::FetchFailed(value.to_string()),
        }
    }
}

impl LocalSource {
    pub fn new(path: &str) -> Self {
        LocalSource {
            path: normalize_source_path(path),
        }
    }

    fn validate(&self) -> Result<(), LocalError> {
        let display = self.path.display().to_string();
        if !self.path.exists() {
            return Err(LocalError::NotFound(display));
        }
        if !self.path.is_dir() {
            return Err(LocalError::NotADirectory(display));
        }
        fs::read_dir(&self.path)
            .map_err(|err| LocalError::Unreadable(display, err.to_string()))?;

        Ok(())
    }
}

impl Source for LocalSource {
    fn identity(&self) -> String {
        self.path.display().to_string()
    }

    /// Check that the directory is accessible and use it as the staged root.
    fn stage(&self, _staging: &Path) -> Result<PathBuf, SourceError> {
        self.validate()?;
        debug!("Reading source files directly from {}.", self.path.display());

        Ok(self.path.clone())
    }
}

/// Normalize the configured path for the current platform. Network shares
/// can be spelled `\\server\share` or `//server/share`; local paths are
/// kept as they are.
#[cfg(windows)]
fn normalize_source_path(path: &str) -> PathBuf {
    if path.starts_with("//") || path.starts_with(r"\\") {
        PathBuf::from(format!(r"\\{}", path[2..].replace('/', r"\")))
    } else {
        PathBuf::from(path)
    }
}

#[cfg(not(windows))]
fn normalize_source_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix(r"\\") {
        PathBuf::from(format!("//{}", stripped.replace('\\', "/")))
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::distributions::{Alphanumeric, DistString};
    use std::error::Error;

    #[test]
    fn it_should_stage_an_existing_directory() -> Result<(), Box<dyn Error>> {
        let id = Alphanumeric.sample_string(&mut rand::thread_rng(), 16);
        let root = format!("test_directories/{id}");
        fs::create_dir_all(format!("{root}/user"))?;
        fs::write(format!("{root}/user/a.proto"), "a")?;

        let source = LocalSource::new(&root);
        let staged_root = source.stage(Path::new("unused"))?;

        assert_eq!(PathBuf::from(&root), staged_root);
        assert!(staged_root.join("user/a.proto").exists());

        fs::remove_dir_all(root)?;

        Ok(())
    }

    #[test]
    fn it_should_fail_on_a_missing_directory() {
        let source = LocalSource::new("/path/to/nowhere");
        let error = source.stage(Path::new("unused")).err().unwrap();

        assert!(
            matches!(error, SourceError::PathMissing(_)),
            "{error:?} should be PathMissing"
        );
    }

    #[test]
    fn it_should_fail_on_a_file_path() -> Result<(), Box<dyn Error>> {
        let id = Alphanumeric.sample_string(&mut rand::thread_rng(), 16);
        let root = format!("test_directories/{id}");
        fs::create_dir_all(&root)?;
        fs::write(format!("{root}/a.proto"), "a")?;

        let source = LocalSource::new(&format!("{root}/a.proto"));
        let error = source.stage(Path::new("unused")).err().unwrap();

        assert!(
            matches!(error, SourceError::PathMissing(_)),
            "{error:?} should be PathMissing"
        );

        fs::remove_dir_all(root)?;

        Ok(())
    }

    #[test]
    #[cfg(not(windows))]
    fn it_should_normalize_backslash_network_paths() {
        assert_eq!(
            PathBuf::from("//files/project/proto"),
            normalize_source_path(r"\\files\project\proto")
        );
    }

    #[test]
    #[cfg(not(windows))]
    fn it_should_keep_local_paths_unchanged() {
        assert_eq!(PathBuf::from("/mnt/proto"), normalize_source_path("/mnt/proto"));
    }
}
