use mockall::automock;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A source staging files with a sparse, shallow git checkout.
pub mod git;
/// A source reading directly from a readable local or network directory.
pub mod local;

/// A custom error for describing the error cases for sources
#[derive(Debug, Error)]
pub enum SourceError {
    /// Cannot use the source, because it has a misconfiguration.
    #[error("not configured correctly: {0}")]
    Misconfigured(String),
    /// Fetching the source files failed, e.g. network, authentication
    /// or a missing branch.
    #[error("cannot fetch: {0}")]
    FetchFailed(String),
    /// The configured source directory is not present in what was fetched.
    #[error("the source directory is missing: {0}")]
    PathMissing(String),
}

/// A source stages the files of one repository for a single sync run.
///
/// Sources may include:
///   - a sparse git checkout of a remote repository ([git::GitSource])
///   - a readable local or network directory ([local::LocalSource])
#[automock]
pub trait Source {
    /// A stable identity for this source, used to key the change baseline.
    fn identity(&self) -> String;

    /// Stage the source files, using `staging` as scratch space, and return
    /// the staged root that holds the files to inspect and copy.
    fn stage(&self, staging: &Path) -> Result<PathBuf, SourceError>;
}
