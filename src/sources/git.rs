use super::{Source, SourceError};
use duct::cmd;
use log::{debug, trace};
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

/// A source that stages one subdirectory of one branch of a remote git
/// repository, without downloading the rest of the repository.
///
/// The clone is shallow (a single commit), blob-filtered and checkout-less;
/// the working tree is narrowed with a cone-mode sparse-checkout before the
/// branch is materialized. Only the files under the source directory (and
/// the files of its ancestor directories) end up on disk.
pub struct GitSource {
    url: String,
    branch: String,
    source_directory: String,
}

/// A custom error describing the error cases for the GitSource.
#[derive(Debug, Error)]
pub enum GitError {
    /// The git binary could not be started at all.
    #[error("cannot run git: {0}")]
    GitUnavailable(#[from] std::io::Error),
    /// A git command returned a non-zero exit code. The parameters are the
    /// command line and its combined output.
    #[error("git {0} failed: {1}")]
    GitFailed(String, String),
    /// git printed something that is not UTF-8.
    #[error("git returned invalid characters")]
    NonUtf8Output,
    /// The source directory is not present on the branch after the
    /// sparse checkout.
    #[error("{0} does not exist on branch {1}")]
    SparsePathMissing(String, String),
}

impl From<GitError> for SourceError {
    fn from(value: GitError) -> Self {
        match value {
            GitError::SparsePathMissing(_, _) => SourceError::PathMissing(value.to_string()),
            GitError::GitUnavailable(_) | GitError::GitFailed(_, _) | GitError::NonUtf8Output => {
                SourceError::FetchFailed(value.to_string())
            }
        }
    }
}

impl GitSource {
    pub fn new(url: String, branch: String, source_directory: String) -> Self {
        GitSource {
            url,
            branch,
            source_directory,
        }
    }

    /// The sparse selection: the source directory and every ancestor prefix,
    /// so intermediate directories are populated for nested paths.
    fn sparse_prefixes(&self) -> Vec<String> {
        let mut prefixes: Vec<String> = vec![];
        let mut prefix = String::new();
        for segment in self.source_directory.split('/').filter(|s| !s.is_empty()) {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            prefixes.push(prefix.clone());
        }
        prefixes
    }

    fn stage_inner(&self, staging: &Path) -> Result<PathBuf, GitError> {
        fs::create_dir_all(staging)?;
        let staging_str = staging.display().to_string();

        debug!("Cloning {} (branch {}) into {staging_str}.", self.url, self.branch);
        run_git(
            None,
            &[
                "clone",
                "--depth",
                "1",
                "--filter=blob:none",
                "--no-checkout",
                "--branch",
                self.branch.as_str(),
                self.url.as_str(),
                staging_str.as_str(),
            ],
        )?;

        run_git(Some(staging), &["sparse-checkout", "init", "--cone"])?;

        let prefixes = self.sparse_prefixes();
        let mut set_args: Vec<&str> = vec!["sparse-checkout", "set"];
        set_args.extend(prefixes.iter().map(String::as_str));
        run_git(Some(staging), &set_args)?;

        run_git(Some(staging), &["checkout", &self.branch])?;

        let staged_root = staging.join(&self.source_directory);
        if !staged_root.is_dir() {
            return Err(GitError::SparsePathMissing(
                self.source_directory.clone(),
                self.branch.clone(),
            ));
        }

        Ok(staged_root)
    }
}

impl Source for GitSource {
    fn identity(&self) -> String {
        self.url.clone()
    }

    /// Stage the source directory of the branch with a narrow fetch:
    /// shallow blob-filtered clone, cone-mode sparse selection, checkout.
    fn stage(&self, staging: &Path) -> Result<PathBuf, SourceError> {
        let staged_root = self.stage_inner(staging)?;

        Ok(staged_root)
    }
}

fn run_git(dir: Option<&Path>, args: &[&str]) -> Result<String, GitError> {
    let mut expression = cmd("git", args);
    if let Some(dir) = dir {
        expression = expression.dir(dir);
    }

    let output = expression
        .stderr_to_stdout()
        .stdout_capture()
        .unchecked()
        .run()?;

    let output_str = std::str::from_utf8(&output.stdout).map_err(|_| GitError::NonUtf8Output)?;
    let output_str = output_str.trim_end().to_string();
    trace!("git {}: {output_str}", args.join(" "));

    if output.status.success() {
        Ok(output_str)
    } else {
        Err(GitError::GitFailed(args.join(" "), output_str))
    }
}
