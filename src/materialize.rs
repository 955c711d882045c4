use crate::{config::Repository, patterns::PatternFilter, walk};
use log::trace;
use std::{
    collections::HashSet,
    fs, io,
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
};
use thiserror::Error;

/// A custom error describing the error cases for materialization.
#[derive(Debug, Error)]
pub enum MaterializeError {
    /// Reading the staged tree failed.
    #[error("cannot read the staged files: {0}")]
    Walk(#[from] io::Error),
    /// A destination directory could not be created.
    #[error("cannot create directory {0}: {1}")]
    CreateDir(String, String),
    /// Copying a file into the target failed.
    #[error("cannot copy {0}: {1}")]
    Copy(String, String),
    /// The sync was cancelled between two file operations.
    #[error("the sync was cancelled")]
    Cancelled,
}

/// Which staged files qualify for copying.
///
/// An explicit allow-list overrides the patterns entirely; an empty
/// allow-list therefore copies nothing.
pub enum Selection {
    Explicit(HashSet<String>),
    Patterns(PatternFilter),
}

impl Selection {
    /// Build the selection for a repository: its allow-list when one is
    /// present, its include/exclude patterns otherwise.
    pub fn from_repository(repository: &Repository) -> Result<Self, globset::Error> {
        match &repository.selected_files {
            Some(selected) => Ok(Selection::Explicit(selected.iter().cloned().collect())),
            None => Ok(Selection::Patterns(PatternFilter::new(
                &repository.file_patterns,
                &repository.exclude_patterns,
            )?)),
        }
    }

    fn includes(&self, relative_path: &str) -> bool {
        match self {
            Selection::Explicit(selected) => selected.contains(relative_path),
            Selection::Patterns(filter) => filter.is_included(relative_path),
        }
    }
}

/// Copy every qualifying file under the staged root into the target root,
/// keeping the relative layout and overwriting existing files. Returns the
/// copied relative paths in traversal order.
///
/// The first I/O error aborts the whole copy; files already written stay
/// in place. The optional cancellation flag is checked between files, never
/// during a copy.
pub fn materialize(
    staged_root: &Path,
    target_root: &Path,
    selection: &Selection,
    cancelled: Option<&AtomicBool>,
) -> Result<Vec<String>, MaterializeError> {
    fs::create_dir_all(target_root)
        .map_err(|err| MaterializeError::CreateDir(target_root.display().to_string(), err.to_string()))?;

    let mut copied: Vec<String> = vec![];
    walk::visit_files(staged_root, &mut |full: &Path, relative: &Path| {
        if cancelled.map(|flag| flag.load(Ordering::Relaxed)) == Some(true) {
            return Err(MaterializeError::Cancelled);
        }

        let relative_path = walk::relative_slash(relative);
        if !selection.includes(&relative_path) {
            trace!("Skipping {relative_path}.");
            return Ok(true);
        }

        let target_path = target_root.join(relative);
        if let Some(parent) = target_path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                MaterializeError::CreateDir(parent.display().to_string(), err.to_string())
            })?;
        }
        fs::copy(full, &target_path)
            .map_err(|err| MaterializeError::Copy(relative_path.clone(), err.to_string()))?;

        copied.push(relative_path);
        Ok(true)
    })?;

    Ok(copied)
}
