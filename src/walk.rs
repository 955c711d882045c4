use std::{fs, io, path::Path};

/// Walk every regular file under `root` recursively, calling the visitor
/// with the full path and the path relative to `root`. Entries are visited
/// in file name order, so the traversal is deterministic. The visitor
/// returns whether the walk should continue; returning `Ok(false)` stops
/// the walk early.
///
/// Returns whether the walk ran to completion.
pub fn visit_files<E, F>(root: &Path, visit: &mut F) -> Result<bool, E>
where
    E: From<io::Error>,
    F: FnMut(&Path, &Path) -> Result<bool, E>,
{
    walk_dir(root, root, visit)
}

fn walk_dir<E, F>(dir: &Path, root: &Path, visit: &mut F) -> Result<bool, E>
where
    E: From<io::Error>,
    F: FnMut(&Path, &Path) -> Result<bool, E>,
{
    let mut entries = fs::read_dir(dir)
        .and_then(|entries| entries.collect::<Result<Vec<_>, _>>())
        .map_err(E::from)?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        // Follow symlinks, like the rest of the filesystem handling.
        let metadata = path.metadata().map_err(E::from)?;
        if metadata.is_dir() {
            if !walk_dir(&path, root, visit)? {
                return Ok(false);
            }
        } else if metadata.is_file() {
            let relative = path.strip_prefix(root).unwrap_or(&path);
            if !visit(&path, relative)? {
                return Ok(false);
            }
        }
    }

    Ok(true)
}

/// Render a relative path with forward slashes, independent of the platform.
/// Baseline keys, pattern matching and history entries all use this form.
pub fn relative_slash(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
