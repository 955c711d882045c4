use crate::walk;
use log::trace;
use std::{collections::HashMap, io, path::Path, time::SystemTime};

/// The last observed modification times, per source identity, per relative
/// file path.
///
/// The cache lives for the lifetime of the process and starts out empty, so
/// the first check after a start always reports changes. Entries are written
/// only after a detected-and-applied sync, by [BaselineCache::record].
///
/// This is a timestamp heuristic, not content hashing: a touched file with
/// identical contents counts as changed, and an edited file with a restored
/// timestamp does not.
#[derive(Debug, Default)]
pub struct BaselineCache {
    entries: HashMap<String, HashMap<String, SystemTime>>,
}

impl BaselineCache {
    pub fn new() -> Self {
        BaselineCache::default()
    }

    /// Whether any file under the staged root is new or strictly newer than
    /// the baseline for this identity. Stops at the first such file. A
    /// missing staged root or a never-seen identity reports changes, so an
    /// unknown state always syncs.
    pub fn has_changes(&self, identity: &str, staged_root: &Path) -> Result<bool, io::Error> {
        if !staged_root.is_dir() {
            return Ok(true);
        }
        let Some(baseline) = self.entries.get(identity) else {
            return Ok(true);
        };

        let mut changed = false;
        walk::visit_files::<io::Error, _>(staged_root, &mut |full: &Path, relative: &Path| {
            let modified = full.metadata()?.modified()?;
            match baseline.get(&walk::relative_slash(relative)) {
                Some(last) if modified <= *last => Ok(true),
                _ => {
                    trace!("Found a changed file: {}.", relative.display());
                    changed = true;
                    Ok(false)
                }
            }
        })?;

        Ok(changed)
    }

    /// Overwrite the baseline for this identity with a full snapshot of the
    /// staged root. Files that disappeared from the source simply drop out
    /// of the baseline.
    pub fn record(&mut self, identity: &str, staged_root: &Path) -> Result<(), io::Error> {
        let mut snapshot: HashMap<String, SystemTime> = HashMap::new();
        walk::visit_files::<io::Error, _>(staged_root, &mut |full: &Path, relative: &Path| {
            snapshot.insert(walk::relative_slash(relative), full.metadata()?.modified()?);
            Ok(true)
        })?;
        self.entries.insert(identity.to_string(), snapshot);

        Ok(())
    }
}
