//! Current-version resolution and stale-file pruning.
//!
//! A category directory can hold files from several publications. The
//! current publication is the lexicographic maximum of the version tokens;
//! everything whose name does not contain it is stale. Files carrying the
//! raw marker are dated by their last segment, and only the latest of them
//! survives. Tokens are compared as strings, so upstream names must be
//! lexicographically monotonic (zero-padded sequences).
//!
//! Pruning is two-phase: [`plan_prune`] is pure over a directory snapshot,
//! [`execute`] then deletes what the plan marked stale.

use snafu::prelude::*;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::emit;
use crate::error::{
    DeletePathSnafu, ListDirectorySnafu, MissingVersionTokenSnafu, NoVersionsSnafu, VersionError,
};
use crate::metrics::events::StalePathsRemoved;
use crate::naming::{FileName, RecordCategory};

/// A directory entry paired with its parsed name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub path: PathBuf,
    pub name: FileName,
}

impl Entry {
    pub fn new(path: PathBuf) -> Option<Self> {
        FileName::from_path(&path).map(|name| Self { path, name })
    }
}

/// Outcome of planning a prune over one directory snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrunePlan {
    pub current: String,
    pub retain: Vec<PathBuf>,
    pub stale: Vec<PathBuf>,
}

/// Resolve the current version among `names`.
///
/// Names carrying `raw_marker` as a segment follow a different convention
/// and are left out of the candidate set.
pub fn current_version<'a>(
    names: impl IntoIterator<Item = &'a FileName>,
    raw_marker: &str,
    dir: &Path,
) -> Result<String, VersionError> {
    let mut current: Option<&str> = None;
    for name in names {
        if name.has_segment(raw_marker) {
            continue;
        }
        let version = name.version().context(MissingVersionTokenSnafu {
            name: name.as_str(),
        })?;
        if current.is_none_or(|c| version > c) {
            current = Some(version);
        }
    }

    current
        .map(str::to_string)
        .context(NoVersionsSnafu { dir })
}

/// Split a snapshot into entries to keep and entries to delete.
///
/// Versioned entries are kept when their name contains `current`. Entries
/// carrying `raw_marker` are dated by their last segment instead, and only
/// the latest release among them is kept.
pub fn plan_prune(entries: &[Entry], current: &str, raw_marker: &str) -> PrunePlan {
    let marker_release = latest_marker_release(entries, raw_marker);
    let (retain, stale): (Vec<&Entry>, Vec<&Entry>) = entries.iter().partition(|e| {
        if e.name.has_segment(raw_marker) {
            Some(e.name.suffix()) == marker_release
        } else {
            e.name.contains(current)
        }
    });

    PrunePlan {
        current: current.to_string(),
        retain: retain.into_iter().map(|e| e.path.clone()).collect(),
        stale: stale.into_iter().map(|e| e.path.clone()).collect(),
    }
}

fn latest_marker_release<'a>(entries: &'a [Entry], raw_marker: &str) -> Option<&'a str> {
    entries
        .iter()
        .filter(|e| e.name.has_segment(raw_marker))
        .map(|e| e.name.suffix())
        .max()
}

/// Delete every stale path in the plan, files or directories alike.
///
/// Paths that are already gone are skipped. Returns the number removed.
pub fn execute(plan: &PrunePlan) -> Result<usize, VersionError> {
    let mut removed = 0;
    for path in &plan.stale {
        match remove_path(path) {
            Ok(()) => {
                debug!("Removed stale path {}", path.display());
                removed += 1;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("Stale path {} already absent", path.display());
            }
            Err(source) => {
                return Err(source).context(DeletePathSnafu { path: path.clone() });
            }
        }
    }
    Ok(removed)
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    let metadata = std::fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

/// Snapshot the visible entries of a directory, sorted by name.
///
/// Hidden (`.`) and bookkeeping (`_`) entries are ignored.
pub fn list_entries(dir: &Path) -> Result<Vec<Entry>, VersionError> {
    let read_dir = std::fs::read_dir(dir).context(ListDirectorySnafu { dir })?;

    let mut entries = Vec::new();
    for item in read_dir {
        let item = item.context(ListDirectorySnafu { dir })?;
        let Some(entry) = Entry::new(item.path()) else {
            continue;
        };
        if entry.name.as_str().starts_with(['.', '_']) {
            continue;
        }
        entries.push(entry);
    }
    entries.sort_by(|a, b| a.name.as_str().cmp(b.name.as_str()));
    Ok(entries)
}

/// Resolve and prune one category directory. Returns the plan executed.
pub fn prune_directory(
    dir: &Path,
    category: RecordCategory,
    raw_marker: &str,
) -> Result<PrunePlan, VersionError> {
    let entries = list_entries(dir)?;
    let current = current_version(entries.iter().map(|e| &e.name), raw_marker, dir)?;
    let plan = plan_prune(&entries, &current, raw_marker);
    let removed = execute(&plan)?;

    info!(
        category = %category,
        current = %plan.current,
        retained = plan.retain.len(),
        removed,
        "Pruned {}",
        dir.display()
    );
    emit!(StalePathsRemoved {
        category,
        count: removed as u64,
    });

    Ok(plan)
}
