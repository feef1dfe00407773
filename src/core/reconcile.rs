//! Mark-and-sweep cleanup of the mirror tree.
//!
//! The live set holds the `host/path` keys of every package file referenced by
//! the metadata resolved in this run. It must be complete before a sweep
//! starts. Metadata fetched in the background is not part of it; it is staged
//! and comes back into the mirror on promotion.

use crate::core::config::MirrorPaths;
use crate::{MirrorError, Result};
use rustc_hash::FxHashSet;
use std::path::{Component, Path};
use tracing::{info, warn};
use url::Url;
use walkdir::WalkDir;

/// GC roots: mirror-relative paths of every file the current metadata references.
#[derive(Debug, Default, Clone)]
pub struct LiveSet {
    keys: FxHashSet<String>,
}

impl LiveSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, url: &Url) -> bool {
        self.keys.insert(MirrorPaths::relative(url))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub files_removed: usize,
    pub dirs_removed: usize,
    pub bytes_freed: u64,
}

impl ReconcileStats {
    pub fn merge(&mut self, other: ReconcileStats) {
        self.files_removed += other.files_removed;
        self.dirs_removed += other.dirs_removed;
        self.bytes_freed += other.bytes_freed;
    }
}

/// `/`-joined key of `path` below `root`, matching [`MirrorPaths::relative`].
fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    Some(parts.join("/"))
}

fn is_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}

/// Sweeps the mirror directory of `target` (a clean URL).
///
/// Files whose key is not live are removed; directories are visited after their
/// contents and removed once empty. The target directory itself is kept. With
/// `dry_run` nothing is removed and only the would-be deletions are logged.
pub fn reconcile(paths: &MirrorPaths, target: &Url, live: &LiveSet, dry_run: bool) -> Result<ReconcileStats> {
    let root = paths.mirror_root();
    let dir = paths.mirror_path(target);
    let mut stats = ReconcileStats::default();

    if dir == root || !dir.starts_with(root) {
        return Err(MirrorError::Config(format!(
            "refusing to clean {}: not inside {}",
            dir.display(),
            root.display()
        )));
    }

    info!("Cleaning {}", dir.display());
    if !dir.is_dir() {
        return Ok(stats);
    }

    for entry in WalkDir::new(&dir).min_depth(1).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", dir.display(), e);
                continue;
            }
        };
        let path = entry.path();

        if entry.file_type().is_dir() {
            if !is_empty_dir(path) {
                continue;
            }
            info!("Remove empty directory {}", path.display());
            if !dry_run {
                std::fs::remove_dir(path).map_err(|e| MirrorError::filesystem(path, e))?;
            }
            stats.dirs_removed += 1;
            continue;
        }

        let Some(key) = relative_key(root, path) else {
            continue;
        };
        if live.contains_key(&key) {
            continue;
        }

        info!("Remove out-dated file {}", path.display());
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        if !dry_run {
            std::fs::remove_file(path).map_err(|e| MirrorError::filesystem(path, e))?;
        }
        stats.files_removed += 1;
        stats.bytes_freed += size;
    }

    Ok(stats)
}
