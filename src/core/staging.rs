//! Promotion of the staging ("skel") tree into the mirror.
//!
//! Every file is moved with a rename onto its final path, so a reader of the
//! mirror sees either the previous file or the complete new one. When the two
//! trees live on different filesystems the file is first copied next to its
//! destination and then renamed into place.

use crate::{MirrorError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PromoteStats {
    pub files: usize,
    pub bytes: u64,
}

fn staging_name(dst: &Path) -> PathBuf {
    let name = dst
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dst.with_file_name(format!(".{}.aptsync-tmp", name))
}

fn move_file(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(|e| MirrorError::filesystem(parent, e))?;
    }

    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    // cross-device: copy beside the destination, then rename over it
    let tmp = staging_name(dst);
    fs::copy(src, &tmp).map_err(|e| MirrorError::filesystem(&tmp, e))?;
    if let Err(e) = fs::rename(&tmp, dst) {
        let _ = fs::remove_file(&tmp);
        return Err(MirrorError::filesystem(dst, e));
    }
    fs::remove_file(src).map_err(|e| MirrorError::filesystem(src, e))?;
    Ok(())
}

/// Moves everything under `skel_root` to the same relative path under `mirror_root`,
/// then removes the emptied staging directories. `skel_root` itself is kept.
pub fn promote(skel_root: &Path, mirror_root: &Path) -> Result<PromoteStats> {
    let mut stats = PromoteStats::default();
    if !skel_root.is_dir() {
        info!("Nothing staged under {}", skel_root.display());
        return Ok(stats);
    }

    info!("Moving {} into {}", skel_root.display(), mirror_root.display());
    for entry in WalkDir::new(skel_root).min_depth(1).contents_first(true) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(skel_root).to_path_buf();
            MirrorError::filesystem(path, e.into())
        })?;
        let path = entry.path();

        if entry.file_type().is_dir() {
            if let Err(e) = fs::remove_dir(path) {
                warn!("Cannot remove staging directory {}: {}", path.display(), e);
            }
            continue;
        }

        let Ok(rel) = path.strip_prefix(skel_root) else {
            continue;
        };
        let dst = mirror_root.join(rel);
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        debug!("Promote {} -> {}", path.display(), dst.display());
        move_file(path, &dst)?;
        stats.files += 1;
        stats.bytes += size;
    }

    Ok(stats)
}
