//! Whitelist-driven pruning of directory trees.
//!
//! # Design
//! - Collect the tree first, then delete files and finally directories deepest-first,
//!   so every directory is considered only after its children are gone.
//! - Whitelisted directories are pruned internally; a directory whose own name or any
//!   ancestor's name below the root is not whitelisted goes, contents included.
//! - Missing paths are treated as already pruned, keeping re-runs idempotent.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

use crate::error::{UpdateError, UpdateResult};
use crate::model::{DirectoryWhitelist, PruneSummary};

/// Prune the tree at `path` under `whitelist`.
///
/// Every file (and symlink) beneath `path` is deleted. A directory is removed unless
/// its basename is whitelisted, and removing it takes its whole subtree, whitelisted
/// descendants included. With an empty whitelist `path` itself is removed as well;
/// otherwise `path` is kept as the anchor of the surviving structure.
///
/// # Errors
///
/// Returns [`UpdateError::Walk`] when the tree cannot be traversed and
/// [`UpdateError::Filesystem`] when an entry cannot be deleted. Entries deleted before
/// the failure stay deleted.
pub fn prune(path: &Path, whitelist: &DirectoryWhitelist) -> UpdateResult<PruneSummary> {
    prune_tree(path, whitelist, None)
}

/// Prune like [`prune`] while leaving the subtree at `excluded` untouched.
///
/// The excluded subtree is neither entered nor removed, and its ancestors below
/// `path` survive while they still hold it.
///
/// # Errors
///
/// Same as [`prune`].
pub fn prune_excluding(
    path: &Path,
    whitelist: &DirectoryWhitelist,
    excluded: &Path,
) -> UpdateResult<PruneSummary> {
    prune_tree(path, whitelist, Some(excluded))
}

fn prune_tree(
    path: &Path,
    whitelist: &DirectoryWhitelist,
    excluded: Option<&Path>,
) -> UpdateResult<PruneSummary> {
    let mut summary = PruneSummary::default();

    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "prune target absent");
            return Ok(summary);
        }
        Err(err) => return Err(UpdateError::io("prune.stat", path, err)),
    };
    if !metadata.is_dir() {
        remove_file(path, &mut summary)?;
        return Ok(summary);
    }

    let mut files = Vec::new();
    let mut directories = Vec::new();
    let walker = WalkDir::new(path)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| excluded != Some(entry.path()));
    for entry in walker {
        let entry = entry.map_err(|source| UpdateError::walkdir("prune.walk", path, source))?;
        if entry.file_type().is_dir() {
            directories.push(entry);
        } else {
            files.push(entry);
        }
    }

    for entry in &files {
        remove_file(entry.path(), &mut summary)?;
    }

    directories.sort_by_key(DirEntry::depth);
    directories.reverse();

    for entry in &directories {
        if retained(path, entry.path(), whitelist) {
            summary.directories_kept += 1;
            continue;
        }
        remove_directory(entry.path(), excluded, &mut summary)?;
    }

    if whitelist.is_empty() {
        remove_directory(path, excluded, &mut summary)?;
    } else {
        summary.directories_kept += 1;
    }

    info!(
        path = %path.display(),
        files_removed = summary.files_removed,
        directories_removed = summary.directories_removed,
        directories_kept = summary.directories_kept,
        whitelist = ?whitelist.names().collect::<Vec<_>>(),
        "tree pruned"
    );
    Ok(summary)
}

fn remove_file(path: &Path, summary: &mut PruneSummary) -> UpdateResult<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            summary.files_removed += 1;
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(UpdateError::io("prune.remove_file", path, err)),
    }
}

/// A directory survives only when it and every directory between it and `root`
/// carry whitelisted names.
fn retained(root: &Path, path: &Path, whitelist: &DirectoryWhitelist) -> bool {
    if whitelist.is_empty() {
        return false;
    }
    path.strip_prefix(root).is_ok_and(|relative| {
        relative
            .ancestors()
            .filter(|ancestor| !ancestor.as_os_str().is_empty())
            .all(|ancestor| whitelist.preserves(ancestor))
    })
}

fn remove_directory(
    path: &Path,
    excluded: Option<&Path>,
    summary: &mut PruneSummary,
) -> UpdateResult<()> {
    if excluded.is_some_and(|excluded| excluded.starts_with(path)) && !is_empty_dir(path)? {
        debug!(path = %path.display(), "directory holds the excluded subtree; keeping");
        summary.directories_kept += 1;
        return Ok(());
    }
    match fs::remove_dir(path) {
        Ok(()) => {
            summary.directories_removed += 1;
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(UpdateError::io("prune.remove_dir", path, err)),
    }
}

fn is_empty_dir(path: &Path) -> UpdateResult<bool> {
    let mut entries =
        fs::read_dir(path).map_err(|err| UpdateError::io("prune.read_dir", path, err))?;
    Ok(entries.next().is_none())
}
