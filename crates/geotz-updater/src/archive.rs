//! Zip extraction, payload normalisation, and repackaging.
//!
//! # Design
//! - Extraction starts from an emptied target directory, so leftovers of an interrupted
//!   run (including an earlier canonical payload) never shadow the fresh one.
//! - Entry names are sanitised; absolute or parent-relative entries are rejected.
//! - Repackaging writes a sibling `.partial` file and renames it into place once the
//!   archive is finished, so a failed run never leaves a truncated distributable.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use crate::error::{UpdateError, UpdateResult};
use crate::model::DirectoryWhitelist;
use crate::reconcile::prune;

const PARTIAL_SUFFIX: &str = ".partial";

/// Extract the zip at `archive` into `<parent>/<stem>/` and delete the archive.
///
/// Anything already under `<parent>/<stem>/` is removed first. Returns the extraction directory.
///
/// # Errors
///
/// Returns [`UpdateError::Archive`] when the archive cannot be decoded,
/// [`UpdateError::InvalidInput`] for unsafe entry names, and
/// [`UpdateError::Filesystem`] when files cannot be written or the archive removed.
pub fn extract_archive(archive: &Path) -> UpdateResult<PathBuf> {
    let extension = archive
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase);
    if extension.as_deref() != Some("zip") {
        return Err(UpdateError::InvalidInput {
            field: "archive_extension",
            reason: "unsupported",
            value: Some(archive.display().to_string()),
        });
    }
    let stem = archive.file_stem().ok_or_else(|| UpdateError::InvalidInput {
        field: "archive_path",
        reason: "missing_stem",
        value: Some(archive.display().to_string()),
    })?;
    let target = archive.with_file_name(stem);

    let cleared = prune(&target, &DirectoryWhitelist::empty())?;
    if cleared.files_removed > 0 {
        debug!(
            target = %target.display(),
            files_removed = cleared.files_removed,
            "cleared previous extraction"
        );
    }
    fs::create_dir_all(&target)
        .map_err(|source| UpdateError::io("extract.create_directory", &target, source))?;
    let entries = extract_zip(archive, &target)?;
    fs::remove_file(archive)
        .map_err(|source| UpdateError::io("extract.remove_archive", archive, source))?;

    info!(
        archive = %archive.display(),
        target = %target.display(),
        entries,
        "archive extracted"
    );
    Ok(target)
}

fn extract_zip(source: &Path, target: &Path) -> UpdateResult<usize> {
    let file = File::open(source)
        .map_err(|source_err| UpdateError::io("extract.open", source, source_err))?;
    let mut archive = ZipArchive::new(file)
        .map_err(|source_err| UpdateError::zip("extract.decode", source, source_err))?;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|source_err| UpdateError::zip("extract.read_entry", source, source_err))?;
        let entry_path = sanitize_archive_path(entry.name())?;
        let destination = target.join(&entry_path);

        if entry.name().ends_with('/') {
            fs::create_dir_all(&destination).map_err(|source_err| {
                UpdateError::io("extract.create_dir", &destination, source_err)
            })?;
            continue;
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|source_err| {
                UpdateError::io("extract.create_parent", parent, source_err)
            })?;
        }

        let mut output = File::create(&destination).map_err(|source_err| {
            UpdateError::io("extract.create_file", &destination, source_err)
        })?;
        io::copy(&mut entry, &mut output)
            .map_err(|source_err| UpdateError::io("extract.copy", &destination, source_err))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            let perms = fs::Permissions::from_mode(mode);
            fs::set_permissions(&destination, perms).map_err(|source_err| {
                UpdateError::io("extract.set_permissions", &destination, source_err)
            })?;
        }
    }

    Ok(archive.len())
}

fn sanitize_archive_path(entry: &str) -> UpdateResult<PathBuf> {
    let path = Path::new(entry);
    if path.is_absolute() {
        return Err(UpdateError::InvalidInput {
            field: "archive_entry",
            reason: "absolute_path",
            value: Some(entry.to_string()),
        });
    }

    let mut sanitized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(segment) => sanitized.push(segment),
            Component::CurDir => {}
            _ => {
                return Err(UpdateError::InvalidInput {
                    field: "archive_entry",
                    reason: "invalid_segment",
                    value: Some(entry.to_string()),
                });
            }
        }
    }

    Ok(sanitized)
}

/// First regular file with a `.json` extension under `root`, depth-first with
/// entries visited in file-name order.
///
/// # Errors
///
/// Returns [`UpdateError::Normalize`] when `root` is missing or holds no json file,
/// and [`UpdateError::Walk`] when the traversal fails.
pub fn locate_json(root: &Path) -> UpdateResult<PathBuf> {
    if !root.is_dir() {
        return Err(UpdateError::Normalize {
            path: root.to_path_buf(),
        });
    }
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry =
            entry.map_err(|source| UpdateError::walkdir("normalize.walk", root, source))?;
        let is_json = entry
            .path()
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if entry.file_type().is_file() && is_json {
            return Ok(entry.into_path());
        }
    }
    Err(UpdateError::Normalize {
        path: root.to_path_buf(),
    })
}

/// Rename the json payload found under `root` to `file_name` in its own directory.
///
/// Returns the canonical path.
///
/// # Errors
///
/// Propagates [`locate_json`] failures and returns [`UpdateError::Filesystem`]
/// when the rename fails.
pub fn normalize_json(root: &Path, file_name: &str) -> UpdateResult<PathBuf> {
    let found = locate_json(root)?;
    let canonical = found.with_file_name(file_name);
    if found != canonical {
        fs::rename(&found, &canonical)
            .map_err(|source| UpdateError::io("normalize.rename", &found, source))?;
    }
    debug!(
        found = %found.display(),
        canonical = %canonical.display(),
        "json payload normalised"
    );
    Ok(canonical)
}

/// Pack `source` into a zip at `output`, rooted at the source directory's basename.
///
/// Every directory, including empty ones, gets an explicit entry. Returns the
/// number of entries written.
///
/// # Errors
///
/// Returns [`UpdateError::InvalidInput`] when `source` has no basename,
/// [`UpdateError::Filesystem`] when files cannot be read or the output written,
/// and [`UpdateError::Archive`] when the zip writer fails.
pub fn pack_directory(source: &Path, output: &Path) -> UpdateResult<usize> {
    if source.file_name().is_none() {
        return Err(UpdateError::InvalidInput {
            field: "source_directory",
            reason: "no_basename",
            value: Some(source.display().to_string()),
        });
    }
    let base = source.parent().unwrap_or_else(|| Path::new(""));
    let partial = partial_path(output);

    match write_archive(source, base, &partial) {
        Ok(entries) => {
            fs::rename(&partial, output)
                .map_err(|err| UpdateError::io("pack.publish", output, err))?;
            info!(output = %output.display(), entries, "archive written");
            Ok(entries)
        }
        Err(err) => {
            if partial.exists()
                && let Err(remove_err) = fs::remove_file(&partial)
            {
                warn!(
                    error = %remove_err,
                    path = %partial.display(),
                    "failed to remove partial archive"
                );
            }
            Err(err)
        }
    }
}

fn write_archive(source: &Path, base: &Path, target: &Path) -> UpdateResult<usize> {
    let file =
        File::create(target).map_err(|err| UpdateError::io("pack.create", target, err))?;
    let mut writer = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut entries = 0usize;

    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry.map_err(|err| UpdateError::walkdir("pack.walk", source, err))?;
        let relative = entry
            .path()
            .strip_prefix(base)
            .map_err(|_| UpdateError::InvalidInput {
                field: "source_directory",
                reason: "strip_prefix",
                value: Some(entry.path().display().to_string()),
            })?;
        let name = archive_entry_name(relative)?;

        if entry.file_type().is_dir() {
            writer
                .add_directory(format!("{name}/"), options)
                .map_err(|err| UpdateError::zip("pack.add_directory", entry.path(), err))?;
        } else if entry.file_type().is_file() {
            writer
                .start_file(name, options)
                .map_err(|err| UpdateError::zip("pack.start_file", entry.path(), err))?;
            let mut input = File::open(entry.path())
                .map_err(|err| UpdateError::io("pack.open_file", entry.path(), err))?;
            io::copy(&mut input, &mut writer)
                .map_err(|err| UpdateError::io("pack.copy", entry.path(), err))?;
        } else {
            debug!(path = %entry.path().display(), "skipping non-regular entry");
            continue;
        }
        entries += 1;
    }

    writer
        .finish()
        .map_err(|err| UpdateError::zip("pack.finish", target, err))?;
    Ok(entries)
}

fn archive_entry_name(relative: &Path) -> UpdateResult<String> {
    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(segment) => {
                let segment = segment.to_str().ok_or_else(|| UpdateError::InvalidInput {
                    field: "archive_entry",
                    reason: "non_utf8",
                    value: Some(relative.display().to_string()),
                })?;
                segments.push(segment);
            }
            Component::CurDir => {}
            _ => {
                return Err(UpdateError::InvalidInput {
                    field: "archive_entry",
                    reason: "invalid_segment",
                    value: Some(relative.display().to_string()),
                });
            }
        }
    }
    Ok(segments.join("/"))
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map_or_else(OsString::new, ToOwned::to_owned);
    name.push(PARTIAL_SUFFIX);
    output.with_file_name(name)
}
