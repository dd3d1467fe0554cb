//! Filesystem, archive, and release-feed fixtures.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tempfile::TempDir;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Create a scratch directory removed when the handle drops.
///
/// # Errors
///
/// Returns an error if the temporary directory cannot be created.
pub fn scratch_dir(prefix: &str) -> Result<TempDir> {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .context("failed to create scratch directory")
}

/// Write a zip archive at `path` from `(name, contents)` pairs.
///
/// Names ending in `/` become directory entries and their contents are ignored.
///
/// # Errors
///
/// Returns an error if the archive cannot be created or written.
pub fn write_zip_archive(path: &Path, entries: &[(&str, &[u8])]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, contents) in entries {
        if name.ends_with('/') {
            writer.add_directory(*name, options)?;
        } else {
            writer.start_file(*name, options)?;
            writer.write_all(contents)?;
        }
    }
    writer.finish()?;
    Ok(())
}

/// Sorted relative paths beneath `root`, directories suffixed with `/`.
///
/// The root itself is not listed.
///
/// # Errors
///
/// Returns an error if the tree cannot be walked.
pub fn tree_snapshot(root: &Path) -> Result<Vec<String>> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        let relative = entry.path().strip_prefix(root)?;
        let mut name = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        if entry.file_type().is_dir() {
            name.push('/');
        }
        entries.push(name);
    }
    entries.sort();
    Ok(entries)
}

/// Release document body listing `(name, browser_download_url, created_at)` assets.
#[must_use]
pub fn release_document(assets: &[(&str, &str, &str)]) -> String {
    let assets: Vec<Value> = assets
        .iter()
        .map(|(name, url, created_at)| {
            json!({
                "name": name,
                "browser_download_url": url,
                "created_at": created_at,
                "content_type": "application/zip",
            })
        })
        .collect();
    json!({
        "tag_name": "2024a",
        "published_at": "2024-01-01T00:00:00Z",
        "assets": assets,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use zip::ZipArchive;

    #[test]
    fn zip_fixture_and_snapshot_agree() -> Result<()> {
        let temp = scratch_dir("geotz-fixture-")?;
        let archive = temp.path().join("nested/fixture.zip");
        write_zip_archive(
            &archive,
            &[("dist/", b"".as_slice()), ("dist/a.json", b"{}".as_slice())],
        )?;

        let mut reader = ZipArchive::new(File::open(&archive)?)?;
        assert_eq!(reader.len(), 2);
        assert!(reader.by_name("dist/a.json").is_ok());

        fs::create_dir_all(temp.path().join("tree/x/y"))?;
        fs::write(temp.path().join("tree/x/file.txt"), b"")?;
        assert_eq!(
            tree_snapshot(&temp.path().join("tree"))?,
            vec!["x/", "x/file.txt", "x/y/"]
        );
        Ok(())
    }

    #[test]
    fn release_document_lists_assets_in_order() -> Result<()> {
        let body = release_document(&[
            ("first.zip", "https://dl.invalid/1", "2024-01-01T00:00:00Z"),
            ("second.zip", "https://dl.invalid/2", "2024-02-01T00:00:00Z"),
        ]);
        let value: Value = serde_json::from_str(&body)?;
        let names: Vec<&str> = value["assets"]
            .as_array()
            .map(|assets| assets.iter().filter_map(|a| a["name"].as_str()).collect())
            .unwrap_or_default();
        assert_eq!(names, vec!["first.zip", "second.zip"]);
        Ok(())
    }
}
