//! Pipeline configuration supplied by the caller.
//!
//! # Design
//! - All names and paths the pipeline touches live here rather than in constants,
//!   so tests can run against isolated scratch trees and alternate layouts.
//! - Validation reports the first offending field with a static reason.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::{UpdateError, UpdateResult};
use crate::model::DirectoryWhitelist;

/// Release metadata endpoint for the upstream boundary dataset.
pub const DEFAULT_METADATA_ENDPOINT: &str =
    "https://api.github.com/repos/evansiroky/timezone-boundary-builder/releases/latest";
/// Asset name fragment selected by default.
pub const DEFAULT_ASSET_PATTERN: &str = "geojson";
/// Working directory created beneath the root for transient downloads.
pub const DEFAULT_DOWNLOAD_SUBDIRECTORY: &str = "downloads";
/// Index-level directory names produced by the quadrant indexer.
pub const DEFAULT_LEVEL_DIRECTORIES: [&str; 4] = ["a", "b", "c", "d"];
/// Working directory names kept when the download directory is pruned.
pub const DEFAULT_DOWNLOAD_KEEP: [&str; 3] = ["downloads", "timezones", "dist"];
/// File stem shared by the downloaded archive and the canonical json payload.
pub const DEFAULT_FILE_STEM: &str = "timezones";

const LEGACY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Names of the directories and files the pipeline manages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    /// Index-level directories preserved when stale derived output is pruned.
    pub level_directories: Vec<String>,
    /// Working directories preserved when download artifacts are pruned.
    pub download_keep: Vec<String>,
    /// Stem of the downloaded archive (`<stem>.zip`, extracted into `<stem>/`).
    pub archive_stem: String,
    /// Stem of the canonical json payload (`<stem>.json`).
    pub canonical_stem: String,
}

impl Default for DataLayout {
    fn default() -> Self {
        Self {
            level_directories: DEFAULT_LEVEL_DIRECTORIES.map(String::from).to_vec(),
            download_keep: DEFAULT_DOWNLOAD_KEEP.map(String::from).to_vec(),
            archive_stem: DEFAULT_FILE_STEM.to_string(),
            canonical_stem: DEFAULT_FILE_STEM.to_string(),
        }
    }
}

impl DataLayout {
    /// Whitelist applied to the root directory before rebuilding.
    #[must_use]
    pub fn level_whitelist(&self) -> DirectoryWhitelist {
        self.level_directories.iter().cloned().collect()
    }

    /// Whitelist applied to the download directory after rebuilding.
    #[must_use]
    pub fn download_whitelist(&self) -> DirectoryWhitelist {
        self.download_keep.iter().cloned().collect()
    }

    /// File name of the downloaded archive.
    #[must_use]
    pub fn archive_file_name(&self) -> String {
        format!("{}.zip", self.archive_stem)
    }

    /// File name of the canonical json payload.
    #[must_use]
    pub fn canonical_file_name(&self) -> String {
        format!("{}.json", self.canonical_stem)
    }
}

/// Caller-owned inputs for a single pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Directory holding the derived dataset.
    pub root_directory: PathBuf,
    /// Relative path of the download working directory beneath the root.
    pub download_subdirectory: PathBuf,
    /// Asset name fragment used to select the release asset.
    pub asset_name_pattern: String,
    /// Publication time of the release the local copy was built from.
    pub previous_update: Option<DateTime<Utc>>,
    /// Release metadata endpoint.
    pub metadata_endpoint: String,
    /// Managed directory and file names.
    pub layout: DataLayout,
}

impl PipelineConfig {
    /// Configuration with upstream defaults rooted at `root_directory`.
    #[must_use]
    pub fn new(root_directory: impl Into<PathBuf>) -> Self {
        Self {
            root_directory: root_directory.into(),
            download_subdirectory: PathBuf::from(DEFAULT_DOWNLOAD_SUBDIRECTORY),
            asset_name_pattern: DEFAULT_ASSET_PATTERN.to_string(),
            previous_update: None,
            metadata_endpoint: DEFAULT_METADATA_ENDPOINT.to_string(),
            layout: DataLayout::default(),
        }
    }

    /// Set the timestamp of the release the local copy already reflects.
    #[must_use]
    pub fn with_previous_update(mut self, previous: Option<DateTime<Utc>>) -> Self {
        self.previous_update = previous;
        self
    }

    /// Override the metadata endpoint.
    #[must_use]
    pub fn with_metadata_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.metadata_endpoint = endpoint.into();
        self
    }

    /// Override the asset name pattern.
    #[must_use]
    pub fn with_asset_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.asset_name_pattern = pattern.into();
        self
    }

    /// Override the managed layout.
    #[must_use]
    pub fn with_layout(mut self, layout: DataLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Download working directory.
    #[must_use]
    pub fn download_directory(&self) -> PathBuf {
        self.root_directory.join(&self.download_subdirectory)
    }

    /// Fixed location the release archive is fetched to.
    #[must_use]
    pub fn archive_path(&self) -> PathBuf {
        self.download_directory()
            .join(self.layout.archive_file_name())
    }

    /// Directory the release archive is extracted into.
    #[must_use]
    pub fn extraction_directory(&self) -> PathBuf {
        self.download_directory().join(&self.layout.archive_stem)
    }

    /// Canonical payload path used when no archive was extracted this run.
    #[must_use]
    pub fn fallback_source_json(&self) -> PathBuf {
        self.extraction_directory()
            .join(self.layout.canonical_file_name())
    }

    /// Distributable archive written next to the root directory.
    #[must_use]
    pub fn distributable_path(&self) -> PathBuf {
        let mut name = self
            .root_directory
            .file_name()
            .map_or_else(OsString::new, ToOwned::to_owned);
        name.push(".zip");
        self.root_directory.with_file_name(name)
    }

    /// Reject configurations the pipeline cannot run safely.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::InvalidConfig`] naming the first invalid field.
    pub fn validate(&self) -> UpdateResult<()> {
        if self.root_directory.as_os_str().is_empty() {
            return Err(UpdateError::invalid_config("root_directory", "empty", None));
        }
        if self.root_directory.file_name().is_none() {
            return Err(UpdateError::invalid_config(
                "root_directory",
                "no_basename",
                Some(self.root_directory.display().to_string()),
            ));
        }
        validate_relative("download_subdirectory", &self.download_subdirectory)?;
        if self.asset_name_pattern.trim().is_empty() {
            return Err(UpdateError::invalid_config(
                "asset_name_pattern",
                "empty",
                None,
            ));
        }
        if self.metadata_endpoint.trim().is_empty() {
            return Err(UpdateError::invalid_config(
                "metadata_endpoint",
                "empty",
                None,
            ));
        }
        if self.layout.level_directories.is_empty() {
            return Err(UpdateError::invalid_config(
                "level_directories",
                "empty",
                None,
            ));
        }
        for name in &self.layout.level_directories {
            validate_basename("level_directories", name)?;
        }
        for name in &self.layout.download_keep {
            validate_basename("download_keep", name)?;
        }
        validate_basename("archive_stem", &self.layout.archive_stem)?;
        validate_basename("canonical_stem", &self.layout.canonical_stem)?;
        Ok(())
    }
}

/// Parse a release timestamp given as RFC 3339 or `YYYY-MM-DD HH:MM:SS` (UTC).
///
/// # Errors
///
/// Returns [`UpdateError::InvalidConfig`] when neither format matches.
pub fn parse_timestamp(value: &str) -> UpdateResult<DateTime<Utc>> {
    let trimmed = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(trimmed, LEGACY_TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| {
            UpdateError::invalid_config(
                "previous_update",
                "invalid_timestamp",
                Some(value.to_string()),
            )
        })
}

fn validate_basename(field: &'static str, name: &str) -> UpdateResult<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        (None, _) => Err(UpdateError::invalid_config(field, "empty", None)),
        _ => Err(UpdateError::invalid_config(
            field,
            "not_a_basename",
            Some(name.to_string()),
        )),
    }
}

fn validate_relative(field: &'static str, path: &Path) -> UpdateResult<()> {
    if path.as_os_str().is_empty() {
        return Err(UpdateError::invalid_config(field, "empty", None));
    }
    if path
        .components()
        .all(|component| matches!(component, Component::Normal(_)))
    {
        Ok(())
    } else {
        Err(UpdateError::invalid_config(
            field,
            "not_relative",
            Some(path.display().to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn derived_paths_follow_layout() {
        let config = PipelineConfig::new("/srv/geotz/data");
        assert_eq!(
            config.download_directory(),
            PathBuf::from("/srv/geotz/data/downloads")
        );
        assert_eq!(
            config.archive_path(),
            PathBuf::from("/srv/geotz/data/downloads/timezones.zip")
        );
        assert_eq!(
            config.extraction_directory(),
            PathBuf::from("/srv/geotz/data/downloads/timezones")
        );
        assert_eq!(
            config.fallback_source_json(),
            PathBuf::from("/srv/geotz/data/downloads/timezones/timezones.json")
        );
        assert_eq!(
            config.distributable_path(),
            PathBuf::from("/srv/geotz/data.zip")
        );
    }

    #[test]
    fn distributable_path_ignores_trailing_separator() {
        let config = PipelineConfig::new("relative/data/");
        assert_eq!(
            config.distributable_path(),
            PathBuf::from("relative/data.zip")
        );
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(PipelineConfig::new("data").validate().is_ok());
    }

    #[test]
    fn validate_rejects_unsafe_values() {
        let cases = [
            (PipelineConfig::new(""), "root_directory", "empty"),
            (PipelineConfig::new("/"), "root_directory", "no_basename"),
            (
                PipelineConfig::new("data").with_asset_pattern("  "),
                "asset_name_pattern",
                "empty",
            ),
            (
                PipelineConfig {
                    download_subdirectory: PathBuf::from("../outside"),
                    ..PipelineConfig::new("data")
                },
                "download_subdirectory",
                "not_relative",
            ),
            (
                PipelineConfig::new("data").with_layout(DataLayout {
                    level_directories: Vec::new(),
                    ..DataLayout::default()
                }),
                "level_directories",
                "empty",
            ),
            (
                PipelineConfig::new("data").with_layout(DataLayout {
                    level_directories: vec!["a/b".into()],
                    ..DataLayout::default()
                }),
                "level_directories",
                "not_a_basename",
            ),
            (
                PipelineConfig::new("data").with_layout(DataLayout {
                    canonical_stem: String::new(),
                    ..DataLayout::default()
                }),
                "canonical_stem",
                "empty",
            ),
        ];

        for (config, expected_field, expected_reason) in cases {
            match config.validate() {
                Err(UpdateError::InvalidConfig { field, reason, .. }) => {
                    assert_eq!(field, expected_field);
                    assert_eq!(reason, expected_reason);
                }
                other => panic!("expected {expected_field} rejection, got {other:?}"),
            }
        }
    }

    #[test]
    fn parse_timestamp_accepts_rfc3339_and_legacy_format() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2024-01-01T12:30:00Z").unwrap(), expected);
        assert_eq!(
            parse_timestamp("2024-01-01T14:30:00+02:00").unwrap(),
            expected
        );
        assert_eq!(parse_timestamp("2024-01-01 12:30:00").unwrap(), expected);
        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(UpdateError::InvalidConfig {
                field: "previous_update",
                ..
            })
        ));
    }
}
