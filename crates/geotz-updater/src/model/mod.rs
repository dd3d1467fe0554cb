//! Domain models for the update pipeline.
//!
//! # Design
//! - Keep request/response types lightweight and copyable.
//! - Avoid embedding IO handles; callers supply references.
//! - Deserialize only the upstream release fields the pipeline consumes.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Release metadata resolved for the configured asset pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
    /// Download location of the matched asset; `None` when nothing matched.
    pub download_url: Option<String>,
    /// Name of the matched asset.
    pub asset_name: Option<String>,
    /// Publication time of the matched asset, or the probe time when nothing matched.
    pub published_at: DateTime<Utc>,
}

impl ReleaseInfo {
    /// Release info for an upstream release that carries no matching asset.
    #[must_use]
    pub const fn unavailable(probed_at: DateTime<Utc>) -> Self {
        Self {
            download_url: None,
            asset_name: None,
            published_at: probed_at,
        }
    }

    /// Whether a matching asset was found.
    #[must_use]
    pub const fn has_asset(&self) -> bool {
        self.download_url.is_some()
    }

    /// Whether a local copy stamped at `previous` already covers this release.
    #[must_use]
    pub fn is_covered_by(&self, previous: Option<DateTime<Utc>>) -> bool {
        previous.is_some_and(|stamp| stamp >= self.published_at)
    }
}

/// Upstream release document as served by the metadata endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseDocument {
    /// Downloadable assets in publication order.
    pub assets: Vec<ReleaseAsset>,
}

/// A single downloadable asset within a release.
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseAsset {
    /// Asset file name.
    pub name: String,
    /// Direct download URL.
    pub browser_download_url: String,
    /// Upload time of the asset.
    pub created_at: DateTime<Utc>,
}

/// Directory basenames that survive a pruning pass.
///
/// An empty whitelist selects delete-everything mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryWhitelist {
    names: BTreeSet<String>,
}

impl DirectoryWhitelist {
    /// Whitelist that preserves nothing.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            names: BTreeSet::new(),
        }
    }

    /// Whether the whitelist selects delete-everything mode.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Whether a directory at `path` is preserved by its basename.
    #[must_use]
    pub fn preserves(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| self.names.contains(name))
    }

    /// Iterate the preserved names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for DirectoryWhitelist {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Counts gathered while pruning a tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneSummary {
    /// Regular files (and symlinks) deleted.
    pub files_removed: usize,
    /// Directories deleted.
    pub directories_removed: usize,
    /// Directories left in place.
    pub directories_kept: usize,
}

/// Inputs handed to the external indexer.
#[derive(Debug, Copy, Clone)]
pub struct IndexRequest<'a> {
    /// Directory the derived dataset is rebuilt under.
    pub root_directory: &'a Path,
    /// Canonical boundary geometry file.
    pub source_json: &'a Path,
}
