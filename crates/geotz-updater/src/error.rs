//! # Design
//!
//! - Provide structured, constant-message errors for the update pipeline.
//! - Capture operation context (paths, urls, fields) to make failures reproducible in tests.
//! - Preserve source errors without interpolating context into error messages.
//! - Tag pipeline failures with the stage that raised them.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::Stage;

/// Result type for update pipeline operations.
pub type UpdateResult<T> = Result<T, UpdateError>;

/// Boxed error raised by an external indexer.
pub type IndexerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Coarse classification of an [`UpdateError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Metadata or payload retrieval failed.
    Fetch,
    /// An archive could not be opened, read, or written.
    Archive,
    /// Directory creation, rename, or deletion failed.
    Filesystem,
    /// No `.json` payload was found after extraction.
    Normalize,
    /// The external indexer reported a failure.
    Indexer,
    /// The supplied configuration was rejected.
    Config,
}

impl ErrorKind {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Archive => "archive",
            Self::Filesystem => "filesystem",
            Self::Normalize => "normalize",
            Self::Indexer => "indexer",
            Self::Config => "config",
        }
    }
}

/// Errors produced by the update pipeline building blocks.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// Network transport failures, including non-success HTTP statuses.
    #[error("updater fetch failure")]
    Fetch {
        /// Operation that triggered the transport failure.
        operation: &'static str,
        /// URL being fetched.
        url: String,
        /// Underlying transport error.
        source: reqwest::Error,
    },
    /// Release metadata could not be decoded.
    #[error("updater metadata decode failure")]
    Decode {
        /// Operation that triggered the decode failure.
        operation: &'static str,
        /// URL the metadata was fetched from.
        url: String,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
    /// Zip archive failures.
    #[error("updater archive failure")]
    Archive {
        /// Operation that triggered the archive failure.
        operation: &'static str,
        /// Archive path involved in the failure.
        path: PathBuf,
        /// Underlying zip error.
        source: zip::result::ZipError,
    },
    /// IO failures while interacting with the filesystem.
    #[error("updater filesystem failure")]
    Filesystem {
        /// Operation that triggered the IO failure.
        operation: &'static str,
        /// Path involved in the IO failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// Walkdir traversal failures.
    #[error("updater traversal failure")]
    Walk {
        /// Operation that triggered the traversal failure.
        operation: &'static str,
        /// Root of the traversal.
        path: PathBuf,
        /// Underlying walkdir error.
        source: walkdir::Error,
    },
    /// No `.json` payload exists beneath the extracted tree.
    #[error("no json payload found in extracted archive")]
    Normalize {
        /// Directory that was searched.
        path: PathBuf,
    },
    /// The external indexer failed to rebuild the dataset.
    #[error("indexer failed to build dataset")]
    Indexer {
        /// Root directory handed to the indexer.
        root: PathBuf,
        /// Error reported by the indexer.
        source: IndexerError,
    },
    /// Configuration validation failures.
    #[error("updater invalid configuration")]
    InvalidConfig {
        /// Field that failed validation.
        field: &'static str,
        /// Static reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// Input validation failures.
    #[error("updater invalid input")]
    InvalidInput {
        /// Field that failed validation.
        field: &'static str,
        /// Static reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
}

impl UpdateError {
    /// Classify the error into the pipeline failure taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Fetch { .. } | Self::Decode { .. } => ErrorKind::Fetch,
            Self::Archive { .. } | Self::InvalidInput { .. } => ErrorKind::Archive,
            Self::Filesystem { .. } | Self::Walk { .. } => ErrorKind::Filesystem,
            Self::Normalize { .. } => ErrorKind::Normalize,
            Self::Indexer { .. } => ErrorKind::Indexer,
            Self::InvalidConfig { .. } => ErrorKind::Config,
        }
    }

    pub(crate) fn fetch(operation: &'static str, url: &str, source: reqwest::Error) -> Self {
        Self::Fetch {
            operation,
            url: url.to_string(),
            source,
        }
    }

    pub(crate) fn decode(operation: &'static str, url: &str, source: serde_json::Error) -> Self {
        Self::Decode {
            operation,
            url: url.to_string(),
            source,
        }
    }

    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Filesystem {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn walkdir(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: walkdir::Error,
    ) -> Self {
        Self::Walk {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn zip(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: zip::result::ZipError,
    ) -> Self {
        Self::Archive {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid_config(
        field: &'static str,
        reason: &'static str,
        value: Option<String>,
    ) -> Self {
        Self::InvalidConfig {
            field,
            reason,
            value,
        }
    }
}

/// Failure of a single pipeline run, tagged with the stage that aborted it.
#[derive(Debug, Error)]
#[error("update pipeline failed during {stage}")]
pub struct PipelineError {
    stage: Stage,
    source: UpdateError,
}

impl PipelineError {
    /// Wrap a stage failure.
    #[must_use]
    pub const fn new(stage: Stage, source: UpdateError) -> Self {
        Self { stage, source }
    }

    /// Stage that failed.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// Taxonomy class of the underlying failure.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.source.kind()
    }

    /// Borrow the underlying stage error.
    #[must_use]
    pub const fn cause(&self) -> &UpdateError {
        &self.source
    }
}
