//! Version-gated update pipeline.
//!
//! # Design
//! - Stages run strictly in order and the first failure aborts the run, tagged with
//!   the stage that raised it.
//! - The gate runs before any filesystem write, so an up-to-date run is a no-op.
//! - Every transition is logged and counted; there is no persisted step journal, the
//!   filesystem is the only state carried between runs.

use std::fmt::{self, Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};

use geotz_telemetry::Metrics;
use tracing::{info, warn};

use crate::archive::{extract_archive, normalize_json, pack_directory};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, UpdateError, UpdateResult};
use crate::indexer::Indexer;
use crate::model::{IndexRequest, ReleaseInfo};
use crate::probe::ReleaseProbe;
use crate::reconcile::{prune, prune_excluding};
use crate::transport::Transport;

/// Pipeline stages in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Configuration validation.
    Validate,
    /// Release probe and version gate.
    Check,
    /// Archive download.
    Download,
    /// Archive extraction.
    Extract,
    /// Canonical json rename.
    Normalize,
    /// Stale derived output removal.
    PruneDerived,
    /// External indexer run.
    BuildIndex,
    /// Download artifact removal.
    PruneDownloads,
    /// Distributable archive creation.
    Repackage,
}

impl Stage {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Check => "check",
            Self::Download => "download",
            Self::Extract => "extract",
            Self::Normalize => "normalize",
            Self::PruneDerived => "prune_derived",
            Self::BuildIndex => "build_index",
            Self::PruneDownloads => "prune_downloads",
            Self::Repackage => "repackage",
        }
    }
}

impl Display for Stage {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StageStatus {
    Started,
    Completed,
    Skipped,
    Failed,
}

impl StageStatus {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

enum StageOutcome<T> {
    Completed(T),
    Skipped(T, &'static str),
}

impl<T> StageOutcome<T> {
    const fn status(&self) -> StageStatus {
        match self {
            Self::Completed(_) => StageStatus::Completed,
            Self::Skipped(..) => StageStatus::Skipped,
        }
    }

    const fn detail(&self) -> Option<&'static str> {
        match self {
            Self::Completed(_) => None,
            Self::Skipped(_, reason) => Some(*reason),
        }
    }

    fn into_value(self) -> T {
        match self {
            Self::Completed(value) | Self::Skipped(value, _) => value,
        }
    }
}

/// Orchestrates a single update run over a caller-owned data directory.
pub struct UpdatePipeline<T, I> {
    transport: T,
    indexer: I,
    metrics: Option<Metrics>,
}

impl<T: Transport, I: Indexer> UpdatePipeline<T, I> {
    /// Build a pipeline from its network and indexer capabilities.
    #[must_use]
    pub const fn new(transport: T, indexer: I) -> Self {
        Self {
            transport,
            indexer,
            metrics: None,
        }
    }

    /// Record stage and run counters into `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run the pipeline once.
    ///
    /// Returns `true` when the dataset was rebuilt and repackaged, and `false` when the
    /// local copy already reflects the latest release.
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineError`] naming the first stage that failed. Work done by
    /// earlier stages is not rolled back; re-running converges.
    pub fn run(&self, config: &PipelineConfig) -> Result<bool, PipelineError> {
        let result = self.run_stages(config);
        let outcome = match &result {
            Ok(true) => "updated",
            Ok(false) => "up_to_date",
            Err(_) => "failed",
        };
        if let Some(metrics) = &self.metrics {
            metrics.inc_run(outcome);
        }
        match &result {
            Ok(_) => info!(outcome, root = %config.root_directory.display(), "update run finished"),
            Err(err) => warn!(
                outcome,
                stage = err.stage().as_str(),
                kind = err.kind().as_str(),
                "update run aborted"
            ),
        }
        result
    }

    fn run_stages(&self, config: &PipelineConfig) -> Result<bool, PipelineError> {
        self.execute_stage(Stage::Validate, || {
            config.validate().map(StageOutcome::Completed)
        })?;

        let release = self.execute_stage(Stage::Check, || self.check(config))?;
        if release.is_covered_by(config.previous_update) {
            info!(
                published_at = %release.published_at,
                previous_update = ?config.previous_update,
                "local dataset already current"
            );
            return Ok(false);
        }

        let archive = self.execute_stage(Stage::Download, || self.download(config, &release))?;
        let extracted = self.execute_stage(Stage::Extract, || Self::extract(archive.as_deref()))?;
        let source_json = self.execute_stage(Stage::Normalize, || {
            Self::normalize(config, extracted.as_deref())
        })?;

        self.execute_stage(Stage::PruneDerived, || {
            prune_excluding(
                &config.root_directory,
                &config.layout.level_whitelist(),
                &config.download_directory(),
            )
            .map(StageOutcome::Completed)
        })?;

        self.execute_stage(Stage::BuildIndex, || self.build_index(config, &source_json))?;

        self.execute_stage(Stage::PruneDownloads, || {
            prune(
                &config.download_directory(),
                &config.layout.download_whitelist(),
            )
            .map(StageOutcome::Completed)
        })?;

        self.execute_stage(Stage::Repackage, || {
            pack_directory(&config.root_directory, &config.distributable_path())
                .map(StageOutcome::Completed)
        })?;

        Ok(true)
    }

    fn check(&self, config: &PipelineConfig) -> UpdateResult<StageOutcome<ReleaseInfo>> {
        let release = ReleaseProbe::new(&self.transport)
            .probe(&config.metadata_endpoint, &config.asset_name_pattern)?;
        if release.has_asset()
            && let Some(metrics) = &self.metrics
        {
            metrics.set_last_release_timestamp(release.published_at.timestamp());
        }
        Ok(StageOutcome::Completed(release))
    }

    fn download(
        &self,
        config: &PipelineConfig,
        release: &ReleaseInfo,
    ) -> UpdateResult<StageOutcome<Option<PathBuf>>> {
        let Some(url) = release.download_url.as_deref() else {
            return Ok(StageOutcome::Skipped(None, "no matching asset"));
        };

        let download_dir = config.download_directory();
        fs::create_dir_all(&download_dir)
            .map_err(|source| UpdateError::io("download.create_directory", &download_dir, source))?;

        let archive = config.archive_path();
        let bytes = self.transport.fetch_to_path(url, &archive)?;
        info!(url, path = %archive.display(), bytes, "release archive downloaded");
        Ok(StageOutcome::Completed(Some(archive)))
    }

    fn extract(archive: Option<&Path>) -> UpdateResult<StageOutcome<Option<PathBuf>>> {
        match archive {
            Some(archive) => extract_archive(archive).map(|dir| StageOutcome::Completed(Some(dir))),
            None => Ok(StageOutcome::Skipped(None, "nothing downloaded")),
        }
    }

    fn normalize(
        config: &PipelineConfig,
        extracted: Option<&Path>,
    ) -> UpdateResult<StageOutcome<PathBuf>> {
        let file_name = config.layout.canonical_file_name();
        if let Some(root) = extracted {
            return normalize_json(root, &file_name).map(StageOutcome::Completed);
        }

        let fallback = config.fallback_source_json();
        if !fallback.is_file() {
            warn!(
                path = %fallback.display(),
                "no archive extracted and no canonical payload on disk"
            );
        }
        Ok(StageOutcome::Skipped(fallback, "nothing extracted"))
    }

    fn build_index(
        &self,
        config: &PipelineConfig,
        source_json: &Path,
    ) -> UpdateResult<StageOutcome<()>> {
        let request = IndexRequest {
            root_directory: &config.root_directory,
            source_json,
        };
        self.indexer
            .build(request)
            .map_err(|source| UpdateError::Indexer {
                root: config.root_directory.clone(),
                source,
            })?;
        Ok(StageOutcome::Completed(()))
    }

    fn execute_stage<R, F>(&self, stage: Stage, op: F) -> Result<R, PipelineError>
    where
        F: FnOnce() -> UpdateResult<StageOutcome<R>>,
    {
        self.record_stage(stage, StageStatus::Started, None);
        match op() {
            Ok(outcome) => {
                self.record_stage(stage, outcome.status(), outcome.detail());
                Ok(outcome.into_value())
            }
            Err(err) => {
                let detail = error_chain(&err);
                self.record_stage(stage, StageStatus::Failed, Some(&detail));
                Err(PipelineError::new(stage, err))
            }
        }
    }

    fn record_stage(&self, stage: Stage, status: StageStatus, detail: Option<&str>) {
        if status == StageStatus::Failed {
            warn!(
                stage = stage.as_str(),
                status = status.as_str(),
                detail,
                "pipeline stage transition"
            );
        } else {
            info!(
                stage = stage.as_str(),
                status = status.as_str(),
                detail,
                "pipeline stage transition"
            );
        }
        if let Some(metrics) = &self.metrics {
            metrics.inc_stage(stage.as_str(), status.as_str());
        }
    }
}

fn error_chain(err: &UpdateError) -> String {
    let mut detail = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        detail.push_str(": ");
        detail.push_str(&cause.to_string());
        source = cause.source();
    }
    detail
}
