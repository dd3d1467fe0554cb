//! External quadrant indexer capability.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Command;

use thiserror::Error;
use tracing::info;

use crate::error::IndexerError;
use crate::model::IndexRequest;

/// Rebuilds the derived dataset under a root directory from a canonical json payload.
pub trait Indexer {
    /// Build the derived dataset described by `request`, synchronously and in place.
    ///
    /// # Errors
    ///
    /// Returns the indexer's own error; the pipeline reports it as a build failure.
    fn build(&self, request: IndexRequest<'_>) -> Result<(), IndexerError>;
}

impl<F> Indexer for F
where
    F: Fn(IndexRequest<'_>) -> Result<(), IndexerError>,
{
    fn build(&self, request: IndexRequest<'_>) -> Result<(), IndexerError> {
        self(request)
    }
}

/// Indexer that runs an external program as `<program> [args..] <root> <json>`.
#[derive(Debug, Clone)]
pub struct CommandIndexer {
    program: PathBuf,
    args: Vec<OsString>,
}

impl CommandIndexer {
    /// Run `program` with no leading arguments.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append leading arguments placed before the root and json paths.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// The indexer program exited unsuccessfully.
#[derive(Debug, Error)]
#[error("indexer command exited unsuccessfully")]
pub struct CommandFailed {
    /// Program that was run.
    pub program: PathBuf,
    /// Exit code, absent when the process was terminated by a signal.
    pub code: Option<i32>,
}

impl Indexer for CommandIndexer {
    fn build(&self, request: IndexRequest<'_>) -> Result<(), IndexerError> {
        info!(
            program = %self.program.display(),
            root = %request.root_directory.display(),
            source = %request.source_json.display(),
            "running indexer command"
        );
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(request.root_directory)
            .arg(request.source_json)
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(Box::new(CommandFailed {
                program: self.program.clone(),
                code: status.code(),
            }))
        }
    }
}
