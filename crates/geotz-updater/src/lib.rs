//! Version-gated update pipeline for the time zone quadrant dataset.
//!
//! The pipeline probes the upstream release feed, downloads and unpacks the boundary
//! archive when a newer release exists, prunes stale derived output, hands the
//! canonical payload to an external [`Indexer`], cleans up the download artifacts and
//! repackages the data directory as a distributable zip.
#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions, clippy::multiple_crate_versions)]

pub mod archive;
pub mod config;
pub mod error;
pub mod indexer;
pub mod model;
pub mod pipeline;
pub mod probe;
pub mod reconcile;
pub mod transport;

pub use config::{DataLayout, PipelineConfig, parse_timestamp};
pub use error::{ErrorKind, IndexerError, PipelineError, UpdateError, UpdateResult};
pub use indexer::{CommandFailed, CommandIndexer, Indexer};
pub use model::{DirectoryWhitelist, IndexRequest, PruneSummary, ReleaseInfo};
pub use pipeline::{Stage, UpdatePipeline};
pub use probe::ReleaseProbe;
pub use transport::{HttpTransport, Transport};
