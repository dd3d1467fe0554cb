//! Argument parsing, pipeline wiring, and exit code mapping.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use geotz_telemetry::{LogFormat, LoggingConfig, Metrics, build_sha, init_logging};
use geotz_updater::config::{
    DEFAULT_ASSET_PATTERN, DEFAULT_DOWNLOAD_SUBDIRECTORY, DEFAULT_METADATA_ENDPOINT,
};
use geotz_updater::{
    CommandIndexer, DataLayout, HttpTransport, PipelineConfig, PipelineError, Stage, UpdateError,
    UpdatePipeline, parse_timestamp,
};
use tracing::info;

use crate::error::{CliError, CliResult};

const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_LEVELS: &str = "a,b,c,d";

/// Parses process arguments, runs the update, and returns the process exit code.
#[must_use]
pub fn run() -> i32 {
    run_with_args(std::env::args_os())
}

/// Parses `args`, runs the update, and returns the process exit code.
///
/// `0` means the dataset was updated or already current, `2` rejected arguments or
/// configuration, and `3` a pipeline failure.
#[must_use]
pub fn run_with_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return err.exit_code();
        }
    };

    let logging = LoggingConfig {
        level: &cli.log_level,
        format: cli.log_format.map_or_else(LogFormat::infer, LogFormat::from),
        build_sha: option_env!("GEOTZ_BUILD_SHA").unwrap_or("dev"),
    };
    if let Err(err) = init_logging(&logging) {
        eprintln!("warning: {err}");
    }
    info!(build_sha = build_sha(), root = %cli.root.display(), "geotz-update starting");

    match execute(&cli) {
        Ok(true) => {
            println!("dataset updated: {}", cli.root.display());
            0
        }
        Ok(false) => {
            println!("dataset already current: {}", cli.root.display());
            0
        }
        Err(err) => {
            eprintln!("error: {}", err.display_message());
            err.exit_code()
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "geotz-update",
    version,
    about = "Refresh the time zone quadrant dataset from the latest upstream release"
)]
struct Cli {
    /// Directory holding the derived dataset; `<root>.zip` is written next to it.
    #[arg(long, env = "GEOTZ_ROOT")]
    root: PathBuf,
    /// Download working directory, relative to the root.
    #[arg(long, env = "GEOTZ_DOWNLOAD_DIR", default_value = DEFAULT_DOWNLOAD_SUBDIRECTORY)]
    download_dir: PathBuf,
    /// Fragment the release asset name must contain.
    #[arg(long, env = "GEOTZ_ASSET_PATTERN", default_value = DEFAULT_ASSET_PATTERN)]
    asset_pattern: String,
    /// Publication time of the release the local copy was built from.
    #[arg(long, env = "GEOTZ_PREVIOUS_UPDATE", value_parser = parse_previous_update)]
    previous_update: Option<DateTime<Utc>>,
    /// Release metadata endpoint.
    #[arg(long, env = "GEOTZ_METADATA_ENDPOINT", default_value = DEFAULT_METADATA_ENDPOINT)]
    endpoint: String,
    /// Index-level directory names kept when stale output is pruned.
    #[arg(
        long,
        env = "GEOTZ_LEVELS",
        value_delimiter = ',',
        default_value = DEFAULT_LEVELS
    )]
    levels: Vec<String>,
    /// Program that rebuilds the dataset, invoked as `<program> [args..] <root> <json>`.
    #[arg(long, env = "GEOTZ_INDEXER")]
    indexer: PathBuf,
    /// Leading argument passed to the indexer program; repeatable.
    #[arg(long = "indexer-arg", allow_hyphen_values = true)]
    indexer_args: Vec<String>,
    /// HTTP timeout in seconds.
    #[arg(long, env = "GEOTZ_HTTP_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout: u64,
    /// Log level used when `RUST_LOG` is unset.
    #[arg(long, env = "GEOTZ_LOG_LEVEL", default_value = "info")]
    log_level: String,
    /// Log output format; defaults to pretty in debug builds and json otherwise.
    #[arg(long, env = "GEOTZ_LOG_FORMAT", value_enum)]
    log_format: Option<LogFormatArg>,
    /// Write Prometheus text metrics here after the run.
    #[arg(long, env = "GEOTZ_METRICS_FILE")]
    metrics_file: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormatArg {
    Json,
    Pretty,
}

impl From<LogFormatArg> for LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Json => Self::Json,
            LogFormatArg::Pretty => Self::Pretty,
        }
    }
}

fn parse_previous_update(value: &str) -> Result<DateTime<Utc>, String> {
    parse_timestamp(value)
        .map_err(|_| "expected RFC 3339 or `YYYY-MM-DD HH:MM:SS`".to_string())
}

fn build_config(cli: &Cli) -> PipelineConfig {
    let mut config = PipelineConfig::new(&cli.root)
        .with_asset_pattern(cli.asset_pattern.clone())
        .with_metadata_endpoint(cli.endpoint.clone())
        .with_previous_update(cli.previous_update)
        .with_layout(DataLayout {
            level_directories: cli
                .levels
                .iter()
                .map(|level| level.trim().to_string())
                .collect(),
            ..DataLayout::default()
        });
    config.download_subdirectory.clone_from(&cli.download_dir);
    config
}

fn execute(cli: &Cli) -> CliResult<bool> {
    let config = build_config(cli);
    let transport =
        HttpTransport::new(Duration::from_secs(cli.timeout)).map_err(CliError::failure)?;
    let indexer = CommandIndexer::new(&cli.indexer).args(&cli.indexer_args);
    let metrics = Metrics::new().map_err(CliError::failure)?;
    let pipeline = UpdatePipeline::new(transport, indexer).with_metrics(metrics.clone());

    let result = pipeline.run(&config);
    let written = cli
        .metrics_file
        .as_deref()
        .map_or(Ok(()), |path| write_metrics(&metrics, path));

    let updated = result.map_err(classify_pipeline_error)?;
    written?;
    Ok(updated)
}

fn classify_pipeline_error(err: PipelineError) -> CliError {
    if err.stage() == Stage::Validate
        && let UpdateError::InvalidConfig {
            field,
            reason,
            value,
        } = err.cause()
    {
        return CliError::validation(match value {
            Some(value) => format!("invalid {field} ({reason}): {value}"),
            None => format!("invalid {field} ({reason})"),
        });
    }
    CliError::failure(err)
}

fn write_metrics(metrics: &Metrics, path: &Path) -> CliResult<()> {
    let rendered = metrics.render().map_err(CliError::failure)?;
    fs::write(path, rendered)
        .with_context(|| format!("failed to write metrics to {}", path.display()))
        .map_err(CliError::failure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use chrono::TimeZone;
    use geotz_test_support::fixtures::{release_document, scratch_dir, write_zip_archive};
    use httpmock::prelude::*;

    type TestResult<T> = Result<T>;

    fn parse(extra: &[&str]) -> Result<Cli, clap::Error> {
        let mut args = vec!["geotz-update", "--root", "data", "--indexer", "indexer"];
        args.extend_from_slice(extra);
        Cli::try_parse_from(args)
    }

    #[test]
    fn defaults_map_onto_pipeline_config() -> TestResult<()> {
        let config = build_config(&parse(&[])?);
        assert_eq!(config, PipelineConfig::new("data"));
        Ok(())
    }

    #[test]
    fn flags_override_layout_and_gate() -> TestResult<()> {
        let cli = parse(&[
            "--levels",
            "n, s",
            "--download-dir",
            "cache/raw",
            "--asset-pattern",
            "with-oceans",
            "--previous-update",
            "2024-01-01 00:00:00",
            "--indexer-arg",
            "--fast",
        ])?;
        let config = build_config(&cli);
        assert_eq!(config.layout.level_directories, vec!["n", "s"]);
        assert_eq!(config.download_subdirectory, PathBuf::from("cache/raw"));
        assert_eq!(config.asset_name_pattern, "with-oceans");
        assert_eq!(
            config.previous_update,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(cli.indexer_args, vec!["--fast"]);
        Ok(())
    }

    #[test]
    fn malformed_previous_update_is_rejected_by_the_parser() {
        let err = parse(&["--previous-update", "last tuesday"]).err();
        assert!(matches!(
            err.map(|err| err.kind()),
            Some(clap::error::ErrorKind::ValueValidation)
        ));
        assert_eq!(
            run_with_args([
                "geotz-update",
                "--root",
                "data",
                "--indexer",
                "indexer",
                "--previous-update",
                "last tuesday",
            ]),
            2
        );
    }

    #[test]
    fn invalid_configuration_exits_with_validation_code() -> TestResult<()> {
        let temp = scratch_dir("geotz-cli-")?;
        let root = temp.path().join("data");
        let code = run_with_args([
            OsString::from("geotz-update"),
            OsString::from("--root"),
            root.clone().into_os_string(),
            OsString::from("--indexer"),
            OsString::from("indexer"),
            OsString::from("--download-dir"),
            OsString::from("../escape"),
            OsString::from("--endpoint"),
            OsString::from("http://127.0.0.1:9/unreachable"),
        ]);
        assert_eq!(code, 2);
        assert!(!root.exists());
        Ok(())
    }

    #[cfg(unix)]
    mod end_to_end {
        use super::*;

        const PUBLISHED: &str = "2024-01-01T00:00:00Z";

        fn serve_release(server: &MockServer, scratch: &Path) -> TestResult<()> {
            let fixture = scratch.join("fixture.zip");
            write_zip_archive(
                &fixture,
                &[
                    ("dist/", b"".as_slice()),
                    ("dist/combined.json", br#"{"type":"FeatureCollection"}"#.as_slice()),
                ],
            )?;
            let payload = fs::read(&fixture)?;
            fs::remove_file(&fixture)?;

            let asset_url = server.url("/download/timezones.geojson.zip");
            let body = release_document(&[("timezones.geojson.zip", asset_url.as_str(), PUBLISHED)]);
            server.mock(|when, then| {
                when.method(GET).path("/releases/latest");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(body);
            });
            server.mock(|when, then| {
                when.method(GET).path("/download/timezones.geojson.zip");
                then.status(200).body(payload);
            });
            Ok(())
        }

        fn args(server: &MockServer, root: &Path, script: &str, extra: &[&str]) -> Vec<OsString> {
            let mut args = vec![
                OsString::from("geotz-update"),
                OsString::from("--root"),
                root.as_os_str().to_owned(),
                OsString::from("--endpoint"),
                OsString::from(server.url("/releases/latest")),
                OsString::from("--indexer"),
                OsString::from("sh"),
                OsString::from("--indexer-arg"),
                OsString::from("-c"),
                OsString::from("--indexer-arg"),
                OsString::from(script),
                OsString::from("--log-format"),
                OsString::from("json"),
            ];
            args.extend(extra.iter().map(OsString::from));
            args
        }

        #[test]
        fn update_run_builds_archive_and_metrics() -> TestResult<()> {
            let server = MockServer::start();
            let temp = scratch_dir("geotz-cli-")?;
            serve_release(&server, temp.path())?;
            let root = temp.path().join("data");
            let metrics_file = temp.path().join("updater.prom");
            let script = r#"mkdir -p "$0/a" && cp "$1" "$0/a/source.json""#;

            let mut argv = args(&server, &root, script, &[]);
            argv.push(OsString::from("--metrics-file"));
            argv.push(metrics_file.clone().into_os_string());

            assert_eq!(run_with_args(argv), 0);
            assert_eq!(
                fs::read_to_string(root.join("a/source.json"))?,
                r#"{"type":"FeatureCollection"}"#
            );
            assert!(temp.path().join("data.zip").is_file());
            let metrics = fs::read_to_string(&metrics_file)?;
            assert!(metrics.contains(r#"updater_runs_total{outcome="updated"} 1"#));
            Ok(())
        }

        #[test]
        fn current_dataset_exits_cleanly_without_running_indexer() -> TestResult<()> {
            let server = MockServer::start();
            let temp = scratch_dir("geotz-cli-")?;
            serve_release(&server, temp.path())?;
            let root = temp.path().join("data");

            let code = run_with_args(args(
                &server,
                &root,
                "exit 1",
                &["--previous-update", PUBLISHED],
            ));
            assert_eq!(code, 0);
            assert!(!root.exists());
            assert!(!temp.path().join("data.zip").exists());
            Ok(())
        }

        #[test]
        fn failing_indexer_exits_with_failure_code() -> TestResult<()> {
            let server = MockServer::start();
            let temp = scratch_dir("geotz-cli-")?;
            serve_release(&server, temp.path())?;
            let root = temp.path().join("data");

            assert_eq!(run_with_args(args(&server, &root, "exit 4", &[])), 3);
            assert!(!temp.path().join("data.zip").exists());
            Ok(())
        }
    }
}
