//! End-to-end update runs against a mock release feed.

use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use chrono::{TimeZone, Utc};
use geotz_test_support::fixtures::{release_document, scratch_dir, tree_snapshot, write_zip_archive};
use geotz_updater::{
    ErrorKind, HttpTransport, IndexRequest, IndexerError, PipelineConfig, Stage, UpdatePipeline,
};
use httpmock::prelude::*;
use zip::ZipArchive;

type TestResult<T> = Result<T>;

const PAYLOAD: &str = r#"{"type":"FeatureCollection","features":[]}"#;

fn archive_bytes(scratch: &std::path::Path) -> TestResult<Vec<u8>> {
    let fixture = scratch.join("fixture.zip");
    write_zip_archive(
        &fixture,
        &[
            ("dist/", b"".as_slice()),
            ("dist/combined-with-oceans.json", PAYLOAD.as_bytes()),
        ],
    )?;
    let bytes = fs::read(&fixture)?;
    fs::remove_file(&fixture)?;
    Ok(bytes)
}

fn transport() -> TestResult<HttpTransport> {
    Ok(HttpTransport::new(Duration::from_secs(5))?)
}

#[test]
fn fresh_install_downloads_builds_and_repackages() -> TestResult<()> {
    let server = MockServer::start();
    let temp = scratch_dir("geotz-e2e-")?;
    let asset_url = server.url("/download/timezones.geojson.zip");
    let metadata = server.mock(|when, then| {
        when.method(GET)
            .path("/releases/latest")
            .header("accept", "application/vnd.github+json");
        then.status(200).body(release_document(&[(
            "timezones.geojson.zip",
            asset_url.as_str(),
            "2024-01-01T00:00:00Z",
        )]));
    });
    let download = server.mock(|when, then| {
        when.method(GET).path("/download/timezones.geojson.zip");
        then.status(200).body(archive_bytes(temp.path()).unwrap_or_default());
    });

    let root = temp.path().join("data");
    let seen: Mutex<Vec<(PathBuf, String)>> = Mutex::new(Vec::new());
    let indexer = |request: IndexRequest<'_>| -> Result<(), IndexerError> {
        let payload = fs::read_to_string(request.source_json)?;
        if let Ok(mut seen) = seen.lock() {
            seen.push((request.source_json.to_path_buf(), payload));
        }
        for level in ["a", "b"] {
            fs::create_dir_all(request.root_directory.join(level).join("0"))?;
        }
        fs::write(request.root_directory.join("a/0/tz.json"), b"[]")?;
        Ok(())
    };
    let config = PipelineConfig::new(&root).with_metadata_endpoint(server.url("/releases/latest"));

    let updated = UpdatePipeline::new(transport()?, indexer).run(&config)?;

    assert!(updated);
    metadata.assert();
    download.assert();
    let seen = seen.into_inner().map_err(|_| anyhow::anyhow!("poisoned"))?;
    assert_eq!(
        seen,
        vec![(
            root.join("downloads/timezones/dist/timezones.json"),
            PAYLOAD.to_string()
        )]
    );
    assert_eq!(
        tree_snapshot(&root)?,
        vec![
            "a/",
            "a/0/",
            "a/0/tz.json",
            "b/",
            "b/0/",
            "downloads/",
            "downloads/timezones/",
            "downloads/timezones/dist/",
        ]
    );

    let mut archive = ZipArchive::new(File::open(temp.path().join("data.zip"))?)?;
    let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            "data/",
            "data/a/",
            "data/a/0/",
            "data/a/0/tz.json",
            "data/b/",
            "data/b/0/",
            "data/downloads/",
            "data/downloads/timezones/",
            "data/downloads/timezones/dist/",
        ]
    );
    assert!(archive.by_name("data/a/0/tz.json").is_ok());
    Ok(())
}

#[test]
fn up_to_date_run_touches_nothing() -> TestResult<()> {
    let server = MockServer::start();
    let temp = scratch_dir("geotz-e2e-")?;
    let asset_url = server.url("/download/timezones.geojson.zip");
    server.mock(|when, then| {
        when.method(GET).path("/releases/latest");
        then.status(200).body(release_document(&[(
            "timezones.geojson.zip",
            asset_url.as_str(),
            "2024-01-01T00:00:00Z",
        )]));
    });

    let root = temp.path().join("data");
    let indexer = |_: IndexRequest<'_>| -> Result<(), IndexerError> {
        Err("indexer must not run".into())
    };
    let config = PipelineConfig::new(&root)
        .with_metadata_endpoint(server.url("/releases/latest"))
        .with_previous_update(Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));

    assert!(!UpdatePipeline::new(transport()?, indexer).run(&config)?);
    assert!(tree_snapshot(temp.path())?.is_empty());
    Ok(())
}

#[test]
fn unreachable_metadata_fails_at_check() -> TestResult<()> {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/releases/latest");
        then.status(503);
    });
    let temp = scratch_dir("geotz-e2e-")?;
    let indexer = |_: IndexRequest<'_>| -> Result<(), IndexerError> { Ok(()) };
    let config = PipelineConfig::new(temp.path().join("data"))
        .with_metadata_endpoint(server.url("/releases/latest"));

    let err = UpdatePipeline::new(transport()?, indexer)
        .run(&config)
        .err()
        .ok_or_else(|| anyhow::anyhow!("expected check failure"))?;
    assert_eq!(err.stage(), Stage::Check);
    assert_eq!(err.kind(), ErrorKind::Fetch);
    assert!(tree_snapshot(temp.path())?.is_empty());
    Ok(())
}

#[test]
fn failed_download_leaves_no_partial_archive() -> TestResult<()> {
    let server = MockServer::start();
    let temp = scratch_dir("geotz-e2e-")?;
    let asset_url = server.url("/download/timezones.geojson.zip");
    server.mock(|when, then| {
        when.method(GET).path("/releases/latest");
        then.status(200).body(release_document(&[(
            "timezones.geojson.zip",
            asset_url.as_str(),
            "2024-01-01T00:00:00Z",
        )]));
    });
    server.mock(|when, then| {
        when.method(GET).path("/download/timezones.geojson.zip");
        then.status(404);
    });
    let indexer = |_: IndexRequest<'_>| -> Result<(), IndexerError> { Ok(()) };
    let config = PipelineConfig::new(temp.path().join("data"))
        .with_metadata_endpoint(server.url("/releases/latest"));

    let err = UpdatePipeline::new(transport()?, indexer)
        .run(&config)
        .err()
        .ok_or_else(|| anyhow::anyhow!("expected download failure"))?;
    assert_eq!(err.stage(), Stage::Download);
    assert!(!config.archive_path().exists());
    Ok(())
}
