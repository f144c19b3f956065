//! Integration test: slabscope summary runs
//!
//! Validates that:
//! 1. A fixture run writes the legacy text report, the JSON report and an
//!    artifact index whose digests match the files on disk.
//! 2. The structured log passes schema validation and records the run.
//! 3. Walks that stop early are logged as `walk_anomaly` with a stop reason
//!    and mark the run as degraded.
//! 4. Missing layout metadata fails the run and is logged as `run_failed`.
//!
//! Run: cargo test -p slabscope-harness --test summary_run_test

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use slabscope_core::{AnalysisConfig, SnapshotFixture};
use slabscope_harness::runner::{self, ARTIFACT_INDEX_FILE_NAME};
use slabscope_harness::structured_log::{sha256_hex, validate_log_file};
use slabscope_harness::{HarnessError, OutputFormat, Outcome, RunOptions, SnapshotSource};

fn workspace_root() -> PathBuf {
    let manifest = env!("CARGO_MANIFEST_DIR");
    Path::new(manifest)
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .to_path_buf()
}

fn fixture_path() -> PathBuf {
    workspace_root().join("tests/fixtures/slab_two_caches.json")
}

fn unique_tmp_path(prefix: &str, suffix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time should be after UNIX_EPOCH")
        .as_nanos();
    std::env::temp_dir().join(format!("{prefix}-{}-{nanos}{suffix}", std::process::id()))
}

fn options(dir: &Path, format: OutputFormat) -> RunOptions {
    let mut options = RunOptions::new(dir);
    options.format = format;
    options.log = Some(dir.join("run.log.jsonl"));
    options.run_id = "run-test".to_string();
    options
}

fn log_rows(path: &Path) -> Vec<serde_json::Value> {
    std::fs::read_to_string(path)
        .expect("log should be readable")
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).expect("log row must be JSON"))
        .collect()
}

/// Copy of the shared fixture with `edit` applied, written under `dir`.
fn edited_fixture(dir: &Path, name: &str, edit: impl FnOnce(&mut serde_json::Value)) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let mut fixture: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(fixture_path()).unwrap()).unwrap();
    edit(&mut fixture);
    let path = dir.join(name);
    std::fs::write(&path, fixture.to_string()).unwrap();
    path
}

#[test]
fn fixture_run_writes_reports_and_index() {
    let dir = unique_tmp_path("slabscope-run", "");
    let source = SnapshotSource::Fixture {
        path: fixture_path(),
    };
    let run = runner::run_summary(
        &source,
        &AnalysisConfig::default(),
        &options(&dir, OutputFormat::Both),
    )
    .expect("fixture run should succeed");

    assert_eq!(run.outcome, Outcome::Ok);
    assert_eq!(run.written.len(), 2);

    let text = std::fs::read_to_string(dir.join("slabsummary_partial.txt")).unwrap();
    assert_eq!(text, run.report.to_text());
    assert!(text.ends_with(
        "\nkmalloc-192                               192          5         14      3.5K          5        8.0K"
    ));
    assert!(!text.contains("kmem_cache_node"));

    let json: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(dir.join("slabsummary_partial.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(json["caches"][0]["total_allocated"].as_u64(), Some(5));

    let index: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(dir.join(ARTIFACT_INDEX_FILE_NAME)).unwrap(),
    )
    .unwrap();
    assert_eq!(index["run_id"].as_str(), Some("run-test"));
    let artifacts = index["artifacts"].as_array().unwrap();
    assert_eq!(artifacts.len(), 3, "text, json, log");
    for artifact in artifacts {
        let name = artifact["path"].as_str().unwrap();
        let data = std::fs::read(dir.join(name)).unwrap();
        assert_eq!(artifact["sha256"].as_str(), Some(sha256_hex(&data).as_str()));
        assert_eq!(artifact["size_bytes"].as_u64(), Some(data.len() as u64));
    }

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn run_log_is_valid_and_complete() {
    let dir = unique_tmp_path("slabscope-log", "");
    let source = SnapshotSource::Fixture {
        path: fixture_path(),
    };
    let opts = options(&dir, OutputFormat::Text);
    runner::run_summary(&source, &AnalysisConfig::default(), &opts).unwrap();

    let log = opts.log.clone().unwrap();
    let (lines, errors) = validate_log_file(&log).unwrap();
    assert!(errors.is_empty(), "log errors: {errors:?}");
    assert!(lines >= 4);
    assert_eq!(runner::validate_log(&log).unwrap(), lines);

    let rows = log_rows(&log);
    let events: Vec<&str> = rows.iter().map(|r| r["event"].as_str().unwrap()).collect();
    assert_eq!(events.first(), Some(&"run_start"));
    assert_eq!(events.last(), Some(&"run_complete"));
    assert!(events.contains(&"cache_summary"));
    assert!(!events.contains(&"walk_anomaly"));

    let summary = rows.iter().find(|r| r["event"] == "cache_summary").unwrap();
    assert_eq!(summary["cache"], "kmalloc-192");
    assert_eq!(summary["details"]["total_free"], 9);
    assert_eq!(rows.last().unwrap()["outcome"], "ok");
    assert!(
        rows[0]["trace_id"]
            .as_str()
            .unwrap()
            .starts_with("slabscope::run-test::")
    );

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn early_stops_are_logged_and_degrade_the_run() {
    let dir = unique_tmp_path("slabscope-degraded", "");
    let parsed = SnapshotFixture::from_file(&fixture_path()).unwrap();
    let vmemmap = parsed.layout.page_map.unwrap().vmemmap_base.0;
    // counters word of the only partial page
    let target = format!("{:#x}", vmemmap + 2 * 64 + 0x28);

    let broken = edited_fixture(&dir, "broken.json", |fixture| {
        fixture["words"]
            .as_array_mut()
            .unwrap()
            .retain(|w| w["address"].as_str() != Some(target.as_str()));
    });

    let opts = options(&dir, OutputFormat::Text);
    let run = runner::run_summary(
        &SnapshotSource::Fixture { path: broken },
        &AnalysisConfig::default(),
        &opts,
    )
    .unwrap();
    assert_eq!(run.outcome, Outcome::Degraded);
    let row = &run.report.caches[0];
    assert_eq!((row.total_free, row.total_objects), (7, 10));

    let rows = log_rows(opts.log.as_ref().unwrap());
    let anomaly = rows
        .iter()
        .find(|r| r["event"] == "walk_anomaly")
        .expect("anomaly should be logged");
    assert_eq!(anomaly["level"], "warn");
    assert_eq!(anomaly["stop_reason"], "unavailable");
    assert_eq!(anomaly["address"].as_str(), Some(target.as_str()));
    assert_eq!(anomaly["details"]["source"]["walk"], "partial_list");
    assert_eq!(rows.last().unwrap()["outcome"], "degraded");

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn missing_layout_fails_and_is_logged() {
    let dir = unique_tmp_path("slabscope-fail", "");
    let broken = edited_fixture(&dir, "no_symbols.json", |fixture| {
        fixture["symbols"]
            .as_object_mut()
            .unwrap()
            .remove("slab_caches");
    });

    let opts = options(&dir, OutputFormat::Text);
    let err = runner::run_summary(
        &SnapshotSource::Fixture { path: broken },
        &AnalysisConfig::default(),
        &opts,
    )
    .unwrap_err();
    assert!(matches!(err, HarnessError::Layout(_)), "{err}");
    assert!(err.to_string().contains("slab_caches"));
    assert!(!dir.join("slabsummary_partial.txt").exists());

    let rows = log_rows(opts.log.as_ref().unwrap());
    let last = rows.last().unwrap();
    assert_eq!(last["event"], "run_failed");
    assert_eq!(last["outcome"], "failed");
    assert_eq!(last["level"], "error");

    let _ = std::fs::remove_dir_all(dir);
}
