//! Analysis runs: open a snapshot, summarize it, write reports and evidence.

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde_json::json;
use thiserror::Error;

use slabscope_core::cache_dir::DirectoryStop;
use slabscope_core::{
    AnalysisConfig, ElfCoreSnapshot, JSON_REPORT_FILE_NAME, LayoutError, LayoutMetadata,
    REPORT_FILE_NAME, ReportFormatter, SlabSummaryEngine, SlabSummaryReport, SnapshotAccess,
    SnapshotError, SnapshotFixture,
};

use crate::structured_log::{ArtifactIndex, LogEmitter, LogLevel, Outcome};

/// Component name used in trace ids.
pub const COMPONENT: &str = "slabscope";
pub const ARTIFACT_INDEX_FILE_NAME: &str = "artifact_index.json";

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("snapshot: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("layout: {0}")]
    Layout(#[from] LayoutError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Which report files a run writes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Both,
}

impl OutputFormat {
    #[must_use]
    pub fn from_str_loose(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" | "txt" => Some(Self::Text),
            "json" => Some(Self::Json),
            "both" | "all" => Some(Self::Both),
            _ => None,
        }
    }

    fn writes_text(self) -> bool {
        matches!(self, Self::Text | Self::Both)
    }

    fn writes_json(self) -> bool {
        matches!(self, Self::Json | Self::Both)
    }
}

/// Where the snapshot comes from.
#[derive(Debug, Clone)]
pub enum SnapshotSource {
    /// ELF core image plus its JSON layout document.
    Core { image: PathBuf, layout: PathBuf },
    /// Synthetic JSON snapshot.
    Fixture { path: PathBuf },
}

impl SnapshotSource {
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Core { image, .. } => format!("core:{}", image.display()),
            Self::Fixture { path } => format!("fixture:{}", path.display()),
        }
    }

    pub fn open(&self) -> Result<Box<dyn SnapshotAccess>, HarnessError> {
        let snapshot: Box<dyn SnapshotAccess> = match self {
            Self::Core { image, layout } => {
                let metadata = LayoutMetadata::from_file(layout)?;
                Box::new(ElfCoreSnapshot::open(image, metadata)?)
            }
            Self::Fixture { path } => Box::new(SnapshotFixture::from_file(path)?.into_snapshot()),
        };
        Ok(snapshot)
    }
}

/// Output settings for one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub output_dir: PathBuf,
    pub format: OutputFormat,
    /// Structured JSONL log destination; logs are discarded when unset.
    pub log: Option<PathBuf>,
    pub run_id: String,
}

impl RunOptions {
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        let secs = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Self {
            output_dir: output_dir.into(),
            format: OutputFormat::Text,
            log: None,
            run_id: format!("run-{secs}"),
        }
    }
}

/// What a successful run produced.
#[derive(Debug)]
pub struct RunArtifacts {
    pub report: SlabSummaryReport,
    pub outcome: Outcome,
    /// Report files, in the order written.
    pub written: Vec<PathBuf>,
    pub artifact_index: PathBuf,
}

/// `Degraded` when any walk, cache or the directory itself ended early.
#[must_use]
pub fn classify(report: &SlabSummaryReport) -> Outcome {
    let clean = report.anomalies().next().is_none()
        && report.unreadable.is_empty()
        && report.directory_stop == DirectoryStop::Completed;
    if clean { Outcome::Ok } else { Outcome::Degraded }
}

/// Run the summary end to end.
pub fn run_summary(
    source: &SnapshotSource,
    config: &AnalysisConfig,
    options: &RunOptions,
) -> Result<RunArtifacts, HarnessError> {
    std::fs::create_dir_all(&options.output_dir)?;
    let mut log = match &options.log {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            LogEmitter::to_file(path, COMPONENT, &options.run_id)?
        }
        None => LogEmitter::to_sink(COMPONENT, &options.run_id),
    };
    let started = Instant::now();

    let entry = log.entry(LogLevel::Info, "run_start").with_details(json!({
        "source": source.describe(),
        "config": config,
        "output_dir": options.output_dir.display().to_string(),
    }));
    log.emit_entry(entry)?;

    let result = execute(source, config, options, &mut log);
    let elapsed = started.elapsed().as_millis() as u64;
    let entry = match &result {
        Ok((run, _)) => log
            .entry(LogLevel::Info, "run_complete")
            .with_outcome(run.outcome)
            .with_artifacts(artifact_names(&run.written))
            .with_details(json!({
                "rows": run.report.caches.len(),
                "skipped": run.report.skipped,
                "unreadable": run.report.unreadable.len(),
            })),
        Err(err) => log
            .entry(LogLevel::Error, "run_failed")
            .with_outcome(Outcome::Failed)
            .with_details(json!({ "error": err.to_string() })),
    };
    log.emit_entry(entry.with_duration_ms(elapsed))?;
    log.flush()?;

    // The log is complete only after `run_complete`, so it is indexed last.
    let (run, mut index) = result?;
    if let Some(path) = &options.log {
        index.add_file(path, "log")?;
    }
    std::fs::write(&run.artifact_index, index.to_json()?)?;
    Ok(run)
}

fn execute(
    source: &SnapshotSource,
    config: &AnalysisConfig,
    options: &RunOptions,
    log: &mut LogEmitter,
) -> Result<(RunArtifacts, ArtifactIndex), HarnessError> {
    let snapshot = source.open()?;
    let report = SlabSummaryEngine::new(snapshot.as_ref(), config.clone()).run()?;
    log_report(log, &report)?;

    let mut written = Vec::new();
    let mut index = ArtifactIndex::new(log.run_id());
    if options.format.writes_text() {
        let path = options.output_dir.join(REPORT_FILE_NAME);
        let mut out = BufWriter::new(File::create(&path)?);
        ReportFormatter::new().write_to(&report.caches, &mut out)?;
        drop(out);
        index.add_file(&path, "report_text")?;
        written.push(path);
    }
    if options.format.writes_json() {
        let path = options.output_dir.join(JSON_REPORT_FILE_NAME);
        std::fs::write(&path, report.to_json()?)?;
        index.add_file(&path, "report_json")?;
        written.push(path);
    }

    let entry = log
        .entry(LogLevel::Info, "report_written")
        .with_artifacts(artifact_names(&written));
    log.emit_entry(entry)?;

    let run = RunArtifacts {
        outcome: classify(&report),
        report,
        written,
        artifact_index: options.output_dir.join(ARTIFACT_INDEX_FILE_NAME),
    };
    Ok((run, index))
}

fn log_report(log: &mut LogEmitter, report: &SlabSummaryReport) -> io::Result<()> {
    let entry = log
        .entry(LogLevel::Info, "layout_resolved")
        .with_details(json!({
            "version": report.version.to_string(),
            "counter_layout": report.counter_layout,
            "node_scope": report.node_scope,
            "max_page_address": format!("{:#x}", report.max_page_address),
        }));
    log.emit_entry(entry)?;

    for summary in &report.caches {
        let entry = log
            .entry(LogLevel::Debug, "cache_summary")
            .with_cache(&summary.name)
            .with_address(summary.address)
            .with_details(json!({
                "total_free": summary.total_free,
                "total_objects": summary.total_objects,
                "total_allocated": summary.total_allocated,
                "nr_partial": summary.nr_partial,
                "active_cpus": summary.active_cpus,
            }));
        log.emit_entry(entry)?;

        for anomaly in &summary.anomalies {
            let mut entry = log
                .entry(LogLevel::Warn, "walk_anomaly")
                .with_cache(&summary.name)
                .with_stop_reason(anomaly.stop.label())
                .with_details(json!({ "source": anomaly.source }));
            if let Some(address) = anomaly.stop.address() {
                entry = entry.with_address(address);
            }
            log.emit_entry(entry)?;
        }
    }

    for cache in &report.unreadable {
        let entry = log
            .entry(LogLevel::Warn, "cache_unreadable")
            .with_address(cache.address)
            .with_details(json!({ "field": cache.field, "reason": cache.reason }));
        log.emit_entry(entry)?;
    }

    if report.directory_stop != DirectoryStop::Completed {
        let entry = log
            .entry(LogLevel::Warn, "directory_incomplete")
            .with_stop_reason(report.directory_stop.label());
        log.emit_entry(entry)?;
    }
    Ok(())
}

fn artifact_names(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect()
}

/// Validate a structured log and return the number of lines checked.
pub fn validate_log(path: &Path) -> Result<usize, HarnessError> {
    let (lines, errors) = crate::structured_log::validate_log_file(path)?;
    if let Some(first) = errors.first() {
        return Err(HarnessError::InvalidArgument(format!(
            "{} invalid field(s) in {}; first: {first}",
            errors.len(),
            path.display()
        )));
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_format_parsing() {
        assert_eq!(OutputFormat::from_str_loose("TEXT"), Some(OutputFormat::Text));
        assert_eq!(OutputFormat::from_str_loose("json"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::from_str_loose("both"), Some(OutputFormat::Both));
        assert_eq!(OutputFormat::from_str_loose("xml"), None);
        assert!(OutputFormat::Both.writes_text() && OutputFormat::Both.writes_json());
        assert!(!OutputFormat::Json.writes_text());
    }

    #[test]
    fn source_description() {
        let src = SnapshotSource::Fixture {
            path: PathBuf::from("a.json"),
        };
        assert_eq!(src.describe(), "fixture:a.json");
    }

    #[test]
    fn missing_fixture_is_an_io_error() {
        let src = SnapshotSource::Fixture {
            path: PathBuf::from("/nonexistent/slabscope/fixture.json"),
        };
        assert!(matches!(
            src.open(),
            Err(HarnessError::Snapshot(SnapshotError::Io(_)))
        ));
    }
}
