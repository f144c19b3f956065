//! Command-line harness for slabscope.
//!
//! This crate provides:
//! - Analysis runs: open a core image or synthetic fixture, summarize it, and
//!   write the legacy text report and/or a JSON report.
//! - Structured JSONL logs for every run, including one record per walk that
//!   stopped early.
//! - An artifact index with SHA-256 digests of everything a run wrote.

#![forbid(unsafe_code)]

pub mod runner;
pub mod structured_log;

pub use runner::{HarnessError, OutputFormat, RunArtifacts, RunOptions, SnapshotSource};
pub use structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};
