//! # slabscope-core
//!
//! Post-mortem summary of SLUB partial slabs from a captured memory image.
//!
//! The engine reads a frozen snapshot through [`SnapshotAccess`], walks the
//! `slab_caches` directory, and for every cache with partial slabs sums the
//! free and total objects found on each processor's active page and on the
//! node partial list. Every pointer is treated as untrusted: list walks are
//! bounded and report why they stopped instead of failing. No `unsafe` code
//! is permitted at the crate level.

#![deny(unsafe_code)]

pub mod aggregate;
pub mod cache_dir;
pub mod config;
pub mod counters;
pub mod elf;
pub mod engine;
pub mod layout;
pub mod page_list;
pub mod report;
pub mod snapshot;

pub use aggregate::{Aggregator, CacheSummary, WalkAnomaly, WalkSource};
pub use cache_dir::{CacheDescriptor, CacheDirectory, DirectoryStop, NodeDescriptor, UnreadableCache};
pub use config::{AnalysisConfig, NodeScope};
pub use counters::{CounterLayout, PageCounters};
pub use engine::{SlabSummaryEngine, SlabSummaryReport};
pub use layout::{LayoutError, SlabLayout};
pub use page_list::{BoundedListWalker, WalkOutcome, WalkStop};
pub use report::{JSON_REPORT_FILE_NAME, REPORT_FILE_NAME, ReportFormatter};
pub use snapshot::{
    Address, ElfCoreSnapshot, KernelVersion, LayoutMetadata, MemorySnapshot, SnapshotAccess,
    SnapshotError, SnapshotFixture,
};
