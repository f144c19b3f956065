//! End-to-end slab summary over one snapshot.

use serde::Serialize;

use crate::aggregate::{Aggregator, CacheSummary, WalkAnomaly};
use crate::cache_dir::{CacheDirectory, DirectoryStop, UnreadableCache};
use crate::config::{AnalysisConfig, NodeScope};
use crate::counters::CounterLayout;
use crate::layout::{LayoutError, SlabLayout, max_page_address};
use crate::report::ReportFormatter;
use crate::snapshot::{Address, KernelVersion, SnapshotAccess};

/// Everything one analysis produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlabSummaryReport {
    pub version: KernelVersion,
    pub counter_layout: CounterLayout,
    pub node_scope: NodeScope,
    pub max_page_address: Address,
    /// Rows in directory order.
    pub caches: Vec<CacheSummary>,
    /// Caches without partial slabs.
    pub skipped: usize,
    pub unreadable: Vec<UnreadableCache>,
    pub directory_stop: DirectoryStop,
}

impl SlabSummaryReport {
    /// Legacy fixed-width text.
    #[must_use]
    pub fn to_text(&self) -> String {
        ReportFormatter::new().render(&self.caches)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Caches enumerated, whether or not they produced a row.
    #[must_use]
    pub fn caches_seen(&self) -> usize {
        self.caches.len() + self.skipped + self.unreadable.len()
    }

    /// `(cache name, anomaly)` for every walk that did not finish cleanly.
    pub fn anomalies(&self) -> impl Iterator<Item = (&str, &WalkAnomaly)> {
        self.caches
            .iter()
            .flat_map(|c| c.anomalies.iter().map(move |a| (c.name.as_str(), a)))
    }
}

/// Drives layout resolution, the directory walk and per-cache aggregation.
pub struct SlabSummaryEngine<'a, S: SnapshotAccess + ?Sized> {
    snapshot: &'a S,
    config: AnalysisConfig,
}

impl<'a, S: SnapshotAccess + ?Sized> SlabSummaryEngine<'a, S> {
    pub fn new(snapshot: &'a S, config: AnalysisConfig) -> Self {
        Self { snapshot, config }
    }

    #[must_use]
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Fails only on missing layout metadata; every read problem after that
    /// is folded into the report.
    pub fn run(&self) -> Result<SlabSummaryReport, LayoutError> {
        let layout = SlabLayout::resolve(self.snapshot, self.config.counter_layout)?;
        let bound = match self.config.max_page_address {
            Some(address) => address,
            None => max_page_address(self.snapshot)?,
        };

        let aggregator = Aggregator::new(self.snapshot, &layout, bound);
        let mut directory = CacheDirectory::new(
            self.snapshot,
            &layout,
            self.config.node_scope,
            self.config.name_cap,
        );

        let mut caches = Vec::new();
        let mut skipped = 0;
        let mut unreadable = Vec::new();
        for entry in directory.by_ref() {
            match entry.and_then(|cache| aggregator.summarize(&cache)) {
                Ok(Some(summary)) => caches.push(summary),
                Ok(None) => skipped += 1,
                Err(err) => unreadable.push(err),
            }
        }

        Ok(SlabSummaryReport {
            version: layout.version,
            counter_layout: layout.counter_layout,
            node_scope: self.config.node_scope,
            max_page_address: bound,
            caches,
            skipped,
            unreadable,
            directory_stop: directory.stop().unwrap_or(DirectoryStop::Completed),
        })
    }
}
