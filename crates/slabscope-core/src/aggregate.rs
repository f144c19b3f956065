//! Per-cache combination of active-page and partial-list walks.

use serde::Serialize;

use crate::cache_dir::{CacheDescriptor, NodeDescriptor, PAGE_SHIFT, UnreadableCache};
use crate::layout::SlabLayout;
use crate::page_list::{BoundedListWalker, WalkOutcome, WalkStop};
use crate::snapshot::{Address, SnapshotAccess};

/// Which walk an anomaly came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "walk", rename_all = "snake_case")]
pub enum WalkSource {
    ActivePage { cpu: usize },
    PartialList { node: usize },
}

/// A walk that ended for any reason other than a clean finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WalkAnomaly {
    pub source: WalkSource,
    pub stop: WalkStop,
}

/// One report row plus the diagnostics behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheSummary {
    pub name: String,
    pub address: Address,
    pub object_size: u32,
    pub size_with_metadata: u32,
    pub nr_partial: u64,
    pub nr_slabs: u64,
    pub total_free: u64,
    pub total_objects: u64,
    pub total_allocated: u64,
    /// `kmem_cache.oo >> 16`.
    pub page_order: u32,
    /// Processors whose active page was examined before the table ended.
    pub active_cpus: usize,
    pub anomalies: Vec<WalkAnomaly>,
}

impl CacheSummary {
    /// `size_with_metadata * total_objects` in KiB, fractional part kept.
    #[must_use]
    pub fn total_size_kb(&self) -> f64 {
        let bytes = u128::from(self.size_with_metadata) * u128::from(self.total_objects);
        bytes as f64 / 1024.0
    }

    /// Size of one slab in KiB.
    #[must_use]
    pub fn slab_size_kb(&self) -> f64 {
        f64::from(self.page_order + PAGE_SHIFT).exp2() / 1024.0
    }
}

/// Turns a cache descriptor into a [`CacheSummary`].
pub struct Aggregator<'a, S: SnapshotAccess + ?Sized> {
    snapshot: &'a S,
    layout: &'a SlabLayout,
    walker: BoundedListWalker<'a, S>,
    max_page_address: Address,
}

#[derive(Default)]
struct Totals {
    free: u64,
    objects: u64,
    anomalies: Vec<WalkAnomaly>,
}

impl Totals {
    fn add(&mut self, source: WalkSource, outcome: &WalkOutcome) {
        if outcome.stop.is_anomaly() {
            self.anomalies.push(WalkAnomaly {
                source,
                stop: outcome.stop,
            });
        }
        if let Some((free, total)) = outcome.contribution() {
            self.free = self.free.saturating_add(free);
            self.objects = self.objects.saturating_add(total);
        }
    }
}

impl<'a, S: SnapshotAccess + ?Sized> Aggregator<'a, S> {
    pub fn new(snapshot: &'a S, layout: &'a SlabLayout, max_page_address: Address) -> Self {
        Self {
            snapshot,
            layout,
            walker: BoundedListWalker::for_layout(snapshot, layout),
            max_page_address,
        }
    }

    /// `Ok(None)` when no node has partial slabs.
    pub fn summarize(
        &self,
        cache: &CacheDescriptor,
    ) -> Result<Option<CacheSummary>, UnreadableCache> {
        let mut nodes = Vec::with_capacity(cache.nodes.len());
        for &address in &cache.nodes {
            let node = NodeDescriptor::read(self.snapshot, self.layout, address).map_err(|e| {
                UnreadableCache {
                    address: cache.address,
                    field: "node",
                    reason: e.to_string(),
                }
            })?;
            nodes.push(node);
        }

        let nr_partial = nodes
            .iter()
            .fold(0u64, |acc, n| acc.saturating_add(n.nr_partial));
        if nr_partial == 0 {
            return Ok(None);
        }
        let nr_slabs = nodes
            .iter()
            .fold(0u64, |acc, n| acc.saturating_add(n.nr_slabs));

        let mut totals = Totals::default();
        let active_cpus = self.walk_active_pages(cache, &mut totals);
        for (index, node) in nodes.iter().enumerate() {
            let outcome =
                self.walker
                    .walk(node.partial_head, self.layout.page_link, self.max_page_address);
            totals.add(WalkSource::PartialList { node: index }, &outcome);
        }

        Ok(Some(CacheSummary {
            name: cache.name.clone(),
            address: cache.address,
            object_size: cache.object_size,
            size_with_metadata: cache.size_with_metadata,
            nr_partial,
            nr_slabs,
            total_free: totals.free,
            total_objects: totals.objects,
            total_allocated: totals.objects.saturating_sub(totals.free),
            page_order: cache.page_order(),
            active_cpus,
            anomalies: totals.anomalies,
        }))
    }

    /// Walk each processor's active page until the first null table entry.
    fn walk_active_pages(&self, cache: &CacheDescriptor, totals: &mut Totals) -> usize {
        let mut walked = 0;
        for cpu in 0..self.snapshot.logical_processor_count() {
            let entry = match self.snapshot.read_per_processor_word(cache.cpu_slab, cpu) {
                Ok(0) => break,
                Ok(entry) => entry,
                Err(_) => {
                    totals.anomalies.push(WalkAnomaly {
                        source: WalkSource::ActivePage { cpu },
                        stop: WalkStop::Unavailable {
                            address: cache.cpu_slab,
                        },
                    });
                    break;
                }
            };
            walked += 1;
            let root = entry.wrapping_add(self.layout.cpu_active_page);
            let outcome = self.walker.walk_single(root, self.max_page_address);
            totals.add(WalkSource::ActivePage { cpu }, &outcome);
        }
        walked
    }
}
