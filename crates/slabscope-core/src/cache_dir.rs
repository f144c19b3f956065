//! Enumeration of slab caches from the global `slab_caches` list.
//!
//! The directory is trusted more than the page lists: it is walked on address
//! equality with the head. It still ends cleanly on a null or unreadable link,
//! and on a repeated descriptor, so a torn image cannot hang the run.

use std::collections::HashSet;

use serde::Serialize;
use thiserror::Error;

use crate::config::NodeScope;
use crate::layout::SlabLayout;
use crate::snapshot::{Address, SnapshotAccess, SnapshotError, SnapshotResult, WORD_SIZE};

/// Page order lives in the high bits of `kmem_cache.oo`.
pub const OO_SHIFT: u32 = 16;
pub const PAGE_SHIFT: u32 = 12;

/// A cache whose descriptor could not be decoded. The directory walk goes on.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("cache descriptor at {address:#x}: cannot read {field}: {reason}")]
pub struct UnreadableCache {
    pub address: Address,
    pub field: &'static str,
    pub reason: String,
}

impl UnreadableCache {
    fn new(address: Address, field: &'static str, err: &SnapshotError) -> Self {
        Self {
            address,
            field,
            reason: err.to_string(),
        }
    }
}

/// Static fields of one `struct kmem_cache`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheDescriptor {
    pub address: Address,
    pub name: String,
    pub object_size: u32,
    pub size_with_metadata: u32,
    pub oo: u32,
    /// Base of the per-cpu `kmem_cache_cpu` table.
    pub cpu_slab: Address,
    /// Per-node descriptor addresses, in node order. Null entries are dropped.
    pub nodes: Vec<Address>,
}

impl CacheDescriptor {
    #[must_use]
    pub fn page_order(&self) -> u32 {
        self.oo >> OO_SHIFT
    }

    /// Size of one slab in KiB. Infinite once the order leaves the `f64` range.
    #[must_use]
    pub fn slab_size_kb(&self) -> f64 {
        f64::from(self.page_order() + PAGE_SHIFT).exp2() / 1024.0
    }
}

/// Counters of one `struct kmem_cache_node`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NodeDescriptor {
    pub address: Address,
    /// Address of the embedded partial list head.
    pub partial_head: Address,
    pub nr_partial: u64,
    pub nr_slabs: u64,
    /// As recorded by the kernel; the summary recomputes its own total.
    pub total_objects: u64,
}

impl NodeDescriptor {
    pub fn read<S: SnapshotAccess + ?Sized>(
        snapshot: &S,
        layout: &SlabLayout,
        address: Address,
    ) -> SnapshotResult<Self> {
        let f = &layout.node;
        Ok(Self {
            address,
            partial_head: address.wrapping_add(f.partial),
            nr_partial: snapshot.read_word(address.wrapping_add(f.nr_partial))?,
            nr_slabs: snapshot.read_word(address.wrapping_add(f.nr_slabs))?,
            total_objects: snapshot.read_word(address.wrapping_add(f.total_objects))?,
        })
    }
}

/// Why the directory walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DirectoryStop {
    Completed,
    /// A link (or the head) was null or unreadable.
    Broken { address: Address },
    Cycle { address: Address },
}

impl DirectoryStop {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Broken { .. } => "broken",
            Self::Cycle { .. } => "cycle",
        }
    }
}

/// Lazy iterator over the cache directory.
pub struct CacheDirectory<'a, S: SnapshotAccess + ?Sized> {
    snapshot: &'a S,
    layout: &'a SlabLayout,
    scope: NodeScope,
    name_cap: usize,
    /// Link field of the previously yielded descriptor.
    cursor: Option<Address>,
    seen: HashSet<Address>,
    stop: Option<DirectoryStop>,
}

impl<'a, S: SnapshotAccess + ?Sized> CacheDirectory<'a, S> {
    pub fn new(snapshot: &'a S, layout: &'a SlabLayout, scope: NodeScope, name_cap: usize) -> Self {
        Self {
            snapshot,
            layout,
            scope,
            name_cap,
            cursor: None,
            seen: HashSet::new(),
            stop: None,
        }
    }

    #[must_use]
    pub fn stop(&self) -> Option<DirectoryStop> {
        self.stop
    }

    fn finish<T>(&mut self, stop: DirectoryStop) -> Option<T> {
        self.stop = Some(stop);
        None
    }

    fn decode(&self, address: Address) -> Result<CacheDescriptor, UnreadableCache> {
        let f = &self.layout.cache;
        let word = |field: &'static str, offset: u64| {
            self.snapshot
                .read_word(address.wrapping_add(offset))
                .map_err(|e| UnreadableCache::new(address, field, &e))
        };
        let half = |field: &'static str, offset: u64| {
            self.snapshot
                .read_u32(address.wrapping_add(offset))
                .map_err(|e| UnreadableCache::new(address, field, &e))
        };

        let name_ptr = word("name", f.name)?;
        let name = self
            .snapshot
            .read_bounded_string(name_ptr, self.name_cap)
            .map_err(|e| UnreadableCache::new(address, "name", &e))?;

        let mut nodes = Vec::new();
        for index in self.scope.node_indices() {
            let slot = f.node.wrapping_add(WORD_SIZE * index as u64);
            let node = word("node", slot)?;
            if node != 0 {
                nodes.push(node);
            }
        }
        if nodes.is_empty() {
            return Err(UnreadableCache {
                address,
                field: "node",
                reason: "no per-node descriptor".to_string(),
            });
        }

        Ok(CacheDescriptor {
            address,
            name,
            object_size: half("object_size", f.object_size)?,
            size_with_metadata: half("size", f.size)?,
            oo: half("oo", f.oo)?,
            cpu_slab: word("cpu_slab", f.cpu_slab)?,
            nodes,
        })
    }
}

impl<S: SnapshotAccess + ?Sized> Iterator for CacheDirectory<'_, S> {
    type Item = Result<CacheDescriptor, UnreadableCache>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.stop.is_some() {
            return None;
        }
        let head = self.layout.cache_list_head;
        let from = self.cursor.unwrap_or(head);
        let link = match self.snapshot.read_word(from) {
            Ok(0) | Err(_) => return self.finish(DirectoryStop::Broken { address: from }),
            Ok(link) => link,
        };
        if link == head {
            return self.finish(DirectoryStop::Completed);
        }
        if !self.seen.insert(link) {
            return self.finish(DirectoryStop::Cycle { address: link });
        }
        self.cursor = Some(link);
        Some(self.decode(link.wrapping_sub(self.layout.cache.list)))
    }
}
