//! Structure layout resolved from snapshot metadata.
//!
//! Every field offset the walkers need is looked up once, before any
//! traversal starts. A missing symbol or field is fatal for the run: the
//! engine refuses to produce partial numbers from a half-known layout.

use serde::Serialize;
use thiserror::Error;

use crate::counters::CounterLayout;
use crate::snapshot::{Address, KernelVersion, SnapshotAccess, SnapshotError};

pub const KMEM_CACHE: &str = "struct kmem_cache";
pub const KMEM_CACHE_NODE: &str = "struct kmem_cache_node";
pub const KMEM_CACHE_CPU: &str = "struct kmem_cache_cpu";
pub const PAGE: &str = "struct page";

/// Head of the global cache list.
pub const SLAB_CACHES_SYMBOL: &str = "slab_caches";
/// Highest page frame number.
pub const MAX_PFN_SYMBOL: &str = "max_pfn";

/// Missing layout metadata.
#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("cannot resolve {what}: {source}")]
    Unresolved {
        what: String,
        #[source]
        source: SnapshotError,
    },
    #[error("cannot derive the page descriptor bound: {source}")]
    PageBound {
        #[source]
        source: SnapshotError,
    },
}

fn field<S: SnapshotAccess + ?Sized>(
    snapshot: &S,
    type_name: &str,
    field: &str,
) -> Result<u64, LayoutError> {
    snapshot
        .resolve_field_offset(type_name, field)
        .map_err(|source| LayoutError::Unresolved {
            what: format!("{type_name}.{field}"),
            source,
        })
}

/// Offsets inside `struct kmem_cache`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheFields {
    pub list: u64,
    pub name: u64,
    pub node: u64,
    pub cpu_slab: u64,
    pub oo: u64,
    pub object_size: u64,
    pub size: u64,
}

/// Offsets inside `struct kmem_cache_node`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NodeFields {
    pub partial: u64,
    pub nr_partial: u64,
    pub nr_slabs: u64,
    pub total_objects: u64,
}

/// Everything the walkers need to know about the captured kernel's structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlabLayout {
    pub version: KernelVersion,
    pub cache: CacheFields,
    pub node: NodeFields,
    /// `kmem_cache_cpu.slab` (6.1+) or `kmem_cache_cpu.page`.
    pub cpu_active_page: u64,
    /// `page.lru`: the link used by the partial list.
    pub page_link: u64,
    /// Offset of the packed counters word in `struct page`.
    pub page_counters: u64,
    pub counter_layout: CounterLayout,
    /// Address of the `slab_caches` list head.
    pub cache_list_head: Address,
}

impl SlabLayout {
    /// Resolve all offsets. `counter_override` bypasses version-based selection.
    pub fn resolve<S: SnapshotAccess + ?Sized>(
        snapshot: &S,
        counter_override: Option<CounterLayout>,
    ) -> Result<Self, LayoutError> {
        let version = snapshot.snapshot_version();
        let counter_layout =
            counter_override.unwrap_or_else(|| CounterLayout::for_version(version));

        let cache = CacheFields {
            list: field(snapshot, KMEM_CACHE, "list")?,
            name: field(snapshot, KMEM_CACHE, "name")?,
            node: field(snapshot, KMEM_CACHE, "node")?,
            cpu_slab: field(snapshot, KMEM_CACHE, "cpu_slab")?,
            oo: field(snapshot, KMEM_CACHE, "oo")?,
            object_size: field(snapshot, KMEM_CACHE, "object_size")?,
            size: field(snapshot, KMEM_CACHE, "size")?,
        };
        let node = NodeFields {
            partial: field(snapshot, KMEM_CACHE_NODE, "partial")?,
            nr_partial: field(snapshot, KMEM_CACHE_NODE, "nr_partial")?,
            nr_slabs: field(snapshot, KMEM_CACHE_NODE, "nr_slabs")?,
            total_objects: field(snapshot, KMEM_CACHE_NODE, "total_objects")?,
        };
        let active_field = if version.at_least(6, 1, 0) {
            "slab"
        } else {
            "page"
        };
        let cpu_active_page = field(snapshot, KMEM_CACHE_CPU, active_field)?;
        let page_link = field(snapshot, PAGE, "lru")?;
        let page_counters = field(snapshot, PAGE, counter_layout.field_name())?;

        let cache_list_head = snapshot
            .resolve_symbol_address(SLAB_CACHES_SYMBOL)
            .map_err(|source| LayoutError::Unresolved {
                what: format!("symbol {SLAB_CACHES_SYMBOL}"),
                source,
            })?;

        Ok(Self {
            version,
            cache,
            node,
            cpu_active_page,
            page_link,
            page_counters,
            counter_layout,
            cache_list_head,
        })
    }
}

/// Highest valid page descriptor address: the descriptor of `max_pfn`.
pub fn max_page_address<S: SnapshotAccess + ?Sized>(snapshot: &S) -> Result<Address, LayoutError> {
    let bound = || -> Result<Address, SnapshotError> {
        let max_pfn = snapshot.read_word(snapshot.resolve_symbol_address(MAX_PFN_SYMBOL)?)?;
        snapshot.pfn_to_page(max_pfn)
    };
    bound().map_err(|source| LayoutError::PageBound { source })
}
