//! Packed per-page object counters.
//!
//! SLUB keeps a slab page's object accounting in one 32-bit word:
//!
//! ```text
//!  31 30             16 15              0
//! +--+-----------------+-----------------+
//! |F |     objects     |      inuse      |
//! +--+-----------------+-----------------+
//! ```
//!
//! Older kernels overlay the word on `struct page::_mapcount`; newer ones
//! expose it as the generic `counters` field. The layout is chosen once per
//! analysis from the snapshot version, never per page.

use serde::{Deserialize, Serialize};

use crate::snapshot::KernelVersion;

const INUSE_MASK: u32 = 0x0000_FFFF;
const OBJECTS_SHIFT: u32 = 16;
const OBJECTS_MASK: u32 = 0x0000_7FFF;
const FROZEN_BIT: u32 = 1 << 31;

/// Where the packed counters live in a page descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterLayout {
    /// Counters overlaid on the narrow `_mapcount` field (before 4.14).
    Legacy,
    /// Counters in the unified `counters` word.
    Unified,
}

impl CounterLayout {
    /// Select the layout for a captured kernel.
    #[must_use]
    pub fn for_version(version: KernelVersion) -> Self {
        if version.before_release(4, 14) {
            Self::Legacy
        } else {
            Self::Unified
        }
    }

    /// `struct page` field holding the packed word.
    #[must_use]
    pub const fn field_name(self) -> &'static str {
        match self {
            Self::Legacy => "_mapcount",
            Self::Unified => "counters",
        }
    }

    #[must_use]
    pub fn from_str_loose(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "legacy" | "mapcount" | "_mapcount" => Some(Self::Legacy),
            "unified" | "counters" => Some(Self::Unified),
            _ => None,
        }
    }

    /// Split a packed word into its counts.
    #[must_use]
    pub fn decode(self, word: u32) -> PageCounters {
        match self {
            Self::Legacy => PageCounters {
                inuse: word & INUSE_MASK,
                objects: (word >> OBJECTS_SHIFT) & OBJECTS_MASK,
                frozen: word & FROZEN_BIT != 0,
            },
            Self::Unified => {
                let inuse = word & INUSE_MASK;
                let rest = word >> OBJECTS_SHIFT;
                PageCounters {
                    inuse,
                    objects: rest & OBJECTS_MASK,
                    frozen: rest >> 15 != 0,
                }
            }
        }
    }
}

/// Decoded counts for one slab page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageCounters {
    pub inuse: u32,
    pub objects: u32,
    /// Page is owned by a cpu and off the node lists.
    pub frozen: bool,
}

impl PageCounters {
    /// Free objects on this page, only when `inuse < objects`.
    ///
    /// A page claiming as many or more objects in use than it holds counts as
    /// nothing at all: neither free nor total.
    #[must_use]
    pub fn free_objects(&self) -> Option<u32> {
        (self.inuse < self.objects).then(|| self.objects - self.inuse)
    }
}
