//! Read-only access to a captured memory snapshot.
//!
//! The analysis engine never talks to a live system. Everything it knows comes
//! through [`SnapshotAccess`], which is passed explicitly into every walker so
//! the engine can run against a real core image ([`ElfCoreSnapshot`]) or a
//! fabricated one ([`MemorySnapshot`]).
//!
//! Addresses are virtual addresses in the captured system. Words are 64-bit
//! little-endian.

pub mod elf_core;
pub mod memory;
pub mod metadata;

pub use elf_core::ElfCoreSnapshot;
pub use memory::{MemorySnapshot, SnapshotFixture};
pub use metadata::{Hex, LayoutMetadata, PageMapGeometry};

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::elf::ElfError;

/// Virtual address inside the snapshot.
pub type Address = u64;

/// Size of a machine word in the snapshot.
pub const WORD_SIZE: u64 = 8;

/// Errors raised by snapshot accessors.
///
/// `Unavailable` is the only variant the walkers expect during traversal; it
/// ends the current walk without failing the analysis. The resolution variants
/// (`UnknownSymbol`, `UnknownField`) mean layout metadata is missing and the
/// engine cannot start.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("address {address:#x} is not backed by the snapshot")]
    Unavailable { address: Address },
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),
    #[error("unknown field '{field}' in '{type_name}'")]
    UnknownField { type_name: String, field: String },
    #[error("no per-cpu offset for cpu {cpu}")]
    NoPerCpuOffset { cpu: usize },
    #[error("page frame {pfn:#x} cannot be mapped to a page descriptor")]
    NoPageMap { pfn: u64 },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("elf: {0}")]
    Elf(#[from] ElfError),
    #[error("metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

impl SnapshotError {
    /// True when the error only means "this address is not in the image".
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::NoPerCpuOffset { .. })
    }
}

/// Result type for snapshot reads.
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Kernel version triple of the captured system.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KernelVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl KernelVersion {
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse `major.minor[.patch]`, ignoring any `-suffix` (e.g. `5.4.210-qgki`).
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let core = raw.trim().split(['-', '+', ' ']).next()?;
        let mut parts = core.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = match parts.next() {
            Some(p) => p.parse().ok()?,
            None => 0,
        };
        Some(Self::new(major, minor, patch))
    }

    /// `(major, minor)` strictly below the given release line.
    ///
    /// A `x.y.z` triple compares greater than the `(x, y)` pair it starts with,
    /// so `4.14.0` is *not* below `(4, 14)`.
    #[must_use]
    pub fn before_release(self, major: u32, minor: u32) -> bool {
        (self.major, self.minor) < (major, minor)
    }

    /// Whole triple at or above `major.minor.patch`.
    #[must_use]
    pub fn at_least(self, major: u32, minor: u32, patch: u32) -> bool {
        self >= Self::new(major, minor, patch)
    }
}

impl fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Byte-addressable view of a frozen memory image plus its type metadata.
pub trait SnapshotAccess {
    /// Read the 64-bit word at `address`.
    fn read_word(&self, address: Address) -> SnapshotResult<u64>;

    /// Read a NUL-terminated string of at most `max_len` bytes.
    fn read_bounded_string(&self, address: Address, max_len: usize) -> SnapshotResult<String>;

    /// Resolve a global symbol to its address.
    fn resolve_symbol_address(&self, name: &str) -> SnapshotResult<Address>;

    /// Resolve the byte offset of `field` inside `type_name` (e.g. `struct page`).
    fn resolve_field_offset(&self, type_name: &str, field: &str) -> SnapshotResult<u64>;

    /// Version of the captured system.
    fn snapshot_version(&self) -> KernelVersion;

    /// Number of logical processors in the captured system.
    fn logical_processor_count(&self) -> usize;

    /// Read the word at `base` inside processor `cpu`'s per-cpu area.
    fn read_per_processor_word(&self, base: Address, cpu: usize) -> SnapshotResult<u64>;

    /// Address of the page descriptor for page frame `pfn`.
    fn pfn_to_page(&self, pfn: u64) -> SnapshotResult<Address>;

    /// Read the low 32 bits of the word at `address`.
    fn read_u32(&self, address: Address) -> SnapshotResult<u32> {
        Ok((self.read_word(address)? & 0xFFFF_FFFF) as u32)
    }
}

/// Parse an address written as decimal or `0x` hex (underscores allowed).
pub fn parse_address(raw: &str) -> Option<Address> {
    let s = raw.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(&hex.replace('_', ""), 16).ok()
    } else {
        s.replace('_', "").parse::<u64>().ok()
    }
}
