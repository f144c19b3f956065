//! In-memory snapshot for synthetic images and tests.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{
    Address, Hex, KernelVersion, LayoutMetadata, PageMapGeometry, SnapshotAccess, SnapshotError,
    SnapshotResult,
};

/// Sparse word-addressed snapshot.
///
/// Only explicitly written words exist; every other address reads as
/// unavailable. Strings live in their own map and are returned verbatim
/// (subject to the caller's length cap).
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshot {
    layout: LayoutMetadata,
    words: BTreeMap<Address, u64>,
    strings: BTreeMap<Address, String>,
}

impl MemorySnapshot {
    #[must_use]
    pub fn new(version: KernelVersion) -> Self {
        Self {
            layout: LayoutMetadata::new(version),
            words: BTreeMap::new(),
            strings: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn from_layout(layout: LayoutMetadata) -> Self {
        Self {
            layout,
            words: BTreeMap::new(),
            strings: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn layout(&self) -> &LayoutMetadata {
        &self.layout
    }

    /// Register one per-cpu area offset per logical processor.
    pub fn set_per_cpu_offsets(&mut self, offsets: &[u64]) -> &mut Self {
        self.layout.per_cpu_offsets = offsets.iter().copied().map(Hex).collect();
        self
    }

    pub fn set_page_map(&mut self, vmemmap_base: Address, descriptor_size: u64) -> &mut Self {
        self.layout.page_map = Some(PageMapGeometry::new(vmemmap_base, descriptor_size));
        self
    }

    pub fn define_symbol(&mut self, name: &str, address: Address) -> &mut Self {
        self.layout.insert_symbol(name, address);
        self
    }

    pub fn define_field(&mut self, type_name: &str, field: &str, offset: u64) -> &mut Self {
        self.layout.insert_field(type_name, field, offset);
        self
    }

    pub fn write_word(&mut self, address: Address, value: u64) -> &mut Self {
        self.words.insert(address, value);
        self
    }

    pub fn write_string(&mut self, address: Address, text: &str) -> &mut Self {
        self.strings.insert(address, text.to_string());
        self
    }

    /// Number of words currently stored.
    #[must_use]
    pub fn word_count(&self) -> usize {
        self.words.len()
    }
}

impl SnapshotAccess for MemorySnapshot {
    fn read_word(&self, address: Address) -> SnapshotResult<u64> {
        self.words
            .get(&address)
            .copied()
            .ok_or(SnapshotError::Unavailable { address })
    }

    fn read_bounded_string(&self, address: Address, max_len: usize) -> SnapshotResult<String> {
        let text = self
            .strings
            .get(&address)
            .ok_or(SnapshotError::Unavailable { address })?;
        let text = text.split('\0').next().unwrap_or_default();
        let cut = text
            .char_indices()
            .map(|(i, c)| i + c.len_utf8())
            .take_while(|&end| end <= max_len)
            .last()
            .unwrap_or(0);
        Ok(text[..cut].to_string())
    }

    fn resolve_symbol_address(&self, name: &str) -> SnapshotResult<Address> {
        self.layout.symbol(name)
    }

    fn resolve_field_offset(&self, type_name: &str, field: &str) -> SnapshotResult<u64> {
        self.layout.field_offset(type_name, field)
    }

    fn snapshot_version(&self) -> KernelVersion {
        self.layout.version
    }

    fn logical_processor_count(&self) -> usize {
        self.layout.cpu_count()
    }

    fn read_per_processor_word(&self, base: Address, cpu: usize) -> SnapshotResult<u64> {
        let offset = self.layout.per_cpu_offset(cpu)?;
        self.read_word(base.wrapping_add(offset))
    }

    fn pfn_to_page(&self, pfn: u64) -> SnapshotResult<Address> {
        self.layout.pfn_to_page(pfn)
    }
}

/// One stored word in a [`SnapshotFixture`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordCell {
    pub address: Hex,
    pub value: Hex,
}

/// One stored string in a [`SnapshotFixture`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StringCell {
    pub address: Hex,
    pub text: String,
}

/// JSON description of a synthetic snapshot: layout metadata plus memory cells.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotFixture {
    #[serde(flatten)]
    pub layout: LayoutMetadata,
    #[serde(default)]
    pub words: Vec<WordCell>,
    #[serde(default)]
    pub strings: Vec<StringCell>,
}

impl SnapshotFixture {
    pub fn from_json(json: &str) -> SnapshotResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> SnapshotResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    #[must_use]
    pub fn into_snapshot(self) -> MemorySnapshot {
        let mut snap = MemorySnapshot::from_layout(self.layout);
        for cell in self.words {
            snap.write_word(cell.address.0, cell.value.0);
        }
        for cell in self.strings {
            snap.write_string(cell.address.0, &cell.text);
        }
        snap
    }
}
