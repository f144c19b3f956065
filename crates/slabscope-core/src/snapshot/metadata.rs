//! Externally supplied symbol and type-layout metadata.
//!
//! A core image only carries bytes. Symbol addresses, structure field offsets,
//! the kernel version, per-cpu area offsets and the page-descriptor map come
//! from a JSON document produced by whatever debug-info tooling the caller has.
//!
//! ```json
//! {
//!   "version": "5.4.210",
//!   "per_cpu_offsets": ["0xffffffc0117a0000", "0xffffffc0117b0000"],
//!   "page_map": { "vmemmap_base": "0xfffffffefe000000", "descriptor_size": 64 },
//!   "symbols": { "slab_caches": "0xffffffc011c2d478", "max_pfn": "0xffffffc011f3a0c0" },
//!   "fields": { "struct kmem_cache": { "list": 104, "name": 96 } }
//! }
//! ```
//!
//! Addresses may be written as JSON integers or as decimal/hex strings.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{Address, KernelVersion, SnapshotError, SnapshotResult, parse_address};

/// A `u64` that deserializes from an integer or a `"0x..."` string and
/// serializes as hex text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "HexRepr", into = "HexRepr")]
pub struct Hex(pub u64);

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum HexRepr {
    Int(u64),
    Text(String),
}

impl TryFrom<HexRepr> for Hex {
    type Error = String;

    fn try_from(value: HexRepr) -> Result<Self, Self::Error> {
        match value {
            HexRepr::Int(v) => Ok(Self(v)),
            HexRepr::Text(s) => parse_address(&s)
                .map(Self)
                .ok_or_else(|| format!("invalid address literal: '{s}'")),
        }
    }
}

impl From<Hex> for HexRepr {
    fn from(value: Hex) -> Self {
        Self::Text(format!("{:#x}", value.0))
    }
}

/// Linear map from page frame numbers to page descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMapGeometry {
    pub vmemmap_base: Hex,
    /// `sizeof(struct page)`.
    pub descriptor_size: u64,
}

impl PageMapGeometry {
    #[must_use]
    pub fn new(vmemmap_base: Address, descriptor_size: u64) -> Self {
        Self {
            vmemmap_base: Hex(vmemmap_base),
            descriptor_size,
        }
    }

    pub fn pfn_to_page(&self, pfn: u64) -> SnapshotResult<Address> {
        pfn.checked_mul(self.descriptor_size)
            .and_then(|off| self.vmemmap_base.0.checked_add(off))
            .ok_or(SnapshotError::NoPageMap { pfn })
    }
}

/// Symbol and type-layout metadata for one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutMetadata {
    #[serde(with = "version_text")]
    pub version: KernelVersion,
    #[serde(default)]
    pub per_cpu_offsets: Vec<Hex>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_map: Option<PageMapGeometry>,
    #[serde(default)]
    pub symbols: BTreeMap<String, Hex>,
    /// `type name -> field name -> byte offset`.
    #[serde(default)]
    pub fields: BTreeMap<String, BTreeMap<String, u64>>,
}

impl LayoutMetadata {
    #[must_use]
    pub fn new(version: KernelVersion) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> SnapshotResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> SnapshotResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn symbol(&self, name: &str) -> SnapshotResult<Address> {
        self.symbols
            .get(name)
            .map(|h| h.0)
            .ok_or_else(|| SnapshotError::UnknownSymbol(name.to_string()))
    }

    pub fn field_offset(&self, type_name: &str, field: &str) -> SnapshotResult<u64> {
        self.fields
            .get(type_name)
            .and_then(|fields| fields.get(field))
            .copied()
            .ok_or_else(|| SnapshotError::UnknownField {
                type_name: type_name.to_string(),
                field: field.to_string(),
            })
    }

    pub fn per_cpu_offset(&self, cpu: usize) -> SnapshotResult<u64> {
        self.per_cpu_offsets
            .get(cpu)
            .map(|h| h.0)
            .ok_or(SnapshotError::NoPerCpuOffset { cpu })
    }

    #[must_use]
    pub fn cpu_count(&self) -> usize {
        self.per_cpu_offsets.len()
    }

    pub fn pfn_to_page(&self, pfn: u64) -> SnapshotResult<Address> {
        self.page_map
            .ok_or(SnapshotError::NoPageMap { pfn })?
            .pfn_to_page(pfn)
    }

    pub fn insert_symbol(&mut self, name: impl Into<String>, address: Address) {
        self.symbols.insert(name.into(), Hex(address));
    }

    pub fn insert_field(&mut self, type_name: impl Into<String>, field: impl Into<String>, offset: u64) {
        self.fields
            .entry(type_name.into())
            .or_default()
            .insert(field.into(), offset);
    }
}

mod version_text {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    use super::KernelVersion;

    pub fn serialize<S: Serializer>(v: &KernelVersion, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<KernelVersion, D::Error> {
        let raw = String::deserialize(d)?;
        KernelVersion::parse(&raw)
            .ok_or_else(|| D::Error::custom(format!("invalid kernel version: '{raw}'")))
    }
}
