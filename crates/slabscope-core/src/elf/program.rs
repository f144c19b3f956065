//! ELF64 program header parsing and `PT_LOAD` address translation.

use super::{ElfError, ElfResult, le_u32, le_u64};

/// Program header type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramType {
    /// Unused entry
    Null,
    /// Loadable segment (captured memory range)
    Load,
    /// Auxiliary information (registers, process status)
    Note,
    /// Unknown type
    Unknown(u32),
}

impl From<u32> for ProgramType {
    fn from(value: u32) -> Self {
        match value {
            0 => Self::Null,
            1 => Self::Load,
            4 => Self::Note,
            other => Self::Unknown(other),
        }
    }
}

/// ELF64 program header.
#[derive(Debug, Clone, Copy)]
pub struct Elf64ProgramHeader {
    /// Segment type
    pub p_type: ProgramType,
    /// File offset of segment
    pub p_offset: u64,
    /// Virtual address in memory
    pub p_vaddr: u64,
    /// Physical address
    pub p_paddr: u64,
    /// Size in file
    pub p_filesz: u64,
    /// Size in memory (may be larger than filesz)
    pub p_memsz: u64,
}

impl Elf64ProgramHeader {
    /// Size of an ELF64 program header in bytes.
    pub const SIZE: usize = 56;

    /// Parse a program header from a byte slice.
    pub fn parse(data: &[u8]) -> ElfResult<Self> {
        if data.len() < Self::SIZE {
            return Err(ElfError::BufferTooSmall {
                needed: Self::SIZE,
                available: data.len(),
            });
        }

        Ok(Self {
            p_type: ProgramType::from(le_u32(data, 0)),
            p_offset: le_u64(data, 8),
            p_vaddr: le_u64(data, 16),
            p_paddr: le_u64(data, 24),
            p_filesz: le_u64(data, 32),
            p_memsz: le_u64(data, 40),
        })
    }

    /// Check if this is a loadable segment.
    pub fn is_load(&self) -> bool {
        matches!(self.p_type, ProgramType::Load)
    }
}

/// Parse the whole program header table.
pub fn parse_program_headers(
    data: &[u8],
    phoff: u64,
    phentsize: u16,
    phnum: u16,
) -> ElfResult<Vec<Elf64ProgramHeader>> {
    let invalid = ElfError::InvalidOffset {
        kind: "program header table",
        offset: phoff,
    };
    let phoff = usize::try_from(phoff).map_err(|_| invalid.clone())?;
    let phentsize = phentsize as usize;
    let phnum = phnum as usize;
    if phentsize < Elf64ProgramHeader::SIZE && phnum > 0 {
        return Err(invalid);
    }

    let end_offset = phentsize
        .checked_mul(phnum)
        .and_then(|len| phoff.checked_add(len))
        .ok_or(invalid)?;

    if end_offset > data.len() {
        return Err(ElfError::BufferTooSmall {
            needed: end_offset,
            available: data.len(),
        });
    }

    (0..phnum)
        .map(|i| Elf64ProgramHeader::parse(&data[phoff + i * phentsize..]))
        .collect()
}

/// A captured virtual address range and where its bytes live in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSegment {
    pub vaddr: u64,
    pub file_offset: u64,
    pub file_size: u64,
    pub mem_size: u64,
}

/// Where a snapshot address resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentHit {
    /// Backed by file bytes at this offset.
    File(u64),
    /// Inside `memsz` but past `filesz`: reads as zero.
    ZeroFill,
}

impl LoadSegment {
    #[must_use]
    pub fn from_header(ph: &Elf64ProgramHeader) -> Self {
        Self {
            vaddr: ph.p_vaddr,
            file_offset: ph.p_offset,
            file_size: ph.p_filesz,
            mem_size: ph.p_memsz.max(ph.p_filesz),
        }
    }

    #[must_use]
    pub fn contains(&self, address: u64) -> bool {
        address >= self.vaddr && address - self.vaddr < self.mem_size
    }

    /// Translate `address`; `None` when outside the segment or when the file
    /// offset does not fit in a `u64`.
    #[must_use]
    pub fn translate(&self, address: u64) -> Option<SegmentHit> {
        if !self.contains(address) {
            return None;
        }
        let delta = address - self.vaddr;
        if delta < self.file_size {
            self.file_offset.checked_add(delta).map(SegmentHit::File)
        } else {
            Some(SegmentHit::ZeroFill)
        }
    }

    /// Bytes remaining in this segment from `address` on.
    #[must_use]
    pub fn remaining(&self, address: u64) -> u64 {
        self.vaddr.saturating_add(self.mem_size).saturating_sub(address)
    }
}
