//! Minimal `ET_CORE` image writer.
//!
//! Produces a header, one `PT_LOAD` program header per segment, and the
//! segment bytes laid out back to back. Used to turn synthetic memory into an
//! image the core reader can open.

use super::{ELF_MAGIC, Elf64Header, Elf64ProgramHeader};

/// Builder for a little-endian ELF64 core image.
#[derive(Debug, Default, Clone)]
pub struct CoreImageBuilder {
    segments: Vec<(u64, Vec<u8>, u64)>,
}

impl CoreImageBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a segment whose file bytes are `bytes` and memory size equals their length.
    pub fn segment(&mut self, vaddr: u64, bytes: &[u8]) -> &mut Self {
        self.segments.push((vaddr, bytes.to_vec(), bytes.len() as u64));
        self
    }

    /// Add a segment with a zero-filled tail past the file bytes.
    pub fn segment_with_memsz(&mut self, vaddr: u64, bytes: &[u8], memsz: u64) -> &mut Self {
        self.segments
            .push((vaddr, bytes.to_vec(), memsz.max(bytes.len() as u64)));
        self
    }

    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        let phnum = self.segments.len();
        let table_end = Elf64Header::SIZE + phnum * Elf64ProgramHeader::SIZE;
        let mut out = vec![0u8; table_end];

        out[0..4].copy_from_slice(&ELF_MAGIC);
        out[4] = 2; // ELFCLASS64
        out[5] = 1; // ELFDATA2LSB
        out[6] = 1;
        out[16..18].copy_from_slice(&4u16.to_le_bytes());
        out[18..20].copy_from_slice(&183u16.to_le_bytes());
        out[20..24].copy_from_slice(&1u32.to_le_bytes());
        out[32..40].copy_from_slice(&(Elf64Header::SIZE as u64).to_le_bytes());
        out[52..54].copy_from_slice(&(Elf64Header::SIZE as u16).to_le_bytes());
        out[54..56].copy_from_slice(&(Elf64ProgramHeader::SIZE as u16).to_le_bytes());
        out[56..58].copy_from_slice(&(phnum as u16).to_le_bytes());

        let mut data_offset = table_end as u64;
        for (i, (vaddr, bytes, memsz)) in self.segments.iter().enumerate() {
            let at = Elf64Header::SIZE + i * Elf64ProgramHeader::SIZE;
            let ph = &mut out[at..at + Elf64ProgramHeader::SIZE];
            ph[0..4].copy_from_slice(&1u32.to_le_bytes());
            ph[4..8].copy_from_slice(&4u32.to_le_bytes());
            ph[8..16].copy_from_slice(&data_offset.to_le_bytes());
            ph[16..24].copy_from_slice(&vaddr.to_le_bytes());
            ph[32..40].copy_from_slice(&(bytes.len() as u64).to_le_bytes());
            ph[40..48].copy_from_slice(&memsz.to_le_bytes());
            data_offset += bytes.len() as u64;
        }
        for (_, bytes, _) in &self.segments {
            out.extend_from_slice(bytes);
        }
        out
    }
}
