//! ELF64 file header parsing.

use super::{EI_NIDENT, ELF_MAGIC, ElfError, ElfResult, le_u16, le_u64};

const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;

/// ELF object file type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfType {
    /// No file type
    None,
    /// Relocatable file
    Rel,
    /// Executable file
    Exec,
    /// Shared object file
    Dyn,
    /// Core file
    Core,
    /// Unknown type
    Unknown(u16),
}

impl From<u16> for ElfType {
    fn from(value: u16) -> Self {
        match value {
            0 => Self::None,
            1 => Self::Rel,
            2 => Self::Exec,
            3 => Self::Dyn,
            4 => Self::Core,
            other => Self::Unknown(other),
        }
    }
}

/// Machine architecture of the captured system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfMachine {
    /// ARM
    Arm,
    /// AMD x86-64
    X86_64,
    /// ARM AARCH64
    Aarch64,
    /// RISC-V
    RiscV,
    /// Anything else
    Unknown(u16),
}

impl From<u16> for ElfMachine {
    fn from(value: u16) -> Self {
        match value {
            40 => Self::Arm,
            62 => Self::X86_64,
            183 => Self::Aarch64,
            243 => Self::RiscV,
            other => Self::Unknown(other),
        }
    }
}

/// The parts of the ELF64 header a core image reader needs.
#[derive(Debug, Clone, Copy)]
pub struct Elf64Header {
    pub e_ident: [u8; EI_NIDENT],
    pub e_type: ElfType,
    pub e_machine: ElfMachine,
    /// Program header table file offset
    pub e_phoff: u64,
    /// Program header table entry size
    pub e_phentsize: u16,
    /// Program header table entry count
    pub e_phnum: u16,
}

impl Elf64Header {
    /// Size of an ELF64 header in bytes.
    pub const SIZE: usize = 64;

    /// Parse an ELF64 header from a byte slice.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is short, the magic is wrong, or the
    /// object is not little-endian ELF64.
    pub fn parse(data: &[u8]) -> ElfResult<Self> {
        if data.len() < Self::SIZE {
            return Err(ElfError::BufferTooSmall {
                needed: Self::SIZE,
                available: data.len(),
            });
        }
        if data[0..4] != ELF_MAGIC {
            return Err(ElfError::InvalidMagic);
        }
        if data[EI_CLASS] != ELFCLASS64 {
            return Err(ElfError::UnsupportedClass(data[EI_CLASS]));
        }
        if data[EI_DATA] != ELFDATA2LSB {
            return Err(ElfError::UnsupportedEncoding(data[EI_DATA]));
        }

        let mut e_ident = [0u8; EI_NIDENT];
        e_ident.copy_from_slice(&data[0..EI_NIDENT]);

        Ok(Self {
            e_ident,
            e_type: ElfType::from(le_u16(data, 16)),
            e_machine: ElfMachine::from(le_u16(data, 18)),
            e_phoff: le_u64(data, 32),
            e_phentsize: le_u16(data, 54),
            e_phnum: le_u16(data, 56),
        })
    }

    /// Check if this is a core image.
    pub fn is_core(&self) -> bool {
        matches!(self.e_type, ElfType::Core)
    }

    /// Reject anything that is not `ET_CORE`.
    pub fn validate_core_image(&self) -> ElfResult<()> {
        if !self.is_core() {
            return Err(ElfError::NotCoreImage(self.e_type));
        }
        Ok(())
    }
}
