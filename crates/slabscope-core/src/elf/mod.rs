//! ELF64 core image container parsing.
//!
//! Captured memory images are commonly stored as `ET_CORE` ELF files: the
//! program header table lists `PT_LOAD` segments, each mapping a range of
//! virtual addresses to a range of file bytes. This module parses just enough
//! of the container to translate a snapshot address to a file offset.
//!
//! Only little-endian ELF64 is accepted.

pub mod builder;
pub mod header;
pub mod program;

pub use builder::CoreImageBuilder;

pub use header::{Elf64Header, ElfMachine, ElfType};
pub use program::{Elf64ProgramHeader, LoadSegment, ProgramType, SegmentHit, parse_program_headers};

/// ELF magic bytes: "\x7fELF"
pub const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// Size of ELF identification array
pub const EI_NIDENT: usize = 16;

/// Error type for ELF container parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElfError {
    /// Invalid ELF magic bytes
    InvalidMagic,
    /// Unsupported ELF class (not ELF64)
    UnsupportedClass(u8),
    /// Unsupported data encoding (not little-endian)
    UnsupportedEncoding(u8),
    /// File is an ELF object but not a core image
    NotCoreImage(ElfType),
    /// Invalid program header offset
    InvalidOffset { kind: &'static str, offset: u64 },
    /// Buffer too small for requested operation
    BufferTooSmall { needed: usize, available: usize },
    /// Image has no loadable segments
    NoLoadSegments,
}

impl core::fmt::Display for ElfError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidMagic => write!(f, "invalid ELF magic"),
            Self::UnsupportedClass(c) => write!(f, "unsupported ELF class: {c}"),
            Self::UnsupportedEncoding(e) => write!(f, "unsupported data encoding: {e}"),
            Self::NotCoreImage(t) => write!(f, "not a core image (e_type {t:?})"),
            Self::InvalidOffset { kind, offset } => {
                write!(f, "invalid {kind} offset: {offset:#x}")
            }
            Self::BufferTooSmall { needed, available } => {
                write!(f, "buffer too small: need {needed}, have {available}")
            }
            Self::NoLoadSegments => write!(f, "core image has no PT_LOAD segments"),
        }
    }
}

impl std::error::Error for ElfError {}

/// Result type for ELF operations.
pub type ElfResult<T> = Result<T, ElfError>;

pub(crate) fn le_u16(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

pub(crate) fn le_u32(data: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(b)
}

pub(crate) fn le_u64(data: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elf_magic() {
        assert_eq!(&ELF_MAGIC, b"\x7fELF");
    }

    #[test]
    fn test_error_display() {
        let err = ElfError::BufferTooSmall {
            needed: 64,
            available: 12,
        };
        assert_eq!(err.to_string(), "buffer too small: need 64, have 12");
        assert_eq!(
            ElfError::NotCoreImage(ElfType::Dyn).to_string(),
            "not a core image (e_type Dyn)"
        );
    }

    #[test]
    fn test_le_readers() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        assert_eq!(le_u16(&data, 0), 0x0201);
        assert_eq!(le_u32(&data, 4), 0x0807_0605);
        assert_eq!(le_u64(&data, 0), 0x0807_0605_0403_0201);
    }
}
