//! Snapshot backed by an ELF64 core image on disk.
//!
//! Images are usually far larger than memory, so bytes are read on demand in
//! 4 KiB file pages through a bounded cache. The file handle and cache sit
//! behind a `parking_lot::Mutex` so reads can go through `&self`.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use parking_lot::Mutex;

use super::{
    Address, KernelVersion, LayoutMetadata, SnapshotAccess, SnapshotError, SnapshotResult,
};
use crate::elf::{Elf64Header, ElfError, LoadSegment, SegmentHit, parse_program_headers};

const CACHE_PAGE: u64 = 4096;
const CACHE_LIMIT: usize = 4096;

struct ImageReader {
    file: File,
    /// File length at open time.
    len: u64,
    pages: HashMap<u64, Vec<u8>>,
}

impl ImageReader {
    fn page(&mut self, index: u64) -> std::io::Result<&[u8]> {
        if self.pages.len() >= CACHE_LIMIT && !self.pages.contains_key(&index) {
            self.pages.clear();
        }
        if !self.pages.contains_key(&index) {
            self.file.seek(SeekFrom::Start(index * CACHE_PAGE))?;
            let mut buf = Vec::with_capacity(CACHE_PAGE as usize);
            (&mut self.file).take(CACHE_PAGE).read_to_end(&mut buf)?;
            self.pages.insert(index, buf);
        }
        Ok(self.pages.get(&index).map(Vec::as_slice).unwrap_or_default())
    }

    /// Copy `out.len()` file bytes starting at `offset`. `false` on a short file.
    fn read_at(&mut self, offset: u64, out: &mut [u8]) -> std::io::Result<bool> {
        let mut done = 0usize;
        while done < out.len() {
            let Some(pos) = offset.checked_add(done as u64) else {
                return Ok(false);
            };
            if pos >= self.len {
                return Ok(false);
            }
            let in_page = (pos % CACHE_PAGE) as usize;
            let page = self.page(pos / CACHE_PAGE)?;
            if page.len() <= in_page {
                return Ok(false);
            }
            let n = (page.len() - in_page).min(out.len() - done);
            out[done..done + n].copy_from_slice(&page[in_page..in_page + n]);
            done += n;
        }
        Ok(true)
    }
}

/// Read-only snapshot over a core image plus its layout metadata.
pub struct ElfCoreSnapshot {
    layout: LayoutMetadata,
    segments: Vec<LoadSegment>,
    reader: Mutex<ImageReader>,
}

impl std::fmt::Debug for ElfCoreSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElfCoreSnapshot")
            .field("version", &self.layout.version)
            .field("segments", &self.segments.len())
            .finish_non_exhaustive()
    }
}

impl ElfCoreSnapshot {
    /// Open `image` and index its `PT_LOAD` segments.
    pub fn open(image: &Path, layout: LayoutMetadata) -> SnapshotResult<Self> {
        let mut file = File::open(image)?;
        let len = file.metadata()?.len();

        let mut head = Vec::with_capacity(Elf64Header::SIZE);
        (&mut file)
            .take(Elf64Header::SIZE as u64)
            .read_to_end(&mut head)?;
        let header = Elf64Header::parse(&head)?;
        header.validate_core_image()?;

        let table_len = u64::from(header.e_phentsize) * u64::from(header.e_phnum);
        file.seek(SeekFrom::Start(header.e_phoff))?;
        let mut table = Vec::new();
        (&mut file).take(table_len).read_to_end(&mut table)?;
        let headers = parse_program_headers(&table, 0, header.e_phentsize, header.e_phnum)?;

        let mut segments: Vec<LoadSegment> = headers
            .iter()
            .filter(|ph| ph.is_load() && ph.p_memsz > 0)
            .map(LoadSegment::from_header)
            .collect();
        if segments.is_empty() {
            return Err(ElfError::NoLoadSegments.into());
        }
        segments.sort_by_key(|s| s.vaddr);

        Ok(Self {
            layout,
            segments,
            reader: Mutex::new(ImageReader {
                file,
                len,
                pages: HashMap::new(),
            }),
        })
    }

    /// Open an image and its JSON layout document.
    pub fn open_with_metadata(image: &Path, metadata: &Path) -> SnapshotResult<Self> {
        Self::open(image, LayoutMetadata::from_file(metadata)?)
    }

    #[must_use]
    pub fn segments(&self) -> &[LoadSegment] {
        &self.segments
    }

    #[must_use]
    pub fn layout(&self) -> &LayoutMetadata {
        &self.layout
    }

    fn segment_for(&self, address: Address) -> Option<&LoadSegment> {
        let idx = self.segments.partition_point(|s| s.vaddr <= address);
        idx.checked_sub(1)
            .map(|i| &self.segments[i])
            .filter(|s| s.contains(address))
    }

    /// Fill `out` with snapshot bytes starting at `address`.
    pub fn read_bytes(&self, address: Address, out: &mut [u8]) -> SnapshotResult<()> {
        let mut done = 0usize;
        while done < out.len() {
            let cur = address
                .checked_add(done as u64)
                .ok_or(SnapshotError::Unavailable { address })?;
            let seg = self
                .segment_for(cur)
                .ok_or(SnapshotError::Unavailable { address: cur })?;
            let want = seg.remaining(cur).min((out.len() - done) as u64);
            match seg.translate(cur) {
                Some(SegmentHit::File(offset)) => {
                    let in_file = seg.file_size - (cur - seg.vaddr);
                    let n = want.min(in_file) as usize;
                    let ok = self.reader.lock().read_at(offset, &mut out[done..done + n])?;
                    if !ok {
                        return Err(SnapshotError::Unavailable { address: cur });
                    }
                    done += n;
                }
                Some(SegmentHit::ZeroFill) => {
                    let n = want as usize;
                    out[done..done + n].fill(0);
                    done += n;
                }
                None => return Err(SnapshotError::Unavailable { address: cur }),
            }
        }
        Ok(())
    }
}

impl SnapshotAccess for ElfCoreSnapshot {
    fn read_word(&self, address: Address) -> SnapshotResult<u64> {
        let mut buf = [0u8; 8];
        self.read_bytes(address, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn read_bounded_string(&self, address: Address, max_len: usize) -> SnapshotResult<String> {
        let mut bytes = Vec::with_capacity(max_len);
        for i in 0..max_len as u64 {
            let mut b = [0u8; 1];
            match self.read_bytes(address.wrapping_add(i), &mut b) {
                Ok(()) if b[0] == 0 => break,
                Ok(()) => bytes.push(b[0]),
                Err(e) if i == 0 => return Err(e),
                Err(_) => break,
            }
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
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
