//! Pact archive reader

use std::fs::File;
use std::path::Path;

use bytemuck::pod_read_unaligned;
use memmap2::Mmap;

use super::format::{hash_id, header_crc, FileHeader, PactEntry, ARCHIVE_MAGIC, ARCHIVE_VERSION, HEADER_SIZE, INDEX_ENTRY_SIZE};
use crate::{ProxyError, Result};

/// Reader for pact archives
pub struct ArchiveReader {
    _file: File,
    mmap: Mmap,
    header: FileHeader,
}

impl ArchiveReader {
    /// Open an existing archive
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened or mapped, or is not a valid archive
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;

        if file.metadata()?.len() < HEADER_SIZE as u64 {
            return Err(ProxyError::InvalidFormat(
                "File too small to contain header".to_string(),
            ));
        }

        let mmap = unsafe { Mmap::map(&file)? };
        let header: FileHeader = pod_read_unaligned(&mmap[..HEADER_SIZE]);

        if header.magic != ARCHIVE_MAGIC {
            return Err(ProxyError::InvalidFormat(format!(
                "Invalid magic bytes: expected {:?}, got {:?}",
                ARCHIVE_MAGIC, header.magic
            )));
        }

        if header.version != ARCHIVE_VERSION {
            return Err(ProxyError::InvalidFormat(format!(
                "Unsupported version: {}, expected {}",
                header.version, ARCHIVE_VERSION
            )));
        }

        let computed_crc = header_crc(&mmap[..HEADER_SIZE]);
        if header.header_crc != computed_crc {
            return Err(ProxyError::CorruptedData {
                offset: 0,
                expected: header.header_crc,
                actual: computed_crc,
            });
        }

        match header.data_offset() {
            Some(end) if end <= mmap.len() as u64 => {}
            Some(end) => {
                return Err(ProxyError::InvalidFormat(format!(
                    "Index extends beyond file: {end} > {}",
                    mmap.len()
                )));
            }
            None => {
                return Err(ProxyError::InvalidFormat(format!(
                    "Index size overflows: {} entries at {}",
                    header.pact_count, header.index_offset
                )));
            }
        }

        Ok(Self {
            _file: file,
            mmap,
            header,
        })
    }

    /// Get the number of pacts in this archive
    #[must_use]
    pub fn pact_count(&self) -> u64 {
        self.header.pact_count
    }

    /// Creation timestamp (Unix epoch nanoseconds)
    #[must_use]
    pub fn created_at(&self) -> u64 {
        self.header.created_at
    }

    /// Lookup a pact by id
    #[must_use]
    pub fn lookup(&self, id: &str) -> Option<PactEntry> {
        let id_hash = hash_id(id);
        self.entries().into_iter().find(|e| e.id_hash == id_hash)
    }

    /// Get all index entries in archive order
    ///
    /// `open` checked that the whole index lies inside the file.
    #[must_use]
    pub fn entries(&self) -> Vec<PactEntry> {
        let index_start = self.header.index_offset as usize;

        (0..self.header.pact_count as usize)
            .map(|i| {
                let offset = index_start + i * INDEX_ENTRY_SIZE;
                pod_read_unaligned(&self.mmap[offset..offset + INDEX_ENTRY_SIZE])
            })
            .collect()
    }

    /// Read and verify the JSON of one pact
    ///
    /// # Errors
    ///
    /// Returns error if the entry points outside the file or its CRC does not match
    pub fn read(&self, entry: &PactEntry) -> Result<&[u8]> {
        let range = entry
            .offset
            .checked_add(entry.size)
            .filter(|end| *end <= self.mmap.len() as u64)
            .and_then(|end| Some(usize::try_from(entry.offset).ok()?..usize::try_from(end).ok()?));

        let Some(range) = range else {
            return Err(ProxyError::InvalidFormat(format!(
                "Pact data at {} ({} bytes) extends beyond file of {} bytes",
                entry.offset,
                entry.size,
                self.mmap.len()
            )));
        };

        let data = &self.mmap[range];
        let actual = crc32fast::hash(data);
        if actual != entry.crc {
            return Err(ProxyError::CorruptedData {
                offset: entry.offset,
                expected: entry.crc,
                actual,
            });
        }

        Ok(data)
    }
}
