//! Pact archive writer

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use bytemuck::bytes_of;
use memmap2::MmapMut;

use super::format::{hash_id, header_crc, FileHeader, PactEntry, HEADER_SIZE, INDEX_ENTRY_SIZE};
use super::temp_path;
use crate::{ProxyError, Result};

/// Builds a complete archive and writes it in one step
#[derive(Debug, Default)]
pub struct ArchiveWriter {
    pacts: Vec<([u8; 32], Vec<u8>)>,
}

impl ArchiveWriter {
    /// Create an empty writer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add serialized pact data, replacing data previously added under the same id
    pub fn add(&mut self, id: &str, data: Vec<u8>) {
        self.add_hashed(hash_id(id), data);
    }

    /// Add pact data under an already hashed id
    pub fn add_hashed(&mut self, id_hash: [u8; 32], data: Vec<u8>) {
        match self.pacts.iter_mut().find(|(hash, _)| *hash == id_hash) {
            Some(existing) => existing.1 = data,
            None => self.pacts.push((id_hash, data)),
        }
    }

    /// Number of pacts added
    #[must_use]
    pub fn len(&self) -> usize {
        self.pacts.len()
    }

    /// Check if no pacts were added
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pacts.is_empty()
    }

    /// Write the archive to a temporary file and rename it over `path`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be created, mapped, synced or renamed
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let mut header = FileHeader {
            pact_count: self.pacts.len() as u64,
            created_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_nanos() as u64),
            ..FileHeader::default()
        };

        let data_offset = header
            .data_offset()
            .ok_or_else(|| ProxyError::InvalidFormat("Too many pacts for one archive".to_string()))?;
        let data_size: u64 = self.pacts.iter().map(|(_, data)| data.len() as u64).sum();
        let total_size = data_offset + data_size;

        let tmp = temp_path(path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        file.set_len(total_size)?;

        let mut mmap = unsafe { MmapMut::map_mut(&file)? };

        let mut index_offset = header.index_offset as usize;
        let mut offset = data_offset;
        for (id_hash, data) in &self.pacts {
            let entry = PactEntry {
                id_hash: *id_hash,
                offset,
                size: data.len() as u64,
                crc: crc32fast::hash(data),
                reserved: [0; 12],
            };
            mmap[index_offset..index_offset + INDEX_ENTRY_SIZE].copy_from_slice(bytes_of(&entry));

            let start = offset as usize;
            mmap[start..start + data.len()].copy_from_slice(data);

            index_offset += INDEX_ENTRY_SIZE;
            offset += data.len() as u64;
        }

        header.header_crc = 0;
        header.header_crc = header_crc(bytes_of(&header));
        mmap[..HEADER_SIZE].copy_from_slice(bytes_of(&header));

        mmap.flush()?;
        drop(mmap);
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_archive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.arc");

        let writer = ArchiveWriter::new();
        assert!(writer.is_empty());
        writer.write_to(&path).unwrap();

        assert_eq!(fs::metadata(&path).unwrap().len(), HEADER_SIZE as u64);
    }

    #[test]
    fn test_add_replaces_same_id() {
        let mut writer = ArchiveWriter::new();
        writer.add("a", b"one".to_vec());
        writer.add("b", b"two".to_vec());
        writer.add("a", b"three".to_vec());

        assert_eq!(writer.len(), 2);
        assert_eq!(writer.pacts[0].1, b"three");
    }

    #[test]
    fn test_no_temp_file_left() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pacts.arc");

        let mut writer = ArchiveWriter::new();
        writer.add("a", b"{}".to_vec());
        writer.write_to(&path).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("pacts.arc")]);
    }
}
