//! Binary archive structures

use bytemuck::{Pod, Zeroable};
use sha2::{Digest, Sha256};

/// Archive magic bytes: "PACTARC\0"
pub const ARCHIVE_MAGIC: [u8; 8] = *b"PACTARC\0";

/// Current archive version
pub const ARCHIVE_VERSION: u32 = 1;

/// Archive header size
pub const HEADER_SIZE: usize = 64;

/// Index entry size
pub const INDEX_ENTRY_SIZE: usize = 64;

/// Header bytes covered before the CRC field
pub(crate) const HEADER_CRC_START: usize = 12;

/// First header byte covered after the CRC field
pub(crate) const HEADER_CRC_END: usize = 16;

/// Archive header (64 bytes)
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C, align(64))]
pub struct FileHeader {
    /// Magic bytes for format identification
    pub magic: [u8; 8],

    /// Format version
    pub version: u32,

    /// CRC32 of header (excluding this field)
    pub header_crc: u32,

    /// Number of pacts stored
    pub pact_count: u64,

    /// Offset to the first index entry
    pub index_offset: u64,

    /// Creation timestamp (Unix epoch nanoseconds)
    pub created_at: u64,

    /// Reserved for future use
    pub reserved: [u8; 24],
}

static_assertions::const_assert_eq!(std::mem::size_of::<FileHeader>(), HEADER_SIZE);
static_assertions::const_assert_eq!(std::mem::align_of::<FileHeader>(), 64);

/// Index entry for a single pact (64 bytes)
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C, align(64))]
pub struct PactEntry {
    /// Pact id hash (SHA-256)
    pub id_hash: [u8; 32],

    /// Offset to the pact JSON
    pub offset: u64,

    /// Size of the pact JSON
    pub size: u64,

    /// CRC32 of the pact JSON
    pub crc: u32,

    /// Reserved for future use
    pub reserved: [u8; 12],
}

static_assertions::const_assert_eq!(std::mem::size_of::<PactEntry>(), INDEX_ENTRY_SIZE);
static_assertions::const_assert_eq!(std::mem::align_of::<PactEntry>(), 64);

impl Default for FileHeader {
    fn default() -> Self {
        Self {
            magic: ARCHIVE_MAGIC,
            version: ARCHIVE_VERSION,
            header_crc: 0,
            pact_count: 0,
            index_offset: HEADER_SIZE as u64,
            created_at: 0,
            reserved: [0; 24],
        }
    }
}

impl FileHeader {
    /// Offset of the first byte after the index, `None` on overflow
    #[must_use]
    pub fn data_offset(&self) -> Option<u64> {
        self.pact_count
            .checked_mul(INDEX_ENTRY_SIZE as u64)
            .and_then(|len| self.index_offset.checked_add(len))
    }
}

/// Hash a pact id for the index
#[must_use]
pub fn hash_id(id: &str) -> [u8; 32] {
    Sha256::digest(id.as_bytes()).into()
}

/// CRC32 of a serialized header, skipping the CRC field
#[must_use]
pub fn header_crc(bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&bytes[..HEADER_CRC_START]);
    hasher.update(&bytes[HEADER_CRC_END..HEADER_SIZE]);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_size() {
        assert_eq!(std::mem::size_of::<FileHeader>(), 64);
        assert_eq!(std::mem::align_of::<FileHeader>(), 64);
    }

    #[test]
    fn test_index_entry_size() {
        assert_eq!(std::mem::size_of::<PactEntry>(), 64);
    }

    #[test]
    fn test_default_header() {
        let header = FileHeader::default();
        assert_eq!(header.magic, ARCHIVE_MAGIC);
        assert_eq!(header.version, ARCHIVE_VERSION);
        assert_eq!(header.pact_count, 0);
        assert_eq!(header.data_offset(), Some(HEADER_SIZE as u64));

        let huge = FileHeader {
            pact_count: u64::MAX,
            ..FileHeader::default()
        };
        assert!(huge.data_offset().is_none());
    }

    #[test]
    fn test_header_crc_skips_crc_field() {
        let mut header = FileHeader::default();
        let before = header_crc(bytemuck::bytes_of(&header));

        header.header_crc = 0xDEAD_BEEF;
        assert_eq!(header_crc(bytemuck::bytes_of(&header)), before);

        header.pact_count = 3;
        assert_ne!(header_crc(bytemuck::bytes_of(&header)), before);
    }

    #[test]
    fn test_hash_id_is_stable() {
        assert_eq!(hash_id("login__works"), hash_id("login__works"));
        assert_ne!(hash_id("login__works"), hash_id("login__fails"));
    }
}
