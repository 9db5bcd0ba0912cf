//! Pact persistence
//!
//! Two adapters implement [`PactStore`]: one pretty-printed JSON file per
//! pact, or a single binary archive holding every pact. Both replace files
//! by writing a temporary sibling and renaming it.

mod archive;
mod file;
mod format;
mod reader;
mod writer;

pub use archive::ArchivePactStore;
pub use file::FilePactStore;
pub use format::{
    hash_id, FileHeader, PactEntry, ARCHIVE_MAGIC, ARCHIVE_VERSION, HEADER_SIZE, INDEX_ENTRY_SIZE,
};
pub use reader::ArchiveReader;
pub use writer::ArchiveWriter;

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::config::{StorageConfig, StorageKind};
use crate::pact::Pact;
use crate::{ProxyError, Result};

/// Lazily produced pacts
pub type PactIter<'a> = Box<dyn Iterator<Item = Result<Pact>> + Send + 'a>;

/// Persistence of pacts
///
/// Implementations must make `save` atomic: `load` never returns a partially
/// written pact.
pub trait PactStore: Send + Sync {
    /// Load a pact, `None` if it was never saved
    ///
    /// # Errors
    ///
    /// Returns `Storage` on I/O failure and `InvalidFormat`/`CorruptedData`
    /// for unreadable data
    fn load(&self, id: &str) -> Result<Option<Pact>>;

    /// Save a pact, replacing any previous version
    ///
    /// # Errors
    ///
    /// Returns `Storage` on I/O failure
    fn save(&self, pact: &Pact) -> Result<()>;

    /// Iterate over all stored pacts
    ///
    /// Each call starts a new pass.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the location cannot be read
    fn list(&self) -> Result<PactIter<'_>>;

    /// Human readable location, for logs
    fn location(&self) -> String;
}

/// Open the store described by the configuration
///
/// # Errors
///
/// Returns `Config` if the location is missing or unusable
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn PactStore>> {
    if config.location.as_os_str().is_empty() {
        return Err(ProxyError::Config(
            "Storage location is not configured".to_string(),
        ));
    }

    let store: Arc<dyn PactStore> = match config.kind {
        StorageKind::File => Arc::new(FilePactStore::new(&config.location)?),
        StorageKind::Archive => Arc::new(ArchivePactStore::new(&config.location)?),
    };

    info!("Using pact storage at {}", store.location());
    Ok(store)
}

/// Temporary sibling used while replacing `path`
#[must_use]
pub(crate) fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

/// Replace a file's contents atomically
///
/// # Errors
///
/// Returns error if the temporary file cannot be written, synced or renamed
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = temp_path(path);

    let result = (|| -> std::io::Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(storage_error(path, &e));
    }
    Ok(())
}

/// Wrap an I/O failure with the path it happened on
pub(crate) fn storage_error(path: &Path, err: &dyn std::fmt::Display) -> ProxyError {
    ProxyError::Storage(format!("{}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pact::Info;
    use tempfile::TempDir;

    #[test]
    fn test_temp_path() {
        let tmp = temp_path(Path::new("/data/pacts/login.json"));
        assert_eq!(tmp, Path::new("/data/pacts/.login.json.tmp"));
    }

    #[test]
    fn test_write_atomic_replaces() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.json");

        write_atomic(&path, b"old").unwrap();
        write_atomic(&path, b"new").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"new");
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_open_store_kinds() {
        let dir = TempDir::new().unwrap();
        let pact = Pact::new("p", Info {
            base_url: "http://localhost".to_string(),
            tenant: None,
            version: None,
            request_matching: crate::pact::RequestMatching::default(),
        });

        for (kind, location) in [
            (StorageKind::File, dir.path().to_path_buf()),
            (StorageKind::Archive, dir.path().join("pacts.arc")),
        ] {
            let store = open_store(&StorageConfig { kind, location }).unwrap();
            store.save(&pact).unwrap();
            assert_eq!(store.load("p").unwrap(), Some(pact.clone()));
        }

        let unset = StorageConfig::default();
        assert!(matches!(open_store(&unset), Err(ProxyError::Config(_))));
    }
}
