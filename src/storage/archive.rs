//! All pacts in a single binary archive

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use super::{storage_error, ArchiveReader, ArchiveWriter, PactIter, PactStore};
use crate::pact::{validate_pact_id, Pact};
use crate::{ProxyError, Result};

/// Stores every pact in one archive file
///
/// Saving rewrites the whole archive; the index is keyed by the SHA-256 of
/// the pact id.
#[derive(Debug)]
pub struct ArchivePactStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ArchivePactStore {
    /// Create a store for an archive path
    ///
    /// The archive itself is created on the first save.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the parent directory does not exist
    pub fn new(path: &Path) -> Result<Self> {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        if !parent.is_dir() {
            return Err(ProxyError::Config(format!(
                "Archive directory does not exist: {}",
                parent.display()
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    fn open_reader(&self) -> Result<Option<ArchiveReader>> {
        if !self.path.exists() {
            return Ok(None);
        }
        ArchiveReader::open(&self.path)
            .map(Some)
            .map_err(|e| match e {
                ProxyError::Io(io) => storage_error(&self.path, &io),
                other => other,
            })
    }
}

impl PactStore for ArchivePactStore {
    fn load(&self, id: &str) -> Result<Option<Pact>> {
        validate_pact_id(id)?;
        let Some(reader) = self.open_reader()? else {
            return Ok(None);
        };
        let Some(entry) = reader.lookup(id) else {
            return Ok(None);
        };

        let pact: Pact = serde_json::from_slice(reader.read(&entry)?)?;
        debug!("Loaded pact {} from archive {}", id, self.path.display());
        Ok(Some(pact))
    }

    fn save(&self, pact: &Pact) -> Result<()> {
        validate_pact_id(&pact.id)?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| ProxyError::Storage("archive lock poisoned".to_string()))?;

        let mut writer = ArchiveWriter::new();
        if let Some(reader) = self.open_reader()? {
            for entry in reader.entries() {
                writer.add_hashed(entry.id_hash, reader.read(&entry)?.to_vec());
            }
        }
        writer.add(&pact.id, serde_json::to_vec(pact)?);

        writer.write_to(&self.path).map_err(|e| match e {
            ProxyError::Io(io) => storage_error(&self.path, &io),
            other => other,
        })?;

        debug!(
            "Saved pact {} ({} records) to archive {} ({} pacts)",
            pact.id,
            pact.len(),
            self.path.display(),
            writer.len()
        );
        Ok(())
    }

    fn list(&self) -> Result<PactIter<'_>> {
        let Some(reader) = self.open_reader()? else {
            return Ok(Box::new(std::iter::empty()));
        };
        let entries = reader.entries();

        Ok(Box::new(entries.into_iter().map(move |entry| {
            let data = reader.read(&entry)?;
            Ok(serde_json::from_slice::<Pact>(data)?)
        })))
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}
