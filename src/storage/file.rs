//! One JSON file per pact

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{storage_error, write_atomic, PactIter, PactStore};
use crate::pact::{validate_pact_id, Pact};
use crate::{ProxyError, Result};

const EXTENSION: &str = "json";

/// Stores each pact as `<dir>/<id>.json`
#[derive(Debug, Clone)]
pub struct FilePactStore {
    dir: PathBuf,
}

impl FilePactStore {
    /// Create a store over an existing directory
    ///
    /// # Errors
    ///
    /// Returns `Config` if the directory does not exist
    pub fn new(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(ProxyError::Config(format!(
                "Storage directory does not exist: {}",
                dir.display()
            )));
        }
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// File holding a pact
    ///
    /// # Errors
    ///
    /// Returns `InvalidPactId` for ids that are not safe file names
    pub fn path_for(&self, id: &str) -> Result<PathBuf> {
        validate_pact_id(id)?;
        Ok(self.dir.join(format!("{id}.{EXTENSION}")))
    }
}

fn read_pact(path: &Path) -> Result<Pact> {
    let bytes = fs::read(path).map_err(|e| storage_error(path, &e))?;
    serde_json::from_slice(&bytes).map_err(|e| {
        ProxyError::InvalidFormat(format!("{}: {e}", path.display()))
    })
}

fn is_pact_file(path: &Path) -> bool {
    let visible = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| !n.starts_with('.'));
    visible && path.extension().is_some_and(|ext| ext == EXTENSION) && path.is_file()
}

impl PactStore for FilePactStore {
    fn load(&self, id: &str) -> Result<Option<Pact>> {
        let path = self.path_for(id)?;
        match fs::metadata(&path) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_error(&path, &e)),
        }

        debug!("Loading pact {} from {}", id, path.display());
        read_pact(&path).map(Some)
    }

    fn save(&self, pact: &Pact) -> Result<()> {
        let path = self.path_for(&pact.id)?;
        let json = serde_json::to_vec_pretty(pact)?;
        write_atomic(&path, &json)?;

        debug!(
            "Saved pact {} ({} records) to {}",
            pact.id,
            pact.len(),
            path.display()
        );
        Ok(())
    }

    fn list(&self) -> Result<PactIter<'_>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| storage_error(&self.dir, &e))?;
        let dir = self.dir.clone();

        Ok(Box::new(entries.filter_map(move |entry| match entry {
            Ok(entry) => {
                let path = entry.path();
                is_pact_file(&path).then(|| read_pact(&path))
            }
            Err(e) => Some(Err(storage_error(&dir, &e))),
        })))
    }

    fn location(&self) -> String {
        self.dir.display().to_string()
    }
}
