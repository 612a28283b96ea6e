pub mod atomic;

use std::fs;
use std::io;
use std::path::PathBuf;

use tracing::debug;

use crate::error::{InvoiceError, Result};
use crate::store::atomic::{Publish, write_with};

/// Opaque-key file storage behind invoice records.
pub trait BlobStore {
    fn save(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// `Ok(None)` when no blob exists under `key`.
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

impl BlobStore for FsBlobStore {
    fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        write_with(&path, bytes, Publish::CreateNew)?;
        debug!(key, bytes = bytes.len(), "blob saved");
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(key, "blob already absent");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn validate_key(key: &str) -> Result<()> {
    let single_component = !key.is_empty()
        && key != "."
        && key != ".."
        && !key.contains(['/', '\\'])
        && !key.contains('\0');
    if single_component {
        Ok(())
    } else {
        Err(InvoiceError::validation(format!("invalid blob key `{key}`")))
    }
}
