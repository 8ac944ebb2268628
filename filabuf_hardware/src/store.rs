//! File-backed single-blob store.

use std::error::Error;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use filabuf_traits::ConfigStore;

use crate::error::{HwError, Result};

/// Write `bytes` next to `path` and rename over it, so a crash mid-write
/// leaves the previous blob intact.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("new");
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(tmp, path)?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn store_err(&self, op: &str, e: &dyn std::fmt::Display) -> HwError {
        HwError::Store(format!("{op} {}: {e}", self.path.display()))
    }
}

impl ConfigStore for FileStore {
    fn load(&mut self) -> std::result::Result<Option<Vec<u8>>, Box<dyn Error + Send + Sync>> {
        match fs::read(&self.path) {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.store_err("read", &e).into()),
        }
    }

    fn save(&mut self, blob: &[u8]) -> std::result::Result<(), Box<dyn Error + Send + Sync>> {
        write_atomic(&self.path, blob).map_err(|e| self.store_err("write", &e))?;
        tracing::debug!(path = %self.path.display(), bytes = blob.len(), "state blob written");
        Ok(())
    }
}
