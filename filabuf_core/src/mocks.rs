//! Stand-in collaborators for wiring the core without real hardware.

use filabuf_traits::{ConfigStore, RawChannelSample, SampleSource};
use std::error::Error;
use std::sync::{Arc, Mutex};

/// A sample source that always errors; used when a sampler thread owns the
/// real source and frames reach the core through `step_from_frame`.
pub struct DetachedSource;

impl SampleSource for DetachedSource {
    fn poll(&mut self) -> Result<RawChannelSample, Box<dyn Error + Send + Sync>> {
        Err(Box::new(std::io::Error::other("detached sample source")))
    }

    fn self_calibrate(&mut self) -> Result<i16, Box<dyn Error + Send + Sync>> {
        Err(Box::new(std::io::Error::other("detached sample source")))
    }
}

/// Volatile store backed by a shared buffer; clones see the same blob.
#[derive(Clone, Default)]
pub struct MemoryStore {
    blob: Arc<Mutex<Option<Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blob(blob: Vec<u8>) -> Self {
        Self {
            blob: Arc::new(Mutex::new(Some(blob))),
        }
    }

    pub fn contents(&self) -> Option<Vec<u8>> {
        self.blob.lock().ok().and_then(|g| g.clone())
    }
}

impl ConfigStore for MemoryStore {
    fn load(&mut self) -> Result<Option<Vec<u8>>, Box<dyn Error + Send + Sync>> {
        let guard = self
            .blob
            .lock()
            .map_err(|_| std::io::Error::other("memory store poisoned"))?;
        Ok(guard.clone())
    }

    fn save(&mut self, blob: &[u8]) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut guard = self
            .blob
            .lock()
            .map_err(|_| std::io::Error::other("memory store poisoned"))?;
        *guard = Some(blob.to_vec());
        Ok(())
    }
}
