use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Persistence contract for the partition watermark.
pub trait WatermarkStore: Send + Sync {
    /// Returns the persisted watermark, or `default` when none was persisted.
    fn load(&self, default: f64) -> Result<f64, WatermarkError>;

    fn persist(&self, watermark: f64) -> Result<(), WatermarkError>;

    /// Removes any persisted watermark. Deleting a missing watermark succeeds.
    fn delete(&self) -> Result<(), WatermarkError>;
}

/// Errors raised by watermark stores.
#[derive(Debug, Error)]
pub enum WatermarkError {
    #[error("failed to {action} watermark file {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("watermark file {path} holds {len} bytes, expected 8")]
    Corrupt { path: PathBuf, len: usize },
}

/// Stores the watermark as a big-endian `f64` in a single file.
///
/// Writes go to a sibling temp file that is synced and then renamed over the target.
#[derive(Debug, Clone)]
pub struct FileWatermarkStore {
    path: PathBuf,
}

impl FileWatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn io_error(&self, action: &'static str, source: io::Error) -> WatermarkError {
        WatermarkError::Io {
            action,
            path: self.path.clone(),
            source,
        }
    }
}

impl WatermarkStore for FileWatermarkStore {
    fn load(&self, default: f64) -> Result<f64, WatermarkError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(default),
            Err(err) => return Err(self.io_error("read", err)),
        };
        let raw: [u8; 8] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| WatermarkError::Corrupt {
                path: self.path.clone(),
                len: bytes.len(),
            })?;
        Ok(f64::from_be_bytes(raw))
    }

    fn persist(&self, watermark: f64) -> Result<(), WatermarkError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| self.io_error("create directory for", err))?;
        }
        let temp = self.temp_path();
        let mut file = File::create(&temp).map_err(|err| self.io_error("create", err))?;
        file.write_all(&watermark.to_be_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|err| self.io_error("write", err))?;
        fs::rename(&temp, &self.path).map_err(|err| self.io_error("rename", err))
    }

    fn delete(&self) -> Result<(), WatermarkError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.io_error("delete", err)),
        }
    }
}

/// In-memory store; clones share state so callers can observe what was persisted.
#[derive(Debug, Clone, Default)]
pub struct MemoryWatermarkStore {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    value: Option<f64>,
    persist_count: u64,
    delete_count: u64,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a persisted watermark.
    pub fn with_value(value: f64) -> Self {
        let store = Self::default();
        store.state.lock().value = Some(value);
        store
    }

    pub fn value(&self) -> Option<f64> {
        self.state.lock().value
    }

    pub fn persist_count(&self) -> u64 {
        self.state.lock().persist_count
    }

    pub fn delete_count(&self) -> u64 {
        self.state.lock().delete_count
    }
}

impl WatermarkStore for MemoryWatermarkStore {
    fn load(&self, default: f64) -> Result<f64, WatermarkError> {
        Ok(self.state.lock().value.unwrap_or(default))
    }

    fn persist(&self, watermark: f64) -> Result<(), WatermarkError> {
        let mut state = self.state.lock();
        state.value = Some(watermark);
        state.persist_count += 1;
        Ok(())
    }

    fn delete(&self) -> Result<(), WatermarkError> {
        let mut state = self.state.lock();
        state.value = None;
        state.delete_count += 1;
        Ok(())
    }
}
