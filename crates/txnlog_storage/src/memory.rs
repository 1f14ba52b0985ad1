//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

/// An in-memory byte store.
///
/// Suitable for unit tests, crash-state simulations (via
/// [`with_data`](MemoryBackend::with_data)), and ephemeral logs that do not
/// need persistence.
///
/// # Example
///
/// ```rust
/// use txnlog_storage::{MemoryBackend, StorageBackend};
///
/// let mut backend = MemoryBackend::new();
/// let offset = backend.append(b"abc").unwrap();
/// assert_eq!(offset, 0);
/// assert_eq!(backend.len().unwrap(), 3);
/// ```
#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: RwLock<Vec<u8>>,
}

impl MemoryBackend {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with existing bytes.
    ///
    /// Useful for reproducing on-disk states (truncated tails, crash
    /// leftovers) without touching the filesystem.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Returns a copy of the stored bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl StorageBackend for MemoryBackend {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> StorageResult<usize> {
        let data = self.data.read();
        let size = data.len() as u64;
        if offset > size {
            return Err(StorageError::ReadPastEnd { offset, size });
        }

        let start = offset as usize;
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn len(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&mut self, new_len: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        if new_len > data.len() as u64 {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "cannot truncate to {} bytes, store holds {}",
                    new_len,
                    data.len()
                ),
            )));
        }
        data.truncate(new_len as usize);
        Ok(())
    }
}
