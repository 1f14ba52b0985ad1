//! File-based storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A persistent byte store backed by a single file.
///
/// The file is opened read-write and never shrinks except through
/// [`truncate`](StorageBackend::truncate). The current length is cached so
/// appends and length queries do not stat the file; the cache is correct
/// because the backend is the only writer of its file.
///
/// # Durability
///
/// - `flush()` pushes buffered data to the OS
/// - `sync()` calls `File::sync_all()` so data survives power loss
///
/// # Thread safety
///
/// Positioned reads share one seek cursor guarded by a mutex, so concurrent
/// readers serialize per syscall but never observe each other's positions.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: Mutex<File>,
    size: Mutex<u64>,
}

impl FileBackend {
    /// Opens or creates a file store at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            size: Mutex::new(size),
        })
    }

    /// Opens or creates a file store, creating parent directories first.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the file cannot
    /// be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> StorageResult<usize> {
        let size = *self.size.lock();
        if offset > size {
            return Err(StorageError::ReadPastEnd { offset, size });
        }

        let available = (size - offset) as usize;
        let n = buf.len().min(available);
        if n == 0 {
            return Ok(0);
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf[..n])?;
        Ok(n)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut file = self.file.lock();
        let mut size = self.size.lock();

        let offset = *size;
        if !data.is_empty() {
            file.seek(SeekFrom::End(0))?;
            file.write_all(data)?;
            *size += data.len() as u64;
        }

        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.file.lock().flush()?;
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }

    fn len(&self) -> StorageResult<u64> {
        Ok(*self.size.lock())
    }

    fn truncate(&mut self, new_len: u64) -> StorageResult<()> {
        let file = self.file.lock();
        let mut size = self.size.lock();

        if new_len > *size {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("cannot truncate to {} bytes, file holds {}", new_len, *size),
            )));
        }

        file.set_len(new_len)?;
        file.sync_all()?;
        *size = new_len;
        Ok(())
    }
}
