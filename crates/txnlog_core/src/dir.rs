//! On-disk layout and advisory locking.
//!
//! A log named `NAME` under directory `DIR` owns:
//!
//! ```text
//! DIR/NAME.tdb          # active file
//! DIR/archive/NAME.tdb  # archive file
//! DIR/NAME.lock         # advisory single-writer lock
//! ```
//!
//! The lock file guards against two processes appending to the same active
//! file; it is advisory, held for the engine's lifetime, and released by
//! the OS when the handle drops.

use crate::error::{LogError, LogResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const DATA_EXT: &str = "tdb";
const LOCK_EXT: &str = "lock";
const ARCHIVE_DIR: &str = "archive";

/// Resolved paths for one logical log.
#[derive(Debug, Clone)]
pub(crate) struct LogDir {
    dir: PathBuf,
    name: String,
}

impl LogDir {
    /// Creates the layout under `dir`, including the archive subdirectory.
    pub(crate) fn create(dir: &Path, name: &str) -> LogResult<Self> {
        fs::create_dir_all(dir.join(ARCHIVE_DIR))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            name: name.to_string(),
        })
    }

    pub(crate) fn active_path(&self) -> PathBuf {
        self.dir.join(format!("{}.{DATA_EXT}", self.name))
    }

    pub(crate) fn archive_path(&self) -> PathBuf {
        self.dir
            .join(ARCHIVE_DIR)
            .join(format!("{}.{DATA_EXT}", self.name))
    }

    pub(crate) fn lock_path(&self) -> PathBuf {
        self.dir.join(format!("{}.{LOCK_EXT}", self.name))
    }

    /// Takes the advisory exclusive lock for this log.
    ///
    /// The returned handle must be kept alive as long as the log is open.
    pub(crate) fn acquire_lock(&self) -> LogResult<File> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.lock_path())?;

        file.try_lock_exclusive().map_err(|_| LogError::Locked {
            name: self.name.clone(),
        })?;

        Ok(file)
    }
}
