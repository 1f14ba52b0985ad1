//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A read started beyond the end of the store.
    #[error("read beyond end of storage: offset {offset}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The current store size.
        size: u64,
    },
}
