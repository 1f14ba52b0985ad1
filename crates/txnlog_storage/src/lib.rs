//! # txnlog storage
//!
//! Byte-store backends for the txnlog transaction log.
//!
//! Backends are **opaque byte stores**: they read, append, truncate, and
//! flush bytes without any knowledge of the line format layered on top.
//! All framing lives in `txnlog_core`.
//!
//! ## Available backends
//!
//! - [`FileBackend`] - persistent storage using OS file APIs
//! - [`MemoryBackend`] - in-memory storage for tests and ephemeral logs
//!
//! ## Example
//!
//! ```rust
//! use txnlog_storage::{MemoryBackend, StorageBackend};
//!
//! let mut backend = MemoryBackend::new();
//! backend.append(b"hello world").unwrap();
//!
//! let mut buf = [0u8; 16];
//! let n = backend.read_at(6, &mut buf).unwrap();
//! assert_eq!(&buf[..n], b"world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::MemoryBackend;
