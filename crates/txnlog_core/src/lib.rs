//! # txnlog core
//!
//! A single-file, append-only transactional log: the persistence layer
//! behind an in-memory key/value store.
//!
//! Each transaction records a group of Put/Delete mutations against opaque
//! byte keys and values. The log is crash-safe, replayable from any prior
//! transaction id, and supports on-line compaction ([`TxnLog::archive`])
//! plus signed snapshot exchange ([`TxnLog::export`] / [`TxnLog::import`])
//! between nodes sharing a name and middleware configuration.
//!
//! ## Example
//!
//! ```no_run
//! use txnlog_core::{LogResult, TxnLog};
//!
//! fn main() -> LogResult<()> {
//!     let log = TxnLog::open("./data".as_ref(), "users")?;
//!
//!     log.txn(|txn| {
//!         txn.put(b"greeting", b"hello")?;
//!         txn.put(b"name", b"world")
//!     })?;
//!
//!     log.for_each(None, true, |tag, key, value| {
//!         println!("{tag:?}: {key:?} = {value:?}");
//!         Ok(true)
//!     })?;
//!
//!     log.close()
//! }
//! ```
//!
//! ## On-disk layout
//!
//! For a log named `NAME` under directory `DIR`:
//!
//! ```text
//! DIR/NAME.tdb          # active file, appended on every commit
//! DIR/archive/NAME.tdb  # history preceding the last archive boundary
//! DIR/NAME.lock         # advisory single-writer lock
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod dir;
mod error;
mod filter;
mod iter;
mod line;
mod log;
mod middleware;
mod scanner;
mod seal;
mod types;

pub use config::Config;
pub use error::{LogError, LogResult};
pub use iter::{ActionInfo, TxnInfo};
pub use line::LineTag;
pub use log::{Txn, TxnLog};
pub use middleware::{Middleware, MiddlewareChain, PayloadWriter};
pub use scanner::LineScanner;
pub use seal::SEAL_SIZE;
pub use types::{TxnId, TxnIdGen};

#[cfg(feature = "encryption")]
pub use middleware::encryption::{EncryptionKey, EncryptionMiddleware, KEY_SIZE, NONCE_SIZE};
