//! Error types for the log engine.

use std::io;
use thiserror::Error;

/// Result type for log operations.
pub type LogResult<T> = Result<T, LogError>;

/// Errors that can occur in log operations.
#[derive(Debug, Error)]
pub enum LogError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] txnlog_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An unknown line tag or corrupt length prefix was encountered.
    #[error("invalid line: {message}")]
    InvalidLine {
        /// Description of the framing problem.
        message: String,
    },

    /// No transactions are available.
    ///
    /// Returned when a log holds no committed transaction, and by
    /// [`export`](crate::TxnLog::export) when the requested anchor is
    /// already the current last transaction.
    #[error("no transactions available")]
    NoTxn,

    /// The requested anchor transaction was not found in either file.
    #[error("transaction not found: {tid}")]
    InvalidTxn {
        /// The anchor id that failed to match.
        tid: String,
    },

    /// The log was used after [`close`](crate::TxnLog::close).
    #[error("log is closed")]
    Closed,

    /// Import signature verification failed.
    #[error("import stream signature mismatch")]
    MacMismatch,

    /// Another process holds the advisory lock for this log.
    #[error("log locked: another process has exclusive access to {name}")]
    Locked {
        /// The logical log name.
        name: String,
    },

    /// A middleware transform failed.
    #[error("middleware error: {message}")]
    Middleware {
        /// Description of the failure.
        message: String,
    },
}

impl LogError {
    /// Creates an invalid line error.
    pub fn invalid_line(message: impl Into<String>) -> Self {
        Self::InvalidLine {
            message: message.into(),
        }
    }

    /// Creates an invalid transaction error.
    pub fn invalid_txn(tid: impl Into<String>) -> Self {
        Self::InvalidTxn { tid: tid.into() }
    }

    /// Creates a middleware error.
    pub fn middleware(message: impl Into<String>) -> Self {
        Self::Middleware {
            message: message.into(),
        }
    }
}
