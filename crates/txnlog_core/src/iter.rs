//! Per-transaction aggregation for `for_each_txn`.

use crate::error::LogResult;
use crate::line::LineTag;
use crate::types::TxnId;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Aggregated view of one transaction group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnInfo {
    /// Transaction id (a Replay opener contributes its recorded id).
    pub id: String,
    /// Commit timestamp in unix seconds, derived from the id.
    pub ts: i64,
    /// Mutations in the order the transaction issued them.
    pub actions: Vec<ActionInfo>,
}

/// One mutation inside a transaction group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionInfo {
    /// `true` for Put, `false` for Delete.
    pub put: bool,
    /// The mutated key.
    pub key: Vec<u8>,
    /// The value for a Put; empty for a Delete.
    pub value: Vec<u8>,
}

/// Folds delivered lines into [`TxnInfo`] groups.
///
/// Every Transaction or Replay opener flushes the group in progress to the
/// callback and starts a fresh one; a final [`finish`](Self::finish)
/// flushes the trailing group. A Replay opener aggregates like a
/// transaction with whatever Put/Delete lines follow it.
pub(crate) struct TxnAccumulator<F> {
    f: F,
    current: Option<TxnInfo>,
    stopped: bool,
}

impl<F> TxnAccumulator<F>
where
    F: FnMut(TxnInfo) -> LogResult<bool>,
{
    pub(crate) fn new(f: F) -> Self {
        Self {
            f,
            current: None,
            stopped: false,
        }
    }

    /// Handles a delivered Transaction or Replay line.
    ///
    /// Returns `Ok(false)` when the callback requested early exit.
    pub(crate) fn open(&mut self, key: &[u8]) -> LogResult<bool> {
        if !self.flush()? {
            return Ok(false);
        }

        match TxnId::parse_bytes(key) {
            Some(id) => {
                self.current = Some(TxnInfo {
                    id: id.to_string(),
                    ts: id.unix_seconds().unwrap_or_default(),
                    actions: Vec::new(),
                });
            }
            None => {
                // A group opener that fails to parse cannot anchor actions.
                warn!(key = ?String::from_utf8_lossy(key), "unparseable transaction id in opener");
                self.current = None;
            }
        }

        Ok(true)
    }

    /// Appends a delivered Put/Delete to the group in progress.
    pub(crate) fn action(&mut self, tag: LineTag, key: &[u8], value: &[u8]) {
        if let Some(info) = self.current.as_mut() {
            info.actions.push(ActionInfo {
                put: tag == LineTag::Put,
                key: key.to_vec(),
                value: value.to_vec(),
            });
        }
    }

    /// Flushes the trailing group at end of input.
    pub(crate) fn finish(&mut self) -> LogResult<()> {
        self.flush().map(|_| ())
    }

    fn flush(&mut self) -> LogResult<bool> {
        if self.stopped {
            return Ok(false);
        }

        if let Some(info) = self.current.take() {
            if !(self.f)(info)? {
                self.stopped = true;
                return Ok(false);
            }
        }

        Ok(true)
    }
}
