//! The log engine.
//!
//! [`TxnLog`] owns an active file and an archive file and preserves one
//! linear history across them. Commits follow a scratch-buffer discipline:
//! a transaction's lines are staged in memory and reach the active file in
//! a single append, so a failing transaction body leaves no trace and a
//! crash can at worst leave one partial trailing line, which the next open
//! truncates away.
//!
//! ## Locking
//!
//! One reader/writer lock guards the file pair and the scratch state.
//! `txn`, `comment`, `archive`, `import`, and `close` hold it exclusively;
//! the iteration family, `export`, and `last_txn` share it, so readers run
//! concurrently and always observe a consistent prefix.

use crate::config::Config;
use crate::dir::LogDir;
use crate::error::{LogError, LogResult};
use crate::filter::MatchFilter;
use crate::iter::{TxnAccumulator, TxnInfo};
use crate::line::{self, LineTag, LINE_END};
use crate::middleware::MiddlewareChain;
use crate::scanner::LineScanner;
use crate::seal::{self, SealWriter};
use crate::types::{TxnId, TxnIdGen};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, warn};
use txnlog_storage::{FileBackend, StorageBackend};

/// Block size for file-to-file copies.
const COPY_BLOCK: usize = 4096;

/// An append-only transactional log.
///
/// See the [crate docs](crate) for the on-disk layout and an example.
pub struct TxnLog {
    name: String,
    chain: MiddlewareChain,
    config: Config,
    inner: RwLock<Inner>,
    /// Id of the most recently committed transaction.
    last_commit: RwLock<Option<TxnId>>,
}

struct Inner {
    active: Box<dyn StorageBackend>,
    archive: Box<dyn StorageBackend>,
    /// Scratch buffer for staged lines; flushed or discarded as a unit.
    buf: Vec<u8>,
    idgen: TxnIdGen,
    closed: bool,
    /// Advisory lock handle, held for the engine's lifetime.
    _lock: Option<File>,
}

/// Write handle passed to [`TxnLog::txn`] and [`TxnLog::archive`] bodies.
///
/// The handle borrows the engine's scratch buffer and dies with the
/// callback; it cannot escape, so mutations can never bypass the commit
/// discipline.
pub struct Txn<'a> {
    buf: &'a mut Vec<u8>,
    chain: &'a MiddlewareChain,
}

impl Txn<'_> {
    /// Stages a Put of `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the middleware chain fails.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> LogResult<()> {
        write_line(self.buf, LineTag::Put, key, value, Some(self.chain))
    }

    /// Stages a Delete of `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the middleware chain fails.
    pub fn delete(&mut self, key: &[u8]) -> LogResult<()> {
        write_line(self.buf, LineTag::Delete, key, &[], Some(self.chain))
    }
}

/// Per-scan source and boundary selection.
#[derive(Debug, Clone, Copy)]
struct ScanOpts {
    /// Scan the archive file before the active file.
    include_archive: bool,
    /// After an archive pass, consume the snapshot group at the head of
    /// the active file instead of re-delivering it.
    resume_at_boundary: bool,
    /// For unanchored scans, start at the last Replay marker.
    anchor_last_replay: bool,
}

impl ScanOpts {
    /// Options for the `for_each` family.
    fn iterate(include_archive: bool) -> Self {
        Self {
            include_archive,
            resume_at_boundary: true,
            anchor_last_replay: true,
        }
    }

    /// Options for `export`: ship raw history verbatim.
    fn export(include_archive: bool) -> Self {
        Self {
            include_archive,
            resume_at_boundary: false,
            anchor_last_replay: false,
        }
    }
}

impl TxnLog {
    /// Opens (creating if absent) the log named `name` under `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Locked`] if another process holds the log, or an
    /// error if the files cannot be opened or repaired.
    pub fn open(dir: &Path, name: &str) -> LogResult<Self> {
        Self::open_with(dir, name, Config::default(), MiddlewareChain::new())
    }

    /// Opens a log with explicit configuration and middleware.
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub fn open_with(
        dir: &Path,
        name: &str,
        config: Config,
        middleware: MiddlewareChain,
    ) -> LogResult<Self> {
        let layout = LogDir::create(dir, name)?;
        let lock = layout.acquire_lock()?;
        let active = Box::new(FileBackend::open(&layout.active_path())?);
        let archive = Box::new(FileBackend::open(&layout.archive_path())?);
        Self::build(name, active, archive, config, middleware, Some(lock))
    }

    /// Builds a log over arbitrary byte stores.
    ///
    /// Intended for embedding and tests (in-memory engines, simulated crash
    /// states). No advisory lock is taken; the caller owns exclusivity.
    ///
    /// # Errors
    ///
    /// Returns an error if recovery on the given stores fails.
    pub fn with_backends(
        name: &str,
        active: Box<dyn StorageBackend>,
        archive: Box<dyn StorageBackend>,
        config: Config,
        middleware: MiddlewareChain,
    ) -> LogResult<Self> {
        Self::build(name, active, archive, config, middleware, None)
    }

    fn build(
        name: &str,
        mut active: Box<dyn StorageBackend>,
        mut archive: Box<dyn StorageBackend>,
        config: Config,
        middleware: MiddlewareChain,
        lock: Option<File>,
    ) -> LogResult<Self> {
        repair_tail(active.as_mut())?;
        repair_tail(archive.as_mut())?;

        let last = last_txn_on_disk(active.as_ref())?;
        debug!(name, last = ?last.map(|t| t.to_string()), "opened log");

        Ok(Self {
            name: name.to_string(),
            chain: middleware,
            config,
            inner: RwLock::new(Inner {
                active,
                archive,
                buf: Vec::new(),
                idgen: TxnIdGen::with_floor(last.as_ref()),
                closed: false,
                _lock: lock,
            }),
            last_commit: RwLock::new(last),
        })
    }

    /// Returns the logical log name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs `f` as a transaction.
    ///
    /// All mutations staged by `f` become visible atomically when `f`
    /// returns `Ok`; if `f` errors, nothing is appended and the error is
    /// returned unchanged.
    ///
    /// # Errors
    ///
    /// Propagates errors from `f` and from the commit flush.
    pub fn txn<F>(&self, f: F) -> LogResult<()>
    where
        F: FnOnce(&mut Txn<'_>) -> LogResult<()>,
    {
        let mut inner = self.write_inner()?;
        let id = inner.idgen.next();

        inner.buf.clear();
        write_line(
            &mut inner.buf,
            LineTag::Transaction,
            id.to_string().as_bytes(),
            &[],
            None,
        )?;

        {
            let Inner { buf, .. } = &mut *inner;
            let mut handle = Txn {
                buf,
                chain: &self.chain,
            };
            if let Err(e) = f(&mut handle) {
                inner.buf.clear();
                return Err(e);
            }
        }

        self.commit(&mut inner)?;
        *self.last_commit.write() = Some(id);
        Ok(())
    }

    /// Appends a single comment line.
    ///
    /// Comments are ignored by data iteration and bypass middleware; they
    /// neither open nor extend a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the append or flush fails.
    pub fn comment(&self, b: &[u8]) -> LogResult<()> {
        let mut inner = self.write_inner()?;
        inner.buf.clear();
        write_line(&mut inner.buf, LineTag::Comment, b, &[], None)?;
        self.commit(&mut inner)
    }

    /// Archives the current active file.
    ///
    /// The entire active history is appended to the archive file, the
    /// active file restarts with a Replay marker recording the pre-archive
    /// last transaction id, and `populate` re-expresses the current logical
    /// state as the marker's record group.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::NoTxn`] if nothing has ever been committed, or
    /// propagates errors from `populate` and the file shuffle.
    pub fn archive<F>(&self, populate: F) -> LogResult<()>
    where
        F: FnOnce(&mut Txn<'_>) -> LogResult<()>,
    {
        let mut inner = self.write_inner()?;
        let last = (*self.last_commit.read()).ok_or(LogError::NoTxn)?;
        debug!(last = %last, "archiving");

        inner.buf.clear();
        write_line(
            &mut inner.buf,
            LineTag::Replay,
            last.to_string().as_bytes(),
            &[],
            None,
        )?;

        {
            let Inner { buf, .. } = &mut *inner;
            let mut handle = Txn {
                buf,
                chain: &self.chain,
            };
            if let Err(e) = populate(&mut handle) {
                inner.buf.clear();
                return Err(e);
            }
        }

        let Inner {
            active,
            archive,
            buf,
            ..
        } = &mut *inner;

        // Ship history to the archive, minus a leading Replay marker that
        // only restated what the archive already ends with.
        let skip = leading_replay_end(active.as_ref())?;
        let total = active.len()?;
        let mut offset = skip;
        let mut block = [0u8; COPY_BLOCK];
        while offset < total {
            let want = block.len().min((total - offset) as usize);
            let n = active.read_at(offset, &mut block[..want])?;
            if n == 0 {
                break;
            }
            archive.append(&block[..n])?;
            offset += n as u64;
        }
        archive.sync()?;

        // From here on the active file is authoritative; a crash before the
        // final sync leaves the old content in place on next open.
        active.truncate(0)?;
        active.append(buf)?;
        active.sync()?;
        buf.clear();
        Ok(())
    }

    /// Iterates decoded Put/Delete records after the anchor transaction.
    ///
    /// `tid == None` replays the current logical state: the active file
    /// from its last Replay marker onward. An anchored iteration delivers
    /// everything committed *after* the anchor, pulling from the archive
    /// when `archive` is `true` and the anchor predates the active file.
    ///
    /// The callback returns `Ok(false)` to stop early without error.
    ///
    /// # Errors
    ///
    /// Propagates callback errors and framing errors.
    pub fn for_each<F>(&self, tid: Option<&TxnId>, archive: bool, mut f: F) -> LogResult<()>
    where
        F: FnMut(LineTag, &[u8], &[u8]) -> LogResult<bool>,
    {
        let inner = self.read_inner()?;
        let include_archive = archive && !self.in_current(&inner, tid)?;
        debug!(tid = ?tid.map(ToString::to_string), archive, include_archive, "for_each");

        let chain = &self.chain;
        self.scan(
            &inner,
            tid,
            ScanOpts::iterate(include_archive),
            &mut |tag, line| {
                if !tag.is_data() {
                    return Ok(true);
                }
                deliver_decoded(chain, tag, &line[1..], &mut f)
            },
        )?;
        Ok(())
    }

    /// Iterates raw lines (tag byte included) after the anchor transaction.
    ///
    /// Source selection matches [`for_each`](Self::for_each); every line
    /// type is delivered, middleware-encoded payloads stay encoded. Pair
    /// with [`decode_raw`](Self::decode_raw) to recover keys and values.
    ///
    /// # Errors
    ///
    /// Propagates callback errors and framing errors.
    pub fn for_each_raw<F>(&self, tid: Option<&TxnId>, archive: bool, mut f: F) -> LogResult<()>
    where
        F: FnMut(&[u8]) -> LogResult<bool>,
    {
        let inner = self.read_inner()?;
        let include_archive = archive && !self.in_current(&inner, tid)?;
        debug!(tid = ?tid.map(ToString::to_string), archive, include_archive, "for_each_raw");

        self.scan(
            &inner,
            tid,
            ScanOpts::iterate(include_archive),
            &mut |_tag, line| f(line),
        )?;
        Ok(())
    }

    /// Iterates whole transactions after the anchor.
    ///
    /// Each Transaction or Replay opener yields one [`TxnInfo`] carrying
    /// the opener's id, its embedded timestamp, and the mutations that
    /// followed it.
    ///
    /// # Errors
    ///
    /// Propagates callback errors and framing errors.
    pub fn for_each_txn<F>(&self, tid: Option<&TxnId>, archive: bool, f: F) -> LogResult<()>
    where
        F: FnMut(TxnInfo) -> LogResult<bool>,
    {
        let inner = self.read_inner()?;
        let include_archive = archive && !self.in_current(&inner, tid)?;
        debug!(tid = ?tid.map(ToString::to_string), archive, include_archive, "for_each_txn");

        let chain = &self.chain;
        let mut acc = TxnAccumulator::new(f);
        self.scan(
            &inner,
            tid,
            ScanOpts::iterate(include_archive),
            &mut |tag, line| {
                let payload = &line[1..];
                match tag {
                    LineTag::Transaction | LineTag::Replay => acc.open(line::line_key(payload)),
                    LineTag::Put | LineTag::Delete => {
                        deliver_decoded(chain, tag, payload, &mut |tag, k, v| {
                            acc.action(tag, k, v);
                            Ok(true)
                        })
                    }
                    LineTag::Comment => Ok(true),
                }
            },
        )?;
        acc.finish()
    }

    /// Exports history from `tid` forward as a token-sealed byte stream.
    ///
    /// `tid == None` ships the full history, archive included. The stream
    /// is the raw lines as they appear on disk followed by a 32-byte
    /// authentication tag; only a log with the same name and middleware
    /// stack can import it.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::NoTxn`] if `tid` is already the last committed
    /// transaction, [`LogError::InvalidTxn`] if `tid` matches nothing in
    /// either file, or an error from the writer.
    pub fn export<W: Write>(&self, tid: Option<&TxnId>, w: W) -> LogResult<()> {
        let inner = self.read_inner()?;

        if let (Some(t), Some(last)) = (tid, *self.last_commit.read()) {
            if *t == last {
                return Err(LogError::NoTxn);
            }
        }

        let include_archive = tid.is_none() || !self.in_current(&inner, tid)?;
        debug!(tid = ?tid.map(ToString::to_string), include_archive, "export");

        let mut sealer = SealWriter::new(w, &self.token())?;
        let matched = self.scan(
            &inner,
            tid,
            ScanOpts::export(include_archive),
            &mut |_tag, line| {
                sealer.write_all(line)?;
                sealer.write_all(&[LINE_END])?;
                Ok(true)
            },
        )?;

        if let Some(t) = tid {
            if !matched {
                return Err(LogError::invalid_txn(t.to_string()));
            }
        }

        sealer.seal()
    }

    /// Imports a stream produced by [`export`](Self::export).
    ///
    /// The stream is staged to a temporary file and its seal verified
    /// against the local token before the active file is touched; a
    /// mismatch leaves the log byte-for-byte unchanged. The verified
    /// payload is appended, synced, and replayed through the decoder,
    /// delivering each Put/Delete to `f`.
    ///
    /// Returns the last Transaction-or-Replay id seen in the stream, which
    /// is the anchor for the next incremental export.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::MacMismatch`] on a bad seal, or propagates I/O,
    /// framing, and callback errors.
    pub fn import<R, F>(&self, mut r: R, mut f: F) -> LogResult<Option<TxnId>>
    where
        R: Read,
        F: FnMut(LineTag, &[u8], &[u8]) -> LogResult<bool>,
    {
        let mut inner = self.write_inner()?;

        let mut staging = tempfile::tempfile()?;
        std::io::copy(&mut r, &mut staging)?;
        let payload_len = seal::verify_stream(&self.token(), &mut staging)?;
        debug!(payload_len, "import stream verified");

        let start = inner.active.len()?;
        {
            let Inner { active, .. } = &mut *inner;
            let mut remaining = payload_len;
            let mut block = [0u8; COPY_BLOCK];
            while remaining > 0 {
                let want = block.len().min(remaining as usize);
                staging.read_exact(&mut block[..want])?;
                active.append(&block[..want])?;
                remaining -= want as u64;
            }
            active.sync()?;
        }

        // Replay the appended range, tracking the trailing opener id.
        let mut last = None;
        {
            let chain = &self.chain;
            let mut scanner = LineScanner::new(inner.active.as_ref())?;
            scanner.seek(start);

            let mut stopped = false;
            while !stopped {
                let at = scanner.position();
                let Some(line) = scanner.read_line()? else { break };
                let tag = parse_tag(line, at)?;
                match tag {
                    LineTag::Transaction | LineTag::Replay => {
                        if let Some(id) = TxnId::parse_bytes(line::line_key(&line[1..])) {
                            last = Some(id);
                        }
                    }
                    LineTag::Put | LineTag::Delete => {
                        stopped = !deliver_decoded(chain, tag, &line[1..], &mut f)?;
                    }
                    LineTag::Comment => {}
                }
            }
        }

        if let Some(id) = last.as_ref() {
            inner.idgen.raise_floor(id);
            *self.last_commit.write() = Some(*id);
        }
        Ok(last)
    }

    /// Returns the id of the most recently committed transaction.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::NoTxn`] if the log has no committed history.
    pub fn last_txn(&self) -> LogResult<TxnId> {
        let _inner = self.read_inner()?;
        (*self.last_commit.read()).ok_or(LogError::NoTxn)
    }

    /// Decodes a raw line captured via [`for_each_raw`](Self::for_each_raw).
    ///
    /// # Errors
    ///
    /// Returns [`LogError::InvalidLine`] on an unknown tag, or a middleware
    /// error for data lines.
    pub fn decode_raw(&self, raw: &[u8]) -> LogResult<(LineTag, Vec<u8>, Vec<u8>)> {
        let tag = parse_tag(raw, 0)?;
        let payload = &raw[1..];

        if tag.is_data() && !self.chain.is_empty() {
            let plain = self.chain.decode_all(payload)?;
            let (k, v) = line::split_kv(&plain);
            Ok((tag, k.to_vec(), v.to_vec()))
        } else {
            let (k, v) = line::split_kv(payload);
            Ok((tag, k.to_vec(), v.to_vec()))
        }
    }

    /// Closes the log, syncing both files.
    ///
    /// Close is one-shot: every later operation, including a second close,
    /// returns [`LogError::Closed`].
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Closed`] if already closed, or a sync error.
    pub fn close(&self) -> LogResult<()> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(LogError::Closed);
        }

        let Inner {
            active, archive, ..
        } = &mut *inner;
        active.sync()?;
        archive.sync()?;

        inner.closed = true;
        debug!(name = %self.name, "closed log");
        Ok(())
    }

    fn read_inner(&self) -> LogResult<RwLockReadGuard<'_, Inner>> {
        let inner = self.inner.read();
        if inner.closed {
            return Err(LogError::Closed);
        }
        Ok(inner)
    }

    fn write_inner(&self) -> LogResult<RwLockWriteGuard<'_, Inner>> {
        let inner = self.inner.write();
        if inner.closed {
            return Err(LogError::Closed);
        }
        Ok(inner)
    }

    /// Flushes the scratch buffer to the active file as one append.
    fn commit(&self, inner: &mut Inner) -> LogResult<()> {
        let Inner { active, buf, .. } = &mut *inner;
        let result = (|| -> LogResult<()> {
            active.append(buf)?;
            active.flush()?;
            if self.config.sync_on_commit {
                active.sync()?;
            }
            Ok(())
        })();
        buf.clear();
        result
    }

    /// The MAC token: log name plus the comma-joined middleware names.
    fn token(&self) -> Vec<u8> {
        let mut token = self.name.clone().into_bytes();
        if !self.chain.is_empty() {
            token.extend_from_slice(self.chain.names().join(",").as_bytes());
        }
        token
    }

    /// Whether the anchor's history lives in the active file.
    fn in_current(&self, inner: &Inner, tid: Option<&TxnId>) -> LogResult<bool> {
        let Some(tid) = tid else { return Ok(true) };

        if leading_replay_id(inner.active.as_ref())?.as_ref() == Some(tid) {
            return Ok(true);
        }

        let Some(first) = first_txn_id(inner.active.as_ref())? else {
            return Ok(false);
        };
        Ok(match (tid.order_key(), first.order_key()) {
            (Some(anchor), Some(head)) => anchor >= head,
            _ => false,
        })
    }

    /// Drives a filtered scan over archive and/or active file.
    ///
    /// Returns whether the anchor was matched.
    fn scan(
        &self,
        inner: &Inner,
        tid: Option<&TxnId>,
        opts: ScanOpts,
        sink: &mut dyn FnMut(LineTag, &[u8]) -> LogResult<bool>,
    ) -> LogResult<bool> {
        let mut filter = MatchFilter::new(tid);

        if opts.include_archive {
            let mut scanner = LineScanner::new(inner.archive.as_ref())?;
            if !scan_file(&mut scanner, &mut filter, sink)? {
                return Ok(filter.matched());
            }

            let mut scanner = LineScanner::new(inner.active.as_ref())?;
            if opts.resume_at_boundary {
                filter.enter_active();
                skip_leading_replay(&mut scanner)?;
            }
            scan_file(&mut scanner, &mut filter, sink)?;
        } else {
            let mut scanner = LineScanner::new(inner.active.as_ref())?;
            if tid.is_none() && opts.anchor_last_replay {
                if let Some(offset) = last_replay_offset(inner.active.as_ref())? {
                    scanner.seek(offset);
                }
            }
            scan_file(&mut scanner, &mut filter, sink)?;
        }

        Ok(filter.matched())
    }
}

impl std::fmt::Debug for TxnLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxnLog")
            .field("name", &self.name)
            .field("middleware", &self.chain.names())
            .finish_non_exhaustive()
    }
}

/// Stages one framed line into `buf`.
///
/// The middleware chain, when given, applies to the key/value block of data
/// lines only; the tag and terminator always stay in the clear.
fn write_line(
    buf: &mut Vec<u8>,
    tag: LineTag,
    key: &[u8],
    value: &[u8],
    chain: Option<&MiddlewareChain>,
) -> LogResult<()> {
    buf.push(tag.as_byte());

    match chain {
        Some(chain) if tag.is_data() && !chain.is_empty() => {
            let mut w = chain.writer(&mut *buf)?;
            line::write_kv(&mut w, key, value)?;
            w.finish()?;
        }
        _ => line::write_kv(buf, key, value)?,
    }

    buf.push(LINE_END);
    Ok(())
}

/// Decodes a data payload and hands it to `f`.
fn deliver_decoded<F>(
    chain: &MiddlewareChain,
    tag: LineTag,
    payload: &[u8],
    f: &mut F,
) -> LogResult<bool>
where
    F: FnMut(LineTag, &[u8], &[u8]) -> LogResult<bool>,
{
    if chain.is_empty() {
        let (k, v) = line::split_kv(payload);
        f(tag, k, v)
    } else {
        let plain = chain.decode_all(payload)?;
        let (k, v) = line::split_kv(&plain);
        f(tag, k, v)
    }
}

fn parse_tag(line: &[u8], offset: u64) -> LogResult<LineTag> {
    let Some(&byte) = line.first() else {
        return Err(LogError::invalid_line(format!("empty line at offset {offset}")));
    };
    LineTag::from_byte(byte)
        .ok_or_else(|| LogError::invalid_line(format!("unknown tag {byte} at offset {offset}")))
}

/// Feeds every line of one file through the filter into the sink.
///
/// Returns `false` when the sink requested early exit.
fn scan_file(
    scanner: &mut LineScanner<'_>,
    filter: &mut MatchFilter,
    sink: &mut dyn FnMut(LineTag, &[u8]) -> LogResult<bool>,
) -> LogResult<bool> {
    loop {
        let at = scanner.position();
        let Some(line) = scanner.read_line()? else {
            return Ok(true);
        };
        let tag = parse_tag(line, at)?;
        if filter.step(tag, &line[1..]) && !sink(tag, line)? {
            return Ok(false);
        }
    }
}

/// Positions `scanner` past a leading Replay line, if present.
fn skip_leading_replay(scanner: &mut LineScanner<'_>) -> LogResult<()> {
    let rewind = match scanner.read_line()? {
        Some(line) => line.first() != Some(&LineTag::Replay.as_byte()),
        None => true,
    };
    if rewind {
        scanner.seek_to_start();
    }
    Ok(())
}

/// Truncates a partially written trailing line left by a crash mid-append.
fn repair_tail(backend: &mut dyn StorageBackend) -> LogResult<()> {
    let len = backend.len()?;
    if len == 0 {
        return Ok(());
    }

    let mut last = [0u8; 1];
    backend.read_at(len - 1, &mut last)?;
    if last[0] == LINE_END {
        return Ok(());
    }

    // Walk back block by block to the last terminator.
    let mut block = [0u8; COPY_BLOCK];
    let mut search = len;
    while search > 0 {
        let start = search.saturating_sub(COPY_BLOCK as u64);
        let want = (search - start) as usize;
        backend.read_at(start, &mut block[..want])?;

        if let Some(idx) = block[..want].iter().rposition(|&b| b == LINE_END) {
            let keep = start + idx as u64 + 1;
            warn!(dropped = len - keep, "truncating partial trailing line");
            backend.truncate(keep)?;
            return Ok(());
        }
        search = start;
    }

    warn!(dropped = len, "no complete line found, truncating to empty");
    backend.truncate(0)?;
    Ok(())
}

/// Scans end-to-start for the most recent Transaction or Replay id.
fn last_txn_on_disk(backend: &dyn StorageBackend) -> LogResult<Option<TxnId>> {
    let mut scanner = LineScanner::new(backend)?;
    scanner.seek_to_end();

    loop {
        if !scanner.prev_line()? {
            return Ok(None);
        }

        let found = {
            let Some(line) = scanner.read_line()? else {
                return Ok(None);
            };
            match line.first().copied().and_then(LineTag::from_byte) {
                Some(tag) if tag.opens_txn() => TxnId::parse_bytes(line::line_key(&line[1..])),
                _ => None,
            }
        };
        if found.is_some() {
            return Ok(found);
        }

        if !scanner.prev_line()? {
            return Ok(None);
        }
    }
}

/// Returns the id of a Replay line at offset 0, if present.
fn leading_replay_id(backend: &dyn StorageBackend) -> LogResult<Option<TxnId>> {
    let mut scanner = LineScanner::new(backend)?;
    match scanner.read_line()? {
        Some(line) if line.first() == Some(&LineTag::Replay.as_byte()) => {
            Ok(TxnId::parse_bytes(line::line_key(&line[1..])))
        }
        _ => Ok(None),
    }
}

/// Returns the end offset of a leading Replay line, or 0.
fn leading_replay_end(backend: &dyn StorageBackend) -> LogResult<u64> {
    let mut scanner = LineScanner::new(backend)?;
    match scanner.read_line()? {
        Some(line) if line.first() == Some(&LineTag::Replay.as_byte()) => Ok(scanner.position()),
        _ => Ok(0),
    }
}

/// Returns the first Transaction id in the file, if any.
fn first_txn_id(backend: &dyn StorageBackend) -> LogResult<Option<TxnId>> {
    let mut scanner = LineScanner::new(backend)?;
    let mut found = None;
    scanner.read_lines(|line| {
        if line.first() == Some(&LineTag::Transaction.as_byte()) {
            found = TxnId::parse_bytes(line::line_key(&line[1..]));
            return Ok(false);
        }
        Ok(true)
    })?;
    Ok(found)
}

/// Returns the start offset of the last Replay line, scanning backward.
fn last_replay_offset(backend: &dyn StorageBackend) -> LogResult<Option<u64>> {
    let mut scanner = LineScanner::new(backend)?;
    scanner.seek_to_end();

    loop {
        if !scanner.prev_line()? {
            return Ok(None);
        }

        let start = scanner.position();
        let is_replay = {
            let Some(line) = scanner.read_line()? else {
                return Ok(None);
            };
            line.first() == Some(&LineTag::Replay.as_byte())
        };
        if is_replay {
            return Ok(Some(start));
        }

        if !scanner.prev_line()? {
            return Ok(None);
        }
    }
}
