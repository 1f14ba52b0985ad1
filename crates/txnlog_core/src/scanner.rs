//! Bidirectional line scanner.
//!
//! Walks newline-terminated lines over a seekable byte store in both
//! directions, reading fixed-size blocks so memory stays bounded no matter
//! how long a line or a file gets.
//!
//! The scanner snapshots the store length at construction: a scan sees a
//! consistent prefix of an actively appended file, ending at a line
//! boundary that existed when the scanner was created.
//!
//! ## Recovery policy
//!
//! A trailing chunk without a terminator is a partially written line from a
//! crash mid-append. [`read_line`](LineScanner::read_line) treats it as end
//! of useful data rather than an error; the engine truncates such tails on
//! open.

use crate::error::LogResult;
use crate::line::LINE_END;
use txnlog_storage::StorageBackend;

/// Block size for forward and backward reads.
const BLOCK_SIZE: usize = 4096;

/// A cursor over the lines of a byte store.
///
/// The cursor always rests on a line boundary after any operation: the
/// start of the file, the byte after some line's terminator, or the end of
/// the snapshot.
pub struct LineScanner<'a> {
    src: &'a dyn StorageBackend,
    /// Store length snapshot taken at construction.
    len: u64,
    pos: u64,
    line: Vec<u8>,
}

impl<'a> LineScanner<'a> {
    /// Creates a scanner positioned at the start of the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store length cannot be read.
    pub fn new(src: &'a dyn StorageBackend) -> LogResult<Self> {
        let len = src.len()?;
        Ok(Self {
            src,
            len,
            pos: 0,
            line: Vec::new(),
        })
    }

    /// Moves the cursor to the start of the store.
    pub fn seek_to_start(&mut self) {
        self.pos = 0;
    }

    /// Moves the cursor to the end of the snapshot.
    pub fn seek_to_end(&mut self) {
        self.pos = self.len;
    }

    /// Moves the cursor to `pos`, clamped to the snapshot length.
    ///
    /// The caller is responsible for passing a line boundary.
    pub fn seek(&mut self, pos: u64) {
        self.pos = pos.min(self.len);
    }

    /// Returns the current cursor position.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Reads the line starting at the cursor.
    ///
    /// Returns the line bytes (tag plus payload, terminator stripped) and
    /// leaves the cursor just past the terminator. Returns `None` at the
    /// end of the snapshot, or when only a partial line without a
    /// terminator remains; the cursor then rests at the snapshot end.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails.
    pub fn read_line(&mut self) -> LogResult<Option<&[u8]>> {
        self.line.clear();
        if self.pos >= self.len {
            return Ok(None);
        }

        let mut block = [0u8; BLOCK_SIZE];
        let mut pos = self.pos;

        while pos < self.len {
            let want = BLOCK_SIZE.min((self.len - pos) as usize);
            let n = self.src.read_at(pos, &mut block[..want])?;
            if n == 0 {
                break;
            }

            if let Some(idx) = block[..n].iter().position(|&b| b == LINE_END) {
                self.line.extend_from_slice(&block[..idx]);
                self.pos = pos + idx as u64 + 1;
                return Ok(Some(&self.line));
            }

            self.line.extend_from_slice(&block[..n]);
            pos += n as u64;
        }

        // No terminator before the end of the snapshot: partial tail.
        self.line.clear();
        self.pos = self.len;
        Ok(None)
    }

    /// Steps the cursor back one line.
    ///
    /// From a line boundary the cursor moves to the start of the preceding
    /// line; from inside a line it moves to the start of that line. Returns
    /// `Ok(false)` without moving when the cursor is already at the start
    /// of the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails.
    pub fn prev_line(&mut self) -> LogResult<bool> {
        if self.pos == 0 {
            return Ok(false);
        }

        // Step over the terminator of the previous line when resting on a
        // boundary, so the search finds the line before it.
        let mut search = self.pos;
        if self.byte_at(search - 1)? == LINE_END {
            search -= 1;
        }

        let mut block = [0u8; BLOCK_SIZE];
        while search > 0 {
            let start = search.saturating_sub(BLOCK_SIZE as u64);
            let len = (search - start) as usize;
            self.read_exact_at(start, &mut block[..len])?;

            if let Some(idx) = block[..len].iter().rposition(|&b| b == LINE_END) {
                self.pos = start + idx as u64 + 1;
                return Ok(true);
            }

            search = start;
        }

        self.pos = 0;
        Ok(true)
    }

    /// Reads lines forward from the cursor, invoking `f` on each.
    ///
    /// Stops at the end of the snapshot, or early without error when `f`
    /// returns `Ok(false)`.
    ///
    /// # Errors
    ///
    /// Propagates store errors and errors returned by `f`.
    pub fn read_lines<F>(&mut self, mut f: F) -> LogResult<()>
    where
        F: FnMut(&[u8]) -> LogResult<bool>,
    {
        while let Some(line) = self.read_line()? {
            if !f(line)? {
                return Ok(());
            }
        }
        Ok(())
    }

    fn byte_at(&self, pos: u64) -> LogResult<u8> {
        let mut byte = [0u8; 1];
        self.read_exact_at(pos, &mut byte)?;
        Ok(byte[0])
    }

    fn read_exact_at(&self, pos: u64, buf: &mut [u8]) -> LogResult<()> {
        let n = self.src.read_at(pos, buf)?;
        if n != buf.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "store shrank under an active scanner",
            )
            .into());
        }
        Ok(())
    }
}
