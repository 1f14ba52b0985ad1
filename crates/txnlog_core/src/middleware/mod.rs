//! Payload middleware.
//!
//! A middleware is a symmetric byte transform applied to the key/value
//! block of Put and Delete lines — and only there: tags, terminators, and
//! Transaction/Replay/Comment lines always stay in the clear. Middlewares
//! compose like layered codecs; two logs can exchange exports only when
//! their middleware stacks (and names) agree, which is why the ordered name
//! list feeds the export token.
//!
//! The optional [`encryption`] module provides an AES-256-GCM middleware
//! behind the `encryption` feature.

#[cfg(feature = "encryption")]
pub mod encryption;

use crate::error::{LogError, LogResult};
use std::io::{self, Read, Write};

/// A writer that must be finished so trailers reach the sink.
///
/// Encoders often hold back state (padding, MAC tags, whole-payload
/// transforms); [`finish`](PayloadWriter::finish) consumes the writer and
/// guarantees everything, trailers included, has been emitted downstream.
pub trait PayloadWriter: Write {
    /// Emits any trailing bytes and finishes the writer below.
    ///
    /// # Errors
    ///
    /// Returns an error if the transform or the sink fails.
    fn finish(self: Box<Self>) -> LogResult<()>;
}

/// A symmetric payload transform.
///
/// `reader` must invert `writer`: for any byte string, encoding through the
/// writer and decoding through the reader yields the original bytes.
pub trait Middleware: Send + Sync {
    /// Stable name, used to derive the export token.
    fn name(&self) -> &'static str;

    /// Wraps `sink` with this middleware's encoder.
    ///
    /// # Errors
    ///
    /// Returns an error if the encoder cannot be constructed.
    fn writer<'a>(
        &self,
        sink: Box<dyn PayloadWriter + 'a>,
    ) -> LogResult<Box<dyn PayloadWriter + 'a>>;

    /// Wraps `source` with this middleware's decoder.
    ///
    /// # Errors
    ///
    /// Returns an error if the decoder cannot be constructed.
    fn reader<'a>(&self, source: Box<dyn Read + 'a>) -> LogResult<Box<dyn Read + 'a>>;
}

/// An ordered stack of middlewares.
///
/// The first middleware is outermost in both directions: bytes written pass
/// through it first, bytes read pass through it last.
#[derive(Default)]
pub struct MiddlewareChain {
    mws: Vec<Box<dyn Middleware>>,
}

impl MiddlewareChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware to the inside of the chain.
    pub fn push(&mut self, mw: Box<dyn Middleware>) {
        self.mws.push(mw);
    }

    /// Appends a middleware, builder style.
    #[must_use]
    pub fn with(mut self, mw: Box<dyn Middleware>) -> Self {
        self.push(mw);
        self
    }

    /// Returns whether the chain holds no middlewares.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mws.is_empty()
    }

    /// Returns the ordered middleware names.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.mws.iter().map(|mw| mw.name()).collect()
    }

    /// Builds the encoding writer stack over `sink`.
    ///
    /// The returned writer must be [finished](PayloadWriter::finish) to
    /// flush trailers through every layer.
    ///
    /// # Errors
    ///
    /// Returns an error if any layer fails to construct.
    pub fn writer<'a, W: Write + 'a>(&self, sink: W) -> LogResult<Box<dyn PayloadWriter + 'a>> {
        let mut w: Box<dyn PayloadWriter + 'a> = Box::new(SinkWriter(sink));
        for mw in self.mws.iter().rev() {
            w = mw.writer(w)?;
        }
        Ok(w)
    }

    /// Builds the decoding reader stack over `source`.
    ///
    /// # Errors
    ///
    /// Returns an error if any layer fails to construct.
    pub fn reader<'a, R: Read + 'a>(&self, source: R) -> LogResult<Box<dyn Read + 'a>> {
        let mut r: Box<dyn Read + 'a> = Box::new(source);
        for mw in self.mws.iter().rev() {
            r = mw.reader(r)?;
        }
        Ok(r)
    }

    /// Decodes an entire encoded payload.
    ///
    /// # Errors
    ///
    /// Returns an error if any layer fails.
    pub(crate) fn decode_all(&self, payload: &[u8]) -> LogResult<Vec<u8>> {
        let mut out = Vec::with_capacity(payload.len());
        self.reader(payload)?
            .read_to_end(&mut out)
            .map_err(|e| LogError::middleware(e.to_string()))?;
        Ok(out)
    }
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("names", &self.names())
            .finish()
    }
}

/// Base of every writer stack: forwards to the sink, finish flushes.
struct SinkWriter<W: Write>(W);

impl<W: Write> Write for SinkWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl<W: Write> PayloadWriter for SinkWriter<W> {
    fn finish(mut self: Box<Self>) -> LogResult<()> {
        self.0.flush()?;
        Ok(())
    }
}
