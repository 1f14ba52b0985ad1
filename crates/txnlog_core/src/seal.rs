//! Export stream authentication.
//!
//! An exported stream is the raw line bytes followed by a 32-byte
//! HMAC-SHA256 tag keyed by the log token (name plus middleware names).
//! The importer verifies the tag against its own token before a single
//! payload byte touches the active file, so a tampered or misrouted stream
//! can never corrupt a log.

use crate::error::{LogError, LogResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::io::{self, Read, Seek, SeekFrom, Write};

type HmacSha256 = Hmac<Sha256>;

/// Size of the trailing authentication tag in bytes.
pub const SEAL_SIZE: usize = 32;

fn mac(token: &[u8]) -> LogResult<HmacSha256> {
    HmacSha256::new_from_slice(token).map_err(|e| LogError::middleware(e.to_string()))
}

/// A writer that tees written bytes into a running MAC.
///
/// [`seal`](SealWriter::seal) finalizes the MAC and appends the tag to the
/// stream.
pub(crate) struct SealWriter<W: Write> {
    inner: W,
    mac: HmacSha256,
}

impl<W: Write> SealWriter<W> {
    /// Creates a sealing writer keyed by `token`.
    pub(crate) fn new(inner: W, token: &[u8]) -> LogResult<Self> {
        Ok(Self {
            inner,
            mac: mac(token)?,
        })
    }

    /// Appends the authentication tag and flushes the stream.
    pub(crate) fn seal(mut self) -> LogResult<()> {
        let tag = self.mac.finalize().into_bytes();
        self.inner.write_all(&tag)?;
        self.inner.flush()?;
        Ok(())
    }
}

impl<W: Write> Write for SealWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.mac.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Verifies a sealed stream in place.
///
/// `src` must hold the complete stream. On success the payload length is
/// returned and `src` is rewound to the payload start; the caller may then
/// read exactly that many verified bytes. Comparison is constant-time.
///
/// # Errors
///
/// Returns [`LogError::MacMismatch`] if the stream is shorter than a tag or
/// the tag does not verify.
pub(crate) fn verify_stream<R: Read + Seek>(token: &[u8], src: &mut R) -> LogResult<u64> {
    let total = src.seek(SeekFrom::End(0))?;
    let Some(payload_len) = total.checked_sub(SEAL_SIZE as u64) else {
        return Err(LogError::MacMismatch);
    };

    src.seek(SeekFrom::Start(0))?;
    let mut mac = mac(token)?;

    let mut remaining = payload_len;
    let mut block = [0u8; 4096];
    while remaining > 0 {
        let want = block.len().min(remaining as usize);
        src.read_exact(&mut block[..want])?;
        mac.update(&block[..want]);
        remaining -= want as u64;
    }

    let mut tag = [0u8; SEAL_SIZE];
    src.read_exact(&mut tag)?;
    mac.verify_slice(&tag).map_err(|_| LogError::MacMismatch)?;

    src.seek(SeekFrom::Start(0))?;
    Ok(payload_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sealed(token: &[u8], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut w = SealWriter::new(&mut out, token).unwrap();
        w.write_all(payload).unwrap();
        w.seal().unwrap();
        out
    }

    #[test]
    fn seal_appends_tag() {
        let out = sealed(b"token", b"payload");
        assert_eq!(out.len(), 7 + SEAL_SIZE);
        assert_eq!(&out[..7], b"payload");
    }

    #[test]
    fn verify_accepts_valid_stream() {
        let out = sealed(b"token", b"line one\nline two\n");
        let mut src = Cursor::new(out);

        let len = verify_stream(b"token", &mut src).unwrap();
        assert_eq!(len, 18);
        assert_eq!(src.position(), 0);
    }

    #[test]
    fn verify_rejects_wrong_token() {
        let out = sealed(b"token-a", b"payload");
        let mut src = Cursor::new(out);
        assert!(matches!(
            verify_stream(b"token-b", &mut src),
            Err(LogError::MacMismatch)
        ));
    }

    #[test]
    fn verify_rejects_any_flipped_byte() {
        let out = sealed(b"token", b"payload");
        for i in 0..out.len() {
            let mut bad = out.clone();
            bad[i] ^= 0x01;
            let mut src = Cursor::new(bad);
            assert!(
                matches!(verify_stream(b"token", &mut src), Err(LogError::MacMismatch)),
                "flip at byte {i} slipped through"
            );
        }
    }

    #[test]
    fn verify_rejects_short_stream() {
        let mut src = Cursor::new(vec![0u8; SEAL_SIZE - 1]);
        assert!(matches!(
            verify_stream(b"token", &mut src),
            Err(LogError::MacMismatch)
        ));
    }

    #[test]
    fn empty_payload_seals_and_verifies() {
        let out = sealed(b"token", b"");
        let mut src = Cursor::new(out);
        assert_eq!(verify_stream(b"token", &mut src).unwrap(), 0);
    }
}
