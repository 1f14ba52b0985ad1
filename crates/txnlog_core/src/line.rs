//! Line codec.
//!
//! A line is one record in the log:
//!
//! ```text
//! | tag (1) | keyLen (8, LE) | key | valLen (8, LE) | val | \n (1) |
//! ```
//!
//! Transaction, Replay, and Comment lines use the same framing with an
//! empty value and never pass through middleware. For Put/Delete lines the
//! key/value block may be middleware-encoded as a whole; the tag and
//! terminator never are.
//!
//! Decoding is tolerant by contract: every length prefix is bounds-checked
//! against the remaining bytes, and a truncated payload yields empty
//! key/value slices rather than an error or an out-of-range read.

use std::io::{self, Write};

/// The line terminator.
pub(crate) const LINE_END: u8 = b'\n';

/// Size of a length prefix.
const LEN_SIZE: usize = 8;

/// Tag byte classifying a line.
///
/// Tag `0` is reserved (nil) and treated as invalid during decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LineTag {
    /// Opens a transaction's record group; key is the transaction id.
    Transaction = 1,
    /// Archive marker; key is the last transaction id captured before the
    /// rollover that produced it.
    Replay = 2,
    /// Free-form annotation; ignored by data iteration, bypasses middleware.
    Comment = 3,
    /// Sets a key to a value.
    Put = 4,
    /// Removes a key.
    Delete = 5,
}

impl LineTag {
    /// Converts a byte to a tag.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Transaction),
            2 => Some(Self::Replay),
            3 => Some(Self::Comment),
            4 => Some(Self::Put),
            5 => Some(Self::Delete),
            _ => None,
        }
    }

    /// Converts the tag to its wire byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Returns whether this line carries data subject to middleware.
    #[must_use]
    pub const fn is_data(self) -> bool {
        matches!(self, Self::Put | Self::Delete)
    }

    /// Returns whether this line opens a transaction group.
    #[must_use]
    pub const fn opens_txn(self) -> bool {
        matches!(self, Self::Transaction | Self::Replay)
    }
}

/// Writes a length-prefixed key and value into `w`.
///
/// Produces exactly `8 + key.len() + 8 + value.len()` bytes.
///
/// # Errors
///
/// Returns an error if the underlying writer fails.
pub fn write_kv<W: Write>(w: &mut W, key: &[u8], value: &[u8]) -> io::Result<()> {
    w.write_all(&(key.len() as u64).to_le_bytes())?;
    w.write_all(key)?;
    w.write_all(&(value.len() as u64).to_le_bytes())?;
    w.write_all(value)?;
    Ok(())
}

/// Splits a payload into its key and value.
///
/// Every length prefix is checked against the remaining bytes; a truncated
/// payload yields `(&[], &[])` or a key with an empty value, never a read
/// out of range.
#[must_use]
pub fn split_kv(b: &[u8]) -> (&[u8], &[u8]) {
    let Some(key) = read_prefixed(b) else {
        return (&[], &[]);
    };

    let rest = &b[LEN_SIZE + key.len()..];
    let Some(value) = read_prefixed(rest) else {
        return (key, &[]);
    };

    (key, value)
}

/// Returns the key of a payload, empty if truncated.
#[must_use]
pub fn line_key(b: &[u8]) -> &[u8] {
    split_kv(b).0
}

fn read_prefixed(b: &[u8]) -> Option<&[u8]> {
    if b.len() < LEN_SIZE {
        return None;
    }

    let len = u64::from_le_bytes(b[..LEN_SIZE].try_into().ok()?);
    let len = usize::try_from(len).ok()?;
    let end = LEN_SIZE.checked_add(len)?;
    b.get(LEN_SIZE..end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encode_kv(key: &[u8], value: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        write_kv(&mut buf, key, value).unwrap();
        buf
    }

    #[test]
    fn tag_roundtrip() {
        for tag in [
            LineTag::Transaction,
            LineTag::Replay,
            LineTag::Comment,
            LineTag::Put,
            LineTag::Delete,
        ] {
            assert_eq!(LineTag::from_byte(tag.as_byte()), Some(tag));
        }
    }

    #[test]
    fn nil_tag_is_invalid() {
        assert_eq!(LineTag::from_byte(0), None);
        assert_eq!(LineTag::from_byte(6), None);
        assert_eq!(LineTag::from_byte(0xFF), None);
    }

    #[test]
    fn only_put_delete_are_data() {
        assert!(LineTag::Put.is_data());
        assert!(LineTag::Delete.is_data());
        assert!(!LineTag::Transaction.is_data());
        assert!(!LineTag::Replay.is_data());
        assert!(!LineTag::Comment.is_data());
    }

    #[test]
    fn kv_roundtrip() {
        let buf = encode_kv(b"greeting", b"hello");
        assert_eq!(buf.len(), 8 + 8 + 8 + 5);
        let (k, v) = split_kv(&buf);
        assert_eq!(k, b"greeting");
        assert_eq!(v, b"hello");
    }

    #[test]
    fn empty_value_roundtrip() {
        let buf = encode_kv(b"key", b"");
        let (k, v) = split_kv(&buf);
        assert_eq!(k, b"key");
        assert!(v.is_empty());
    }

    #[test]
    fn truncated_key_prefix_yields_empty() {
        assert_eq!(split_kv(&[]), (&[][..], &[][..]));
        assert_eq!(split_kv(&[1, 0, 0]), (&[][..], &[][..]));
    }

    #[test]
    fn truncated_key_body_yields_empty() {
        // Claims a 100-byte key, supplies 2.
        let mut buf = 100u64.to_le_bytes().to_vec();
        buf.extend_from_slice(b"ab");
        assert_eq!(split_kv(&buf), (&[][..], &[][..]));
    }

    #[test]
    fn truncated_value_yields_key_only() {
        let full = encode_kv(b"key", b"value");
        // Cut into the value body.
        let (k, v) = split_kv(&full[..full.len() - 2]);
        assert_eq!(k, b"key");
        assert!(v.is_empty());
    }

    #[test]
    fn oversized_value_prefix_yields_key_only() {
        let mut buf = encode_kv(b"key", b"");
        // Rewrite the value length to something absurd.
        let n = buf.len();
        buf[n - 8..].copy_from_slice(&u64::MAX.to_le_bytes());
        let (k, v) = split_kv(&buf);
        assert_eq!(k, b"key");
        assert!(v.is_empty());
    }

    proptest! {
        #[test]
        fn kv_roundtrip_arbitrary(key in proptest::collection::vec(any::<u8>(), 0..256),
                                  value in proptest::collection::vec(any::<u8>(), 0..256)) {
            let buf = encode_kv(&key, &value);
            prop_assert_eq!(buf.len(), 16 + key.len() + value.len());
            let (k, v) = split_kv(&buf);
            prop_assert_eq!(k, &key[..]);
            prop_assert_eq!(v, &value[..]);
        }

        #[test]
        fn split_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
            let (k, v) = split_kv(&bytes);
            prop_assert!(k.len() <= bytes.len());
            prop_assert!(v.len() <= bytes.len());
        }
    }
}
