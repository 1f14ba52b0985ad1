//! AES-256-GCM payload middleware.
//!
//! Encrypts the key/value block of Put/Delete lines with a per-payload
//! random nonce: `nonce (12 bytes) || ciphertext || tag (16 bytes)`,
//! hex-armored so the encrypted payload never contains the line
//! terminator. Keys are zeroized on drop and never stored by the log.

use crate::error::{LogError, LogResult};
use crate::middleware::{Middleware, PayloadWriter};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use std::io::{self, Read, Write};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of an AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of a GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// An AES-256 key, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error unless exactly [`KEY_SIZE`] bytes are given.
    pub fn from_bytes(bytes: &[u8]) -> LogResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(LogError::middleware(format!(
                "invalid key size: expected {KEY_SIZE}, got {}",
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self { bytes: key })
    }

    /// Generates a random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        Self { bytes: key }
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Payload middleware encrypting with AES-256-GCM.
pub struct EncryptionMiddleware {
    key: EncryptionKey,
}

impl EncryptionMiddleware {
    /// Creates a middleware around `key`.
    #[must_use]
    pub fn new(key: EncryptionKey) -> Self {
        Self { key }
    }
}

impl Middleware for EncryptionMiddleware {
    fn name(&self) -> &'static str {
        "aes256gcm"
    }

    fn writer<'a>(
        &self,
        sink: Box<dyn PayloadWriter + 'a>,
    ) -> LogResult<Box<dyn PayloadWriter + 'a>> {
        Ok(Box::new(EncryptWriter {
            key: self.key.clone(),
            plain: Vec::new(),
            sink,
        }))
    }

    fn reader<'a>(&self, source: Box<dyn Read + 'a>) -> LogResult<Box<dyn Read + 'a>> {
        Ok(Box::new(DecryptReader {
            key: self.key.clone(),
            source: Some(source),
            plain: io::Cursor::new(Vec::new()),
        }))
    }
}

/// Buffers plaintext; the whole payload is sealed on finish because GCM
/// authenticates the message as one unit.
struct EncryptWriter<'a> {
    key: EncryptionKey,
    plain: Vec<u8>,
    sink: Box<dyn PayloadWriter + 'a>,
}

impl Write for EncryptWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.plain.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl PayloadWriter for EncryptWriter<'_> {
    fn finish(mut self: Box<Self>) -> LogResult<()> {
        let cipher = cipher(&self.key)?;

        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), self.plain.as_slice())
            .map_err(|_| LogError::middleware("encryption failed"))?;
        self.plain.zeroize();

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        self.sink.write_all(hex::encode(&sealed).as_bytes())?;
        self.sink.finish()
    }
}

/// Decrypts lazily: the source is drained and opened on the first read.
struct DecryptReader<'a> {
    key: EncryptionKey,
    source: Option<Box<dyn Read + 'a>>,
    plain: io::Cursor<Vec<u8>>,
}

impl Read for DecryptReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(mut source) = self.source.take() {
            let mut armored = Vec::new();
            source.read_to_end(&mut armored)?;
            let plain = open(&self.key, &armored)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
            self.plain = io::Cursor::new(plain);
        }
        self.plain.read(buf)
    }
}

fn cipher(key: &EncryptionKey) -> LogResult<Aes256Gcm> {
    Aes256Gcm::new_from_slice(&key.bytes).map_err(|_| LogError::middleware("invalid key length"))
}

fn open(key: &EncryptionKey, armored: &[u8]) -> LogResult<Vec<u8>> {
    let sealed = hex::decode(armored)
        .map_err(|e| LogError::middleware(format!("bad payload armor: {e}")))?;
    if sealed.len() < NONCE_SIZE {
        return Err(LogError::middleware("encrypted payload too short"));
    }

    let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
    cipher(key)?
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| LogError::middleware("decryption failed: wrong key or corrupt payload"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line::LINE_END;
    use crate::middleware::MiddlewareChain;

    fn chain(key: &EncryptionKey) -> MiddlewareChain {
        MiddlewareChain::new().with(Box::new(EncryptionMiddleware::new(key.clone())))
    }

    fn encode(chain: &MiddlewareChain, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut w = chain.writer(&mut out).unwrap();
        w.write_all(data).unwrap();
        w.finish().unwrap();
        out
    }

    #[test]
    fn roundtrip() {
        let key = EncryptionKey::generate();
        let chain = chain(&key);

        let encoded = encode(&chain, b"secret payload");
        assert_ne!(encoded, b"secret payload");
        assert_eq!(chain.decode_all(&encoded).unwrap(), b"secret payload");
    }

    #[test]
    fn armor_never_contains_line_terminator() {
        let key = EncryptionKey::generate();
        let chain = chain(&key);

        for _ in 0..32 {
            let encoded = encode(&chain, &[b'\n'; 64]);
            assert!(!encoded.contains(&LINE_END));
        }
    }

    #[test]
    fn wrong_key_fails() {
        let chain_a = chain(&EncryptionKey::generate());
        let chain_b = chain(&EncryptionKey::generate());

        let encoded = encode(&chain_a, b"data");
        assert!(chain_b.decode_all(&encoded).is_err());
    }

    #[test]
    fn tampered_payload_fails() {
        let key = EncryptionKey::generate();
        let chain = chain(&key);

        let mut encoded = encode(&chain, b"data");
        // Flip a ciphertext nibble past the nonce armor.
        let idx = NONCE_SIZE * 2 + 1;
        encoded[idx] = if encoded[idx] == b'0' { b'1' } else { b'0' };
        assert!(chain.decode_all(&encoded).is_err());
    }

    #[test]
    fn key_size_enforced() {
        assert!(EncryptionKey::from_bytes(&[0u8; 16]).is_err());
        assert!(EncryptionKey::from_bytes(&[0u8; 32]).is_ok());
    }

    #[test]
    fn nonces_vary_per_payload() {
        let key = EncryptionKey::generate();
        let chain = chain(&key);
        assert_ne!(encode(&chain, b"same"), encode(&chain, b"same"));
    }
}
