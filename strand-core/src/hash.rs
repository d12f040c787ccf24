//! 128-bit content hashing.
//!
//! Every computation in the engine is identified by a [`ContentHash`]: a
//! fingerprint of the node type, the output plug's path relative to its node,
//! the hashes of every upstream plug the output depends on, and every
//! Context variable it reads. Two identical fingerprints identify the same
//! computation, which is what makes the global compute cache safe.
//!
//! Hashes are produced through a [`ContentHasher`] accumulator backed by
//! BLAKE3 and truncated to 128 bits.

use std::fmt;

use blake3::Hasher;

/// A 128-bit content fingerprint.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 16]);

impl ContentHash {
    /// The all-zero hash. Used as a sentinel, never produced by hashing.
    pub const ZERO: ContentHash = ContentHash([0; 16]);

    /// Raw bytes of the fingerprint.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Reconstructs a hash from raw bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({self})")
    }
}

/// Accumulator for building a [`ContentHash`].
///
/// Append methods are length-prefixed or fixed-width so that distinct
/// sequences of appends can never produce the same byte stream.
pub struct ContentHasher {
    inner: Hasher,
}

impl ContentHasher {
    /// Creates an empty accumulator.
    pub fn new() -> Self {
        Self {
            inner: Hasher::new(),
        }
    }

    /// Appends raw bytes, length-prefixed.
    pub fn append_bytes(&mut self, bytes: &[u8]) {
        self.inner.update(&(bytes.len() as u64).to_le_bytes());
        self.inner.update(bytes);
    }

    /// Appends a string, length-prefixed.
    pub fn append_str(&mut self, s: &str) {
        self.append_bytes(s.as_bytes());
    }

    /// Appends a single byte.
    pub fn append_u8(&mut self, v: u8) {
        self.inner.update(&[v]);
    }

    /// Appends a u64.
    pub fn append_u64(&mut self, v: u64) {
        self.inner.update(&v.to_le_bytes());
    }

    /// Appends an i64.
    pub fn append_i64(&mut self, v: i64) {
        self.inner.update(&v.to_le_bytes());
    }

    /// Appends an f64 by bit pattern.
    pub fn append_f64(&mut self, v: f64) {
        self.inner.update(&v.to_bits().to_le_bytes());
    }

    /// Appends a bool.
    pub fn append_bool(&mut self, v: bool) {
        self.inner.update(&[v as u8]);
    }

    /// Appends another hash.
    pub fn append_hash(&mut self, h: ContentHash) {
        self.inner.update(h.as_bytes());
    }

    /// Finalizes the accumulator into a 128-bit fingerprint.
    pub fn finish(&self) -> ContentHash {
        let full = self.inner.finalize();
        let mut out = [0u8; 16];
        out.copy_from_slice(&full.as_bytes()[..16]);
        ContentHash(out)
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}
