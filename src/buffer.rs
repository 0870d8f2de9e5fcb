//! Owned byte buffer used by the container and encoding layers.

use std::fmt;

/// An owned, length-tracked byte sequence.
///
/// `SqrlBuffer` is the common currency between the container serializer, the
/// URL codec and the storage adapter. Contents are arbitrary binary; nothing
/// assumes NUL termination.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SqrlBuffer(Vec<u8>);

impl SqrlBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Creates an empty buffer with room for `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    /// Creates a buffer holding a copy of `bytes`.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    /// Returns the number of bytes held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the buffer holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Removes all contents, keeping the allocation.
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Appends a single byte.
    pub fn push(&mut self, byte: u8) {
        self.0.push(byte);
    }

    /// Appends a byte slice.
    pub fn append_bytes(&mut self, bytes: &[u8]) {
        self.0.extend_from_slice(bytes);
    }

    /// Returns the contents as a slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes self and returns the inner bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl AsRef<[u8]> for SqrlBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for SqrlBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for SqrlBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SqrlBuffer({} bytes)", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_append_and_clear() {
        let mut buf = SqrlBuffer::new();
        assert!(buf.is_empty());

        buf.append_bytes(b"sqrl");
        buf.push(b'!');
        assert_eq!(buf.len(), 5);
        assert_eq!(buf.as_bytes(), b"sqrl!");

        buf.clear();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_buffer_binary_content() {
        let mut buf = SqrlBuffer::from_bytes(&[0x00, 0xFF]);
        buf.push(0x00);
        assert_eq!(buf.as_bytes(), &[0x00, 0xFF, 0x00]);
    }
}
