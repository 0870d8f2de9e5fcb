//! A single typed, length-prefixed container record.

use crate::buffer::SqrlBuffer;
use crate::secure::SecretRegion;
use crate::{IdentityError, IdentityResult};

use super::format::BLOCK_HEADER_SIZE;

/// A cursor-driven reader/writer over a fixed-size locked buffer.
///
/// `length` is the block's total on-disk size, including the four header
/// bytes; `data` holds exactly that many bytes in locked memory. The cursor
/// stays within `0..=length` and is left untouched by failed accesses.
/// Integer accessors are little-endian throughout.
pub struct Block {
    block_type: u16,
    length: u16,
    cursor: u16,
    data: SecretRegion,
}

impl Block {
    /// Allocates a zeroed block of `length` locked bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the locked allocation cannot be created.
    pub fn create(block_type: u16, length: u16) -> IdentityResult<Self> {
        Ok(Self {
            block_type,
            length,
            cursor: 0,
            data: SecretRegion::new(usize::from(length))?,
        })
    }

    /// Returns the block type.
    #[must_use]
    pub const fn block_type(&self) -> u16 {
        self.block_type
    }

    /// Returns the block length in bytes.
    #[must_use]
    pub const fn length(&self) -> u16 {
        self.length
    }

    /// Returns the current cursor position.
    #[must_use]
    pub const fn cursor(&self) -> u16 {
        self.cursor
    }

    /// Zeroes and releases the data, resetting type, length and cursor.
    pub fn clear(&mut self) {
        self.block_type = 0;
        self.length = 0;
        self.cursor = 0;
        self.data = SecretRegion::empty();
    }

    /// Resizes the block, preserving leading bytes and zero-extending.
    ///
    /// A cursor beyond the new range is clamped to `new_size - 1`.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero size or a failed allocation.
    pub fn resize(&mut self, new_size: u16) -> IdentityResult<()> {
        if new_size == 0 {
            return Err(IdentityError::invalid_input("new_size", "must be non-zero"));
        }
        if new_size == self.length {
            return Ok(());
        }
        let mut grown = SecretRegion::new(usize::from(new_size))?;
        let keep = usize::from(self.length.min(new_size));
        grown.write()?[..keep].copy_from_slice(&self.data.read()?[..keep]);
        self.data = grown;
        self.length = new_size;
        if self.cursor >= new_size {
            self.cursor = new_size - 1;
        }
        Ok(())
    }

    /// Moves the cursor to `dest`, or `cursor + dest` when `offset` is set.
    ///
    /// The move takes effect only if the target is strictly less than the
    /// block length; the resulting cursor is returned either way.
    pub fn seek(&mut self, dest: u16, offset: bool) -> u16 {
        let target = if offset {
            u32::from(self.cursor) + u32::from(dest)
        } else {
            u32::from(dest)
        };
        if target < u32::from(self.length) {
            #[allow(clippy::cast_possible_truncation)]
            {
                self.cursor = target as u16;
            }
        }
        self.cursor
    }

    /// Moves the cursor to `length - dest`, or `cursor - dest` when
    /// `offset` is set.
    ///
    /// The move takes effect only if the target is strictly positive; the
    /// resulting cursor is returned either way.
    pub fn seek_back(&mut self, dest: u16, offset: bool) -> u16 {
        let target = if offset {
            i32::from(self.cursor) - i32::from(dest)
        } else {
            i32::from(self.length) - i32::from(dest)
        };
        if target > 0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                self.cursor = target as u16;
            }
        }
        self.cursor
    }

    fn span(&self, len: usize) -> IdentityResult<std::ops::Range<usize>> {
        let start = usize::from(self.cursor);
        let end = start + len;
        if end > usize::from(self.length) {
            return Err(IdentityError::overrun(format!(
                "access of {len} at cursor {start} exceeds block length {}",
                self.length
            )));
        }
        Ok(start..end)
    }

    /// Copies `out.len()` bytes from the cursor, advancing it.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::BufferOverrun`] without moving the cursor if
    /// the read would pass the end of the block.
    pub fn read(&mut self, out: &mut [u8]) -> IdentityResult<usize> {
        let span = self.span(out.len())?;
        out.copy_from_slice(&self.data.read()?[span]);
        self.advance(out.len());
        Ok(out.len())
    }

    /// Copies `bytes` to the cursor, advancing it.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::BufferOverrun`] without moving the cursor if
    /// the write would pass the end of the block.
    pub fn write(&mut self, bytes: &[u8]) -> IdentityResult<usize> {
        let span = self.span(bytes.len())?;
        self.data.write()?[span].copy_from_slice(bytes);
        self.advance(bytes.len());
        Ok(bytes.len())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn advance(&mut self, len: usize) {
        self.cursor += len as u16;
    }

    /// Reads a byte at the cursor.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::BufferOverrun`] on overrun.
    pub fn read_u8(&mut self) -> IdentityResult<u8> {
        let mut buf = [0u8; 1];
        self.read(&mut buf)?;
        Ok(buf[0])
    }

    /// Reads a little-endian u16 at the cursor.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::BufferOverrun`] on overrun.
    pub fn read_u16(&mut self) -> IdentityResult<u16> {
        let mut buf = [0u8; 2];
        self.read(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    /// Reads a little-endian u32 at the cursor.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::BufferOverrun`] on overrun.
    pub fn read_u32(&mut self) -> IdentityResult<u32> {
        let mut buf = [0u8; 4];
        self.read(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Writes a byte at the cursor.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::BufferOverrun`] on overrun.
    pub fn write_u8(&mut self, value: u8) -> IdentityResult<()> {
        self.write(&[value]).map(|_| ())
    }

    /// Writes a little-endian u16 at the cursor.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::BufferOverrun`] on overrun.
    pub fn write_u16(&mut self, value: u16) -> IdentityResult<()> {
        self.write(&value.to_le_bytes()).map(|_| ())
    }

    /// Writes a little-endian u32 at the cursor.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::BufferOverrun`] on overrun.
    pub fn write_u32(&mut self, value: u32) -> IdentityResult<()> {
        self.write(&value.to_le_bytes()).map(|_| ())
    }

    /// Copies the entire block payload into `buf`, replacing or appending.
    ///
    /// # Errors
    ///
    /// Propagates region access failures.
    pub fn copy_data(&self, buf: &mut SqrlBuffer, append: bool) -> IdentityResult<()> {
        if !append {
            buf.clear();
        }
        if self.length > 0 {
            buf.append_bytes(self.data.read()?);
        }
        Ok(())
    }

    /// Exposes the underlying buffer, whole or from the cursor onward.
    ///
    /// The AEAD interop path reads and writes through this view; callers
    /// must stay within the block length.
    ///
    /// # Errors
    ///
    /// Propagates region access failures.
    pub fn data_mut(&mut self, at_cursor: bool) -> IdentityResult<&mut [u8]> {
        let start = if at_cursor { usize::from(self.cursor) } else { 0 };
        Ok(&mut self.data.write()?[start..])
    }

    /// Returns the block's on-disk bytes: the data buffer with the length
    /// and type stamped into the four header bytes.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::MalformedBlock`] for blocks shorter than the
    /// header.
    pub fn serialized(&self) -> IdentityResult<Vec<u8>> {
        if usize::from(self.length) < BLOCK_HEADER_SIZE {
            return Err(IdentityError::malformed(format!(
                "block of length {} cannot carry a header",
                self.length
            )));
        }
        let mut bytes = self.data.read()?.to_vec();
        bytes[0..2].copy_from_slice(&self.length.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.block_type.to_le_bytes());
        Ok(bytes)
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("type", &self.block_type)
            .field("length", &self.length)
            .field("cursor", &self.cursor)
            .field("data", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_round_trip() {
        let mut block = Block::create(1, 8).unwrap();
        block.write_u16(0xBEEF).unwrap();
        block.seek(0, false);
        assert_eq!(block.read_u16().unwrap(), 0xBEEF);

        block.seek(0, false);
        block.write_u8(0x7F).unwrap();
        block.write_u32(0xDEAD_BEEF).unwrap();
        block.seek(0, false);
        assert_eq!(block.read_u8().unwrap(), 0x7F);
        assert_eq!(block.read_u32().unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn test_sequential_reads() {
        let mut block = Block::create(1, 8).unwrap();
        block
            .write(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08])
            .unwrap();
        block.seek(0, false);
        assert_eq!(block.read_u32().unwrap(), 0x0403_0201);
        assert_eq!(block.read_u16().unwrap(), 0x0605);
        assert_eq!(block.read_u8().unwrap(), 0x07);
    }

    #[test]
    fn test_overrun_leaves_cursor() {
        let mut block = Block::create(1, 4).unwrap();
        block.seek(2, false);
        assert!(block.read_u32().is_err());
        assert_eq!(block.cursor(), 2);
        assert!(block.write(&[0u8; 3]).is_err());
        assert_eq!(block.cursor(), 2);
        assert!(block.read_u16().is_ok());
        assert_eq!(block.cursor(), 4);
        // Cursor at end: any further access fails.
        assert!(block.read_u8().is_err());
        assert!(block.write_u8(0).is_err());
    }

    #[test]
    fn test_seek_bounds() {
        let mut block = Block::create(0, 10).unwrap();
        assert_eq!(block.seek(4, false), 4);
        assert_eq!(block.seek(3, true), 7);
        // Targets at or past the length are ignored.
        assert_eq!(block.seek(10, false), 7);
        assert_eq!(block.seek(9, true), 7);

        assert_eq!(block.seek_back(2, false), 8);
        assert_eq!(block.seek_back(3, true), 5);
        // Non-positive targets are ignored.
        assert_eq!(block.seek_back(10, false), 5);
        assert_eq!(block.seek_back(6, true), 5);
    }

    #[test]
    fn test_resize_preserves_and_clamps() {
        let mut block = Block::create(1, 6).unwrap();
        block.write(&[1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(block.cursor(), 6);

        block.resize(4).unwrap();
        assert_eq!(block.length(), 4);
        assert_eq!(block.cursor(), 3);

        block.resize(8).unwrap();
        block.seek(0, false);
        let mut out = [0u8; 8];
        block.read(&mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4, 0, 0, 0, 0]);

        assert!(block.resize(0).is_err());
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut block = Block::create(7, 16).unwrap();
        block.seek(5, false);
        block.clear();
        assert_eq!(block.block_type(), 0);
        assert_eq!(block.length(), 0);
        assert_eq!(block.cursor(), 0);
    }

    #[test]
    fn test_copy_data_and_serialized() {
        let mut block = Block::create(9, 6).unwrap();
        block.seek(4, false);
        block.write(&[0xAA, 0xBB]).unwrap();

        let mut buf = SqrlBuffer::from_bytes(b"x");
        block.copy_data(&mut buf, true).unwrap();
        assert_eq!(buf.len(), 7);
        block.copy_data(&mut buf, false).unwrap();
        assert_eq!(buf.len(), 6);

        let bytes = block.serialized().unwrap();
        assert_eq!(bytes, vec![6, 0, 9, 0, 0xAA, 0xBB]);
    }
}
