//! Bounds-checked big-endian reader.

use crate::core::WireError;

/// Sequential reader over any byte buffer.
///
/// Every read checks the remaining length first. On failure it returns
/// [`WireError::TruncatedInput`] and leaves the position where it was, so a
/// caller can extend the buffer (through [`get_mut`](Self::get_mut) for owned
/// buffers) and retry, or roll back with [`set_pos`](Self::set_pos).
#[derive(Debug, Clone)]
pub struct WireCursor<B> {
    buf: B,
    pos: usize,
}

impl<B: AsRef<[u8]>> WireCursor<B> {
    /// Create a cursor at position 0.
    pub fn new(buf: B) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes left after the current position.
    pub fn remaining(&self) -> usize {
        self.buf.as_ref().len().saturating_sub(self.pos)
    }

    /// Current position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Move to an absolute position (clamped to the buffer length).
    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos.min(self.buf.as_ref().len());
    }

    /// Borrow the underlying buffer.
    pub fn get_ref(&self) -> &B {
        &self.buf
    }

    /// Mutably borrow the underlying buffer.
    pub fn get_mut(&mut self) -> &mut B {
        &mut self.buf
    }

    /// Unwrap the underlying buffer.
    pub fn into_inner(self) -> B {
        self.buf
    }

    /// Bytes after the current position.
    pub fn rest(&self) -> &[u8] {
        &self.buf.as_ref()[self.pos.min(self.buf.as_ref().len())..]
    }

    fn window(&self, n: usize) -> Result<&[u8], WireError> {
        let remaining = self.remaining();
        if n > remaining {
            return Err(WireError::TruncatedInput {
                needed: n,
                remaining,
            });
        }
        Ok(&self.buf.as_ref()[self.pos..self.pos + n])
    }

    fn array<const N: usize>(&self) -> Result<[u8; N], WireError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.window(N)?);
        Ok(out)
    }

    /// Peek one byte.
    pub fn peek_u8(&self) -> Result<u8, WireError> {
        Ok(self.window(1)?[0])
    }

    /// Peek a big-endian u16.
    pub fn peek_u16(&self) -> Result<u16, WireError> {
        self.array().map(u16::from_be_bytes)
    }

    /// Peek a big-endian 24-bit value.
    pub fn peek_u24(&self) -> Result<u32, WireError> {
        let [a, b, c] = self.array()?;
        Ok(u32::from_be_bytes([0, a, b, c]))
    }

    /// Peek a big-endian u32.
    pub fn peek_u32(&self) -> Result<u32, WireError> {
        self.array().map(u32::from_be_bytes)
    }

    /// Peek a big-endian u64.
    pub fn peek_u64(&self) -> Result<u64, WireError> {
        self.array().map(u64::from_be_bytes)
    }

    /// Peek `n` bytes.
    pub fn peek_bytes(&self, n: usize) -> Result<&[u8], WireError> {
        self.window(n)
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        let v = self.peek_u8()?;
        self.pos += 1;
        Ok(v)
    }

    /// Read a big-endian u16.
    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        let v = self.peek_u16()?;
        self.pos += 2;
        Ok(v)
    }

    /// Read a big-endian 24-bit value.
    pub fn read_u24(&mut self) -> Result<u32, WireError> {
        let v = self.peek_u24()?;
        self.pos += 3;
        Ok(v)
    }

    /// Read a big-endian u32.
    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        let v = self.peek_u32()?;
        self.pos += 4;
        Ok(v)
    }

    /// Read a big-endian u64.
    pub fn read_u64(&mut self) -> Result<u64, WireError> {
        let v = self.peek_u64()?;
        self.pos += 8;
        Ok(v)
    }

    /// Read `n` bytes, borrowing from the buffer.
    pub fn read_bytes(&mut self, n: usize) -> Result<&[u8], WireError> {
        self.window(n)?;
        let start = self.pos;
        self.pos += n;
        Ok(&self.buf.as_ref()[start..start + n])
    }

    /// Advance `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<(), WireError> {
        self.window(n)?;
        self.pos += n;
        Ok(())
    }
}
