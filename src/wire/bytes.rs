//! Big-endian integer writers.
//!
//! Fixed-offset `put_*` functions check bounds and return
//! [`WireError::BufferTooSmall`] instead of panicking. `append_*` grow a `Vec`.
//! 24-bit values are carried in a `u32`; only the low 24 bits are written.

use crate::core::WireError;

/// Largest value representable in 24 bits.
pub const U24_MAX: u32 = 0x00FF_FFFF;

fn slot(buf: &mut [u8], offset: usize, len: usize) -> Result<&mut [u8], WireError> {
    let available = buf.len();
    let end = offset
        .checked_add(len)
        .filter(|end| *end <= available)
        .ok_or(WireError::BufferTooSmall {
            needed: offset.saturating_add(len),
            available,
        })?;
    Ok(&mut buf[offset..end])
}

/// Write `v` at the start of `buf`.
pub fn put_u8(buf: &mut [u8], v: u8) -> Result<(), WireError> {
    put_u8_at(buf, 0, v)
}

/// Write `v` at `offset`.
pub fn put_u8_at(buf: &mut [u8], offset: usize, v: u8) -> Result<(), WireError> {
    slot(buf, offset, 1)?[0] = v;
    Ok(())
}

/// Write `v` big-endian at the start of `buf`.
pub fn put_u16(buf: &mut [u8], v: u16) -> Result<(), WireError> {
    put_u16_at(buf, 0, v)
}

/// Write `v` big-endian at `offset`.
pub fn put_u16_at(buf: &mut [u8], offset: usize, v: u16) -> Result<(), WireError> {
    slot(buf, offset, 2)?.copy_from_slice(&v.to_be_bytes());
    Ok(())
}

/// Write the low 24 bits of `v` big-endian at the start of `buf`.
pub fn put_u24(buf: &mut [u8], v: u32) -> Result<(), WireError> {
    put_u24_at(buf, 0, v)
}

/// Write the low 24 bits of `v` big-endian at `offset`.
pub fn put_u24_at(buf: &mut [u8], offset: usize, v: u32) -> Result<(), WireError> {
    slot(buf, offset, 3)?.copy_from_slice(&v.to_be_bytes()[1..]);
    Ok(())
}

/// Write `v` big-endian at the start of `buf`.
pub fn put_u32(buf: &mut [u8], v: u32) -> Result<(), WireError> {
    put_u32_at(buf, 0, v)
}

/// Write `v` big-endian at `offset`.
pub fn put_u32_at(buf: &mut [u8], offset: usize, v: u32) -> Result<(), WireError> {
    slot(buf, offset, 4)?.copy_from_slice(&v.to_be_bytes());
    Ok(())
}

/// Write `v` big-endian at the start of `buf`.
pub fn put_u64(buf: &mut [u8], v: u64) -> Result<(), WireError> {
    put_u64_at(buf, 0, v)
}

/// Write `v` big-endian at `offset`.
pub fn put_u64_at(buf: &mut [u8], offset: usize, v: u64) -> Result<(), WireError> {
    slot(buf, offset, 8)?.copy_from_slice(&v.to_be_bytes());
    Ok(())
}

/// Append `v` big-endian.
pub fn append_u16(dst: &mut Vec<u8>, v: u16) {
    dst.extend_from_slice(&v.to_be_bytes());
}

/// Append the low 24 bits of `v` big-endian.
pub fn append_u24(dst: &mut Vec<u8>, v: u32) {
    dst.extend_from_slice(&v.to_be_bytes()[1..]);
}
