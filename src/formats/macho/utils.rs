//! Utility functions for Mach-O parsing

use crate::formats::macho::types::{ByteOrder, MachoError, Result};

/// Trait for reading fixed-width fields with an explicit byte order.
///
/// Reads never panic: anything past the end of the slice reports the
/// record being decoded as malformed.
pub trait EndianRead {
    fn read_u8(&self, offset: usize, what: &'static str) -> Result<u8>;
    fn read_u16(&self, offset: usize, order: ByteOrder, what: &'static str) -> Result<u16>;
    fn read_u32(&self, offset: usize, order: ByteOrder, what: &'static str) -> Result<u32>;
    fn read_u64(&self, offset: usize, order: ByteOrder, what: &'static str) -> Result<u64>;
}

fn field<const N: usize>(data: &[u8], offset: usize, what: &'static str) -> Result<[u8; N]> {
    offset
        .checked_add(N)
        .and_then(|end| data.get(offset..end))
        .and_then(|s| <[u8; N]>::try_from(s).ok())
        .ok_or_else(|| MachoError::truncated(what, offset as u64, N))
}

impl EndianRead for [u8] {
    fn read_u8(&self, offset: usize, what: &'static str) -> Result<u8> {
        field::<1>(self, offset, what).map(|b| b[0])
    }

    fn read_u16(&self, offset: usize, order: ByteOrder, what: &'static str) -> Result<u16> {
        let bytes = field::<2>(self, offset, what)?;
        Ok(match order {
            ByteOrder::Little => u16::from_le_bytes(bytes),
            ByteOrder::Big => u16::from_be_bytes(bytes),
        })
    }

    fn read_u32(&self, offset: usize, order: ByteOrder, what: &'static str) -> Result<u32> {
        let bytes = field::<4>(self, offset, what)?;
        Ok(match order {
            ByteOrder::Little => u32::from_le_bytes(bytes),
            ByteOrder::Big => u32::from_be_bytes(bytes),
        })
    }

    fn read_u64(&self, offset: usize, order: ByteOrder, what: &'static str) -> Result<u64> {
        let bytes = field::<8>(self, offset, what)?;
        Ok(match order {
            ByteOrder::Little => u64::from_le_bytes(bytes),
            ByteOrder::Big => u64::from_be_bytes(bytes),
        })
    }
}

/// Slice out a whole record, failing if fewer than `size` bytes remain.
pub fn record<'a>(
    data: &'a [u8],
    offset: usize,
    size: usize,
    what: &'static str,
) -> Result<&'a [u8]> {
    offset
        .checked_add(size)
        .and_then(|end| data.get(offset..end))
        .ok_or_else(|| MachoError::truncated(what, offset as u64, size))
}

/// Decode a fixed 16-byte, NUL-padded name (segment and section names).
pub fn fixed_name(data: &[u8], offset: usize, what: &'static str) -> Result<String> {
    let raw = field::<16>(data, offset, what)?;
    let end = memchr::memchr(0, &raw).unwrap_or(raw.len());
    Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
}

/// Read a NUL-terminated string starting at `offset`, scanning at most
/// `max_len` bytes. Returns `None` if the bytes are not UTF-8, and the whole
/// remainder (capped) when no terminator is found.
pub fn read_cstring(data: &[u8], offset: usize, max_len: usize) -> Option<&str> {
    let slice = data.get(offset..)?;
    let window = &slice[..slice.len().min(max_len)];
    let end = memchr::memchr(0, window).unwrap_or(window.len());
    std::str::from_utf8(&window[..end]).ok()
}
