//! Utility functions for binary data processing.
//!
//! This module provides small primitives shared by the container parser and
//! the metadata decoders:
//! - Unaligned little-endian reads (using byteorder for optimal codegen)
//! - SIMD-accelerated NUL searches (via memchr)
//! - LEB128 decoding for dyld opcode streams

use byteorder::{ByteOrder, LittleEndian};

// =============================================================================
// Fast Unaligned Reads
// =============================================================================

/// Reads a little-endian u64 from a byte slice at the given offset.
///
/// # Panics
///
/// Panics if `offset + 8 > data.len()`.
#[inline(always)]
pub fn read_u64_le_at(data: &[u8], offset: usize) -> u64 {
    LittleEndian::read_u64(&data[offset..])
}

/// Reads a little-endian u32 from a byte slice at the given offset.
///
/// # Panics
///
/// Panics if `offset + 4 > data.len()`.
#[inline(always)]
pub fn read_u32_le_at(data: &[u8], offset: usize) -> u32 {
    LittleEndian::read_u32(&data[offset..])
}

/// Reads a little-endian u16 from a byte slice at the given offset.
///
/// # Panics
///
/// Panics if `offset + 2 > data.len()`.
#[inline(always)]
pub fn read_u16_le_at(data: &[u8], offset: usize) -> u16 {
    LittleEndian::read_u16(&data[offset..])
}

// =============================================================================
// SIMD-Accelerated Byte Search
// =============================================================================

/// Finds the position of the first null byte in a slice.
///
/// Returns `data.len()` when there is no terminator.
#[inline(always)]
pub fn memchr_null(data: &[u8]) -> usize {
    memchr::memchr(0, data).unwrap_or(data.len())
}

/// Decodes the bytes up to the first NUL as a (lossy) UTF-8 string.
#[inline]
pub fn c_str_lossy(data: &[u8]) -> String {
    let end = memchr_null(data);
    String::from_utf8_lossy(&data[..end]).into_owned()
}

/// Decodes a fixed, NUL-padded name field (segment and section names).
#[inline]
pub fn fixed_name(data: &[u8]) -> &str {
    let end = memchr_null(data);
    std::str::from_utf8(&data[..end]).unwrap_or("")
}

// =============================================================================
// LEB128
// =============================================================================

/// Reads an unsigned LEB128 value with fast paths for common cases.
///
/// # Returns
///
/// `(value, bytes_consumed)` or `None` if invalid.
#[inline(always)]
pub fn read_uleb128_fast(data: &[u8]) -> Option<(u64, usize)> {
    if data.is_empty() {
        return None;
    }

    let b0 = data[0];

    // Single byte (0-127), the most common case
    if b0 < 0x80 {
        return Some((b0 as u64, 1));
    }

    let mut result: u64 = 0;
    let mut shift = 0u32;

    for (i, &byte) in data.iter().enumerate() {
        if shift >= 64 {
            return None;
        }

        result |= ((byte & 0x7F) as u64) << shift;
        shift += 7;

        if byte < 0x80 {
            return Some((result, i + 1));
        }
    }

    None
}

/// Reads a signed LEB128 value.
#[inline(always)]
pub fn read_sleb128_fast(data: &[u8]) -> Option<(i64, usize)> {
    let mut result: i64 = 0;
    let mut shift = 0u32;

    for (i, &byte) in data.iter().enumerate() {
        if shift >= 64 {
            return None;
        }

        result |= ((byte & 0x7F) as i64) << shift;
        shift += 7;

        if byte < 0x80 {
            if shift < 64 && (byte & 0x40) != 0 {
                result |= !0_i64 << shift;
            }
            return Some((result, i + 1));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_le() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        assert_eq!(read_u64_le_at(&data, 0), 0x0807060504030201);
        assert_eq!(read_u32_le_at(&data, 4), 0x08070605);
        assert_eq!(read_u16_le_at(&data, 2), 0x0403);
    }

    #[test]
    fn test_memchr_null() {
        assert_eq!(memchr_null(b"hello\0world"), 5);
        assert_eq!(memchr_null(b"\0"), 0);
        assert_eq!(memchr_null(b"hello"), 5);
    }

    #[test]
    fn test_c_str_lossy() {
        assert_eq!(c_str_lossy(b"NSObject\0junk"), "NSObject");
        assert_eq!(c_str_lossy(b"unterminated"), "unterminated");
        assert_eq!(fixed_name(b"__objc_classlist"), "__objc_classlist");
        assert_eq!(fixed_name(b"__text\0\0\0\0\0\0\0\0\0\0"), "__text");
    }

    #[test]
    fn test_uleb128_fast() {
        assert_eq!(read_uleb128_fast(&[0x00]), Some((0, 1)));
        assert_eq!(read_uleb128_fast(&[0x7F]), Some((127, 1)));
        assert_eq!(read_uleb128_fast(&[0x80, 0x01]), Some((128, 2)));
        assert_eq!(read_uleb128_fast(&[0xE5, 0x8E, 0x26]), Some((624485, 3)));
        assert_eq!(read_uleb128_fast(&[0x80]), None);
        assert_eq!(read_uleb128_fast(&[]), None);
    }

    #[test]
    fn test_sleb128_fast() {
        assert_eq!(read_sleb128_fast(&[0x00]), Some((0, 1)));
        assert_eq!(read_sleb128_fast(&[0x3F]), Some((63, 1)));
        assert_eq!(read_sleb128_fast(&[0x7F]), Some((-1, 1)));
        assert_eq!(read_sleb128_fast(&[0x80, 0x7F]), Some((-128, 2)));
    }
}
