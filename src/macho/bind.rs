//! Dyld bind opcode parsing.
//!
//! Bind info (from `LC_DYLD_INFO`) is a stream of opcodes that set up a
//! symbol, segment and offset, then emit one or more binds. Each bind names
//! the imported symbol a pointer slot will receive at load time; the
//! metadata decoders use these to name external superclasses and category
//! targets.

use crate::error::{Error, Result};
use crate::util::{memchr_null, read_sleb128_fast, read_uleb128_fast};

use super::constants::bind_opcodes::*;

/// Which bind stream is being parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindKind {
    /// Regular binds
    Regular,
    /// Weak binds
    Weak,
    /// Lazy binds. `BIND_OPCODE_DONE` separates entries instead of ending
    /// the stream.
    Lazy,
}

/// A binding record from parsing bind opcodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindRecord {
    /// Segment index
    pub segment_index: u8,
    /// Offset within segment
    pub segment_offset: u64,
    /// Binding type
    pub bind_type: u8,
    /// Symbol name
    pub symbol_name: String,
    /// Dylib ordinal
    pub ordinal: i64,
    /// Addend
    pub addend: i64,
}

#[inline]
fn uleb(data: &[u8], cursor: &mut usize) -> Result<u64> {
    let (value, len) = data
        .get(*cursor..)
        .and_then(read_uleb128_fast)
        .ok_or(Error::InvalidUleb128 { offset: *cursor })?;
    *cursor += len;
    Ok(value)
}

#[inline]
fn sleb(data: &[u8], cursor: &mut usize) -> Result<i64> {
    let (value, len) = data
        .get(*cursor..)
        .and_then(read_sleb128_fast)
        .ok_or(Error::InvalidUleb128 { offset: *cursor })?;
    *cursor += len;
    Ok(value)
}

/// Parses bind info opcodes.
///
/// # Arguments
///
/// * `data` - The raw bind info data
/// * `pointer_size` - Size of a bound pointer slot (4 or 8)
/// * `kind` - Which stream `data` holds
pub fn parse_bind_info(data: &[u8], pointer_size: u64, kind: BindKind) -> Result<Vec<BindRecord>> {
    let mut records = Vec::new();
    let mut cursor = 0usize;

    let mut segment_index: u8 = 0;
    let mut segment_offset: u64 = 0;
    let mut bind_type: u8 = 0;
    let mut symbol_name = String::new();
    let mut ordinal: i64 = 0;
    let mut addend: i64 = 0;

    macro_rules! bind {
        () => {
            records.push(BindRecord {
                segment_index,
                segment_offset,
                bind_type,
                symbol_name: symbol_name.clone(),
                ordinal,
                addend,
            })
        };
    }

    while cursor < data.len() {
        let byte = data[cursor];
        let opcode = byte & BIND_OPCODE_MASK;
        let immediate = byte & BIND_IMMEDIATE_MASK;
        cursor += 1;

        match opcode {
            BIND_OPCODE_DONE => {
                if kind != BindKind::Lazy {
                    break;
                }
            }

            BIND_OPCODE_SET_DYLIB_ORDINAL_IMM => {
                ordinal = immediate as i64;
            }

            BIND_OPCODE_SET_DYLIB_ORDINAL_ULEB => {
                ordinal = uleb(data, &mut cursor)? as i64;
            }

            BIND_OPCODE_SET_DYLIB_SPECIAL_IMM => {
                if immediate == 0 {
                    ordinal = 0;
                } else {
                    ordinal = (BIND_OPCODE_MASK | immediate) as i8 as i64;
                }
            }

            BIND_OPCODE_SET_SYMBOL_TRAILING_FLAGS_IMM => {
                let rest = &data[cursor..];
                let end = memchr_null(rest);
                symbol_name = String::from_utf8_lossy(&rest[..end]).into_owned();
                cursor += end + 1;
            }

            BIND_OPCODE_SET_TYPE_IMM => {
                bind_type = immediate;
            }

            BIND_OPCODE_SET_ADDEND_SLEB => {
                addend = sleb(data, &mut cursor)?;
            }

            BIND_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB => {
                segment_index = immediate;
                segment_offset = uleb(data, &mut cursor)?;
            }

            BIND_OPCODE_ADD_ADDR_ULEB => {
                let val = uleb(data, &mut cursor)?;
                segment_offset = segment_offset.wrapping_add(val);
            }

            BIND_OPCODE_DO_BIND => {
                bind!();
                segment_offset = segment_offset.wrapping_add(pointer_size);
            }

            BIND_OPCODE_DO_BIND_ADD_ADDR_ULEB => {
                bind!();
                let val = uleb(data, &mut cursor)?;
                segment_offset = segment_offset.wrapping_add(pointer_size).wrapping_add(val);
            }

            BIND_OPCODE_DO_BIND_ADD_ADDR_IMM_SCALED => {
                bind!();
                segment_offset = segment_offset
                    .wrapping_add(pointer_size + immediate as u64 * pointer_size);
            }

            BIND_OPCODE_DO_BIND_ULEB_TIMES_SKIPPING_ULEB => {
                let count = uleb(data, &mut cursor)?;
                let skip = uleb(data, &mut cursor)?;

                for _ in 0..count {
                    bind!();
                    segment_offset = segment_offset.wrapping_add(pointer_size).wrapping_add(skip);
                }
            }

            BIND_OPCODE_THREADED => {
                // Threaded binds live in the pointer chains, not in this stream
                if immediate == BIND_SUBOPCODE_THREADED_SET_BIND_ORDINAL_TABLE_SIZE_ULEB {
                    uleb(data, &mut cursor)?;
                }
            }

            _ => {
                return Err(Error::parse(
                    cursor - 1,
                    format!("unknown bind opcode {:#x}", byte),
                ));
            }
        }
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_sequence() {
        let data = [
            BIND_OPCODE_SET_DYLIB_ORDINAL_IMM | 1,
            BIND_OPCODE_SET_SYMBOL_TRAILING_FLAGS_IMM,
            b'_', b'a', 0,
            BIND_OPCODE_SET_TYPE_IMM | 1,
            BIND_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB | 2,
            0x10,
            BIND_OPCODE_DO_BIND,
            BIND_OPCODE_DO_BIND_ADD_ADDR_IMM_SCALED | 1,
            BIND_OPCODE_DO_BIND_ULEB_TIMES_SKIPPING_ULEB,
            2,
            8,
            BIND_OPCODE_DONE,
            BIND_OPCODE_DO_BIND,
        ];

        let records = parse_bind_info(&data, 8, BindKind::Regular).unwrap();
        let offsets: Vec<u64> = records.iter().map(|r| r.segment_offset).collect();
        assert_eq!(offsets, [0x10, 0x18, 0x28, 0x38]);
        assert!(records.iter().all(|r| r.symbol_name == "_a"));
        assert!(records.iter().all(|r| r.segment_index == 2 && r.ordinal == 1));
    }

    #[test]
    fn test_lazy_stream_continues_after_done() {
        let data = [
            BIND_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB | 1,
            0x00,
            BIND_OPCODE_SET_SYMBOL_TRAILING_FLAGS_IMM,
            b'_', b'x', 0,
            BIND_OPCODE_DO_BIND,
            BIND_OPCODE_DONE,
            BIND_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB | 1,
            0x04,
            BIND_OPCODE_SET_SYMBOL_TRAILING_FLAGS_IMM,
            b'_', b'y', 0,
            BIND_OPCODE_DO_BIND,
            BIND_OPCODE_DONE,
        ];

        let lazy = parse_bind_info(&data, 4, BindKind::Lazy).unwrap();
        assert_eq!(lazy.len(), 2);
        assert_eq!(lazy[1].symbol_name, "_y");
        assert_eq!(lazy[1].segment_offset, 4);

        let regular = parse_bind_info(&data, 4, BindKind::Regular).unwrap();
        assert_eq!(regular.len(), 1);
    }

    #[test]
    fn test_special_ordinal_and_addend() {
        let data = [
            BIND_OPCODE_SET_DYLIB_SPECIAL_IMM | 0x0E,
            BIND_OPCODE_SET_ADDEND_SLEB,
            0x7F,
            BIND_OPCODE_DO_BIND,
        ];
        let records = parse_bind_info(&data, 8, BindKind::Weak).unwrap();
        assert_eq!(records[0].ordinal, -2);
        assert_eq!(records[0].addend, -1);
    }

    #[test]
    fn test_truncated_uleb() {
        let data = [BIND_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB | 1, 0x80];
        assert!(matches!(
            parse_bind_info(&data, 8, BindKind::Regular),
            Err(Error::InvalidUleb128 { offset: 1 })
        ));
        assert!(parse_bind_info(&[0xE0], 8, BindKind::Regular).is_err());
    }
}
