//! Chained fixup processing.
//!
//! Images linked with `LC_DYLD_CHAINED_FIXUPS` store pointers as packed
//! chain entries instead of plain addresses. This module walks every chain,
//! rewrites rebases into plain virtual addresses and zeroes binds, recording
//! the imported symbol name for each bound slot.
//!
//! Supported pointer formats:
//! - `DYLD_CHAINED_PTR_ARM64E` and the userland variants (arm64e)
//! - `DYLD_CHAINED_PTR_64` and `DYLD_CHAINED_PTR_64_OFFSET`
//! - `DYLD_CHAINED_PTR_32`

use std::collections::BTreeMap;

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, trace, warn};
use zerocopy::FromBytes;

use super::constants::*;
use super::structs::{ChainedFixupsHeader, SegmentCommand64};
use crate::error::{Error, Result};
use crate::util::{c_str_lossy, read_u16_le_at, read_u32_le_at, read_u64_le_at};

/// A decoded chain entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainedPointer {
    /// Pointer to a location inside the image
    Rebase(u64),
    /// Pointer to an imported symbol
    Bind {
        /// Index into the imports table
        ordinal: u32,
        /// Addend applied to the symbol address
        addend: i64,
    },
}

/// Returns the chain stride in bytes of a pointer format.
pub fn pointer_stride(format: u16) -> Option<u64> {
    match format {
        DYLD_CHAINED_PTR_ARM64E
        | DYLD_CHAINED_PTR_ARM64E_USERLAND
        | DYLD_CHAINED_PTR_ARM64E_USERLAND24 => Some(8),
        DYLD_CHAINED_PTR_64 | DYLD_CHAINED_PTR_64_OFFSET | DYLD_CHAINED_PTR_32 => Some(4),
        _ => None,
    }
}

#[inline]
fn bits(raw: u64, shift: u32, width: u32) -> u64 {
    (raw >> shift) & ((1u64 << width) - 1)
}

#[inline]
fn sign_extend(value: u64, width: u32) -> i64 {
    let shift = 64 - width;
    ((value << shift) as i64) >> shift
}

/// Decodes one chain entry. Returns the entry and the distance to the next
/// one in strides (0 ends the chain).
///
/// `base` is the image's preferred load address, added to targets that are
/// stored as image offsets.
pub fn decode_pointer(
    format: u16,
    raw: u64,
    base: u64,
    max_valid_pointer: u32,
) -> Option<(ChainedPointer, u64)> {
    let entry = match format {
        DYLD_CHAINED_PTR_ARM64E
        | DYLD_CHAINED_PTR_ARM64E_USERLAND
        | DYLD_CHAINED_PTR_ARM64E_USERLAND24 => {
            let next = bits(raw, 51, 11);
            let is_bind = bits(raw, 62, 1) != 0;
            let is_auth = bits(raw, 63, 1) != 0;
            let pointer = match (is_bind, is_auth) {
                (true, auth) => {
                    let ordinal_width = if format == DYLD_CHAINED_PTR_ARM64E_USERLAND24 {
                        24
                    } else {
                        16
                    };
                    let addend = if auth {
                        0
                    } else {
                        sign_extend(bits(raw, 32, 19), 19)
                    };
                    ChainedPointer::Bind {
                        ordinal: bits(raw, 0, ordinal_width) as u32,
                        addend,
                    }
                }
                (false, true) => ChainedPointer::Rebase(base.wrapping_add(bits(raw, 0, 32))),
                (false, false) => {
                    let high8 = bits(raw, 43, 8) << 56;
                    let target = bits(raw, 0, 43);
                    let target = if format == DYLD_CHAINED_PTR_ARM64E {
                        target
                    } else {
                        base.wrapping_add(target)
                    };
                    ChainedPointer::Rebase(high8 | target)
                }
            };
            (pointer, next)
        }

        DYLD_CHAINED_PTR_64 | DYLD_CHAINED_PTR_64_OFFSET => {
            let next = bits(raw, 51, 12);
            let pointer = if bits(raw, 63, 1) != 0 {
                ChainedPointer::Bind {
                    ordinal: bits(raw, 0, 24) as u32,
                    addend: bits(raw, 24, 8) as i64,
                }
            } else {
                let high8 = bits(raw, 36, 8) << 56;
                let target = bits(raw, 0, 36);
                let target = if format == DYLD_CHAINED_PTR_64_OFFSET {
                    base.wrapping_add(target)
                } else {
                    target
                };
                ChainedPointer::Rebase(high8 | target)
            };
            (pointer, next)
        }

        DYLD_CHAINED_PTR_32 => {
            let next = bits(raw, 26, 5);
            let pointer = if bits(raw, 31, 1) != 0 {
                ChainedPointer::Bind {
                    ordinal: bits(raw, 0, 20) as u32,
                    addend: bits(raw, 20, 6) as i64,
                }
            } else {
                let target = bits(raw, 0, 26);
                let max = max_valid_pointer as u64;
                if max != 0 && target > max {
                    // Non-pointer value stored biased into the chain
                    let bias = (0x0400_0000 + max) / 2;
                    ChainedPointer::Rebase(target.wrapping_sub(bias) & 0xFFFF_FFFF)
                } else {
                    ChainedPointer::Rebase(target)
                }
            };
            (pointer, next)
        }

        _ => return None,
    };
    Some(entry)
}

/// Reads the imported symbol names, indexed by bind ordinal.
fn parse_imports(blob: &[u8], header: &ChainedFixupsHeader) -> Result<Vec<String>> {
    let entry_size = match header.imports_format {
        DYLD_CHAINED_IMPORT => 4,
        DYLD_CHAINED_IMPORT_ADDEND => 8,
        DYLD_CHAINED_IMPORT_ADDEND64 => 16,
        other => {
            return Err(Error::parse(
                0,
                format!("unsupported chained import format {}", other),
            ))
        }
    };

    let start = header.imports_offset as usize;
    let count = header.imports_count as usize;
    let end = count
        .checked_mul(entry_size)
        .and_then(|len| start.checked_add(len))
        .filter(|&end| end <= blob.len())
        .ok_or_else(|| {
            Error::buffer_too_small(
                start.saturating_add(count.saturating_mul(entry_size)),
                blob.len(),
            )
        })?;
    let symbols = blob
        .get(header.symbols_offset as usize..)
        .unwrap_or_default();

    let mut imports = Vec::with_capacity(count);
    for entry in blob[start..end].chunks_exact(entry_size) {
        let name_offset = if entry_size == 16 {
            (read_u64_le_at(entry, 0) >> 32) as usize
        } else {
            (read_u32_le_at(entry, 0) >> 9) as usize
        };
        let name = symbols
            .get(name_offset..)
            .map(c_str_lossy)
            .unwrap_or_default();
        imports.push(name);
    }
    Ok(imports)
}

/// Applies the chained fixups described by `blob` to `data`.
///
/// `segments` are the image's segments in load command order, matching the
/// segment indices of the fixup table. Returns the bound slots as
/// `virtual address -> symbol name`.
pub fn apply_chained_fixups(
    data: &mut [u8],
    blob: &[u8],
    segments: &[SegmentCommand64],
    base: u64,
) -> Result<BTreeMap<u64, String>> {
    let header = ChainedFixupsHeader::read_from_prefix(blob)
        .map_err(|_| Error::buffer_too_small(ChainedFixupsHeader::SIZE, blob.len()))?
        .0;
    let imports = parse_imports(blob, &header)?;
    debug!(
        "Chained fixups v{}: {} imports (format {})",
        header.fixups_version, header.imports_count, header.imports_format
    );

    let starts = header.starts_offset as usize;
    if starts + 4 > blob.len() {
        return Err(Error::buffer_too_small(starts + 4, blob.len()));
    }
    let seg_count = read_u32_le_at(blob, starts) as usize;

    let mut binds = BTreeMap::new();
    for (index, segment) in segments.iter().enumerate().take(seg_count) {
        let info_at = starts + 4 + index * 4;
        if info_at + 4 > blob.len() {
            break;
        }
        let info = read_u32_le_at(blob, info_at) as usize;
        if info == 0 {
            continue;
        }
        apply_segment(data, blob, starts + info, segment, base, &imports, &mut binds)?;
    }
    Ok(binds)
}

/// Walks every chain of one segment.
fn apply_segment(
    data: &mut [u8],
    blob: &[u8],
    at: usize,
    segment: &SegmentCommand64,
    base: u64,
    imports: &[String],
    binds: &mut BTreeMap<u64, String>,
) -> Result<()> {
    const PAGE_STARTS: usize = 22;
    if at + PAGE_STARTS > blob.len() {
        return Err(Error::buffer_too_small(at + PAGE_STARTS, blob.len()));
    }
    let page_size = read_u16_le_at(blob, at + 4) as u64;
    let format = read_u16_le_at(blob, at + 6);
    let max_valid_pointer = read_u32_le_at(blob, at + 16);
    let page_count = read_u16_le_at(blob, at + 20) as usize;

    let Some(stride) = pointer_stride(format) else {
        warn!(
            "{} in {}, leaving it untouched",
            Error::UnsupportedPointerFormat(format),
            segment.name()
        );
        return Ok(());
    };
    trace!(
        "Segment {}: {} pages, format {}",
        segment.name(),
        page_count,
        format
    );

    let page_start = |i: usize| -> Option<u16> {
        let off = at + PAGE_STARTS + i * 2;
        (off + 2 <= blob.len()).then(|| read_u16_le_at(blob, off))
    };

    for page in 0..page_count {
        let Some(start) = page_start(page) else {
            break;
        };
        if start == DYLD_CHAINED_PTR_START_NONE {
            continue;
        }

        let mut chain_starts = Vec::new();
        if format == DYLD_CHAINED_PTR_32 && start & DYLD_CHAINED_PTR_START_MULTI != 0 {
            let mut index = (start & !DYLD_CHAINED_PTR_START_MULTI) as usize;
            while let Some(entry) = page_start(index) {
                chain_starts.push(entry & !DYLD_CHAINED_PTR_START_LAST);
                if entry & DYLD_CHAINED_PTR_START_LAST != 0 {
                    break;
                }
                index += 1;
            }
        } else {
            chain_starts.push(start);
        }

        for start in chain_starts {
            let offset = page as u64 * page_size + start as u64;
            walk_chain(
                data,
                segment,
                offset,
                format,
                stride,
                base,
                max_valid_pointer,
                imports,
                binds,
            );
        }
    }
    Ok(())
}

/// Rewrites one chain starting `offset` bytes into `segment`.
#[allow(clippy::too_many_arguments)]
fn walk_chain(
    data: &mut [u8],
    segment: &SegmentCommand64,
    mut offset: u64,
    format: u16,
    stride: u64,
    base: u64,
    max_valid_pointer: u32,
    imports: &[String],
    binds: &mut BTreeMap<u64, String>,
) {
    let size = if format == DYLD_CHAINED_PTR_32 { 4 } else { 8 };
    loop {
        let file_offset = (segment.fileoff + offset) as usize;
        if offset + size as u64 > segment.filesize || file_offset + size > data.len() {
            trace!(
                "Chain leaves segment {} at offset {:#x}",
                segment.name(),
                offset
            );
            break;
        }
        let slot = &mut data[file_offset..file_offset + size];
        let raw = if size == 4 {
            LittleEndian::read_u32(slot) as u64
        } else {
            LittleEndian::read_u64(slot)
        };

        let Some((pointer, next)) = decode_pointer(format, raw, base, max_valid_pointer) else {
            break;
        };
        let value = match pointer {
            ChainedPointer::Rebase(target) => target,
            ChainedPointer::Bind { ordinal, .. } => {
                let vaddr = segment.vmaddr + offset;
                match imports.get(ordinal as usize) {
                    Some(name) => {
                        binds.insert(vaddr, name.clone());
                    }
                    None => debug!("Bind at {:#x} has invalid ordinal {}", vaddr, ordinal),
                }
                0
            }
        };
        if size == 4 {
            LittleEndian::write_u32(slot, value as u32);
        } else {
            LittleEndian::write_u64(slot, value);
        }

        if next == 0 {
            break;
        }
        offset += next * stride;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: u64 = 0x1_0000_0000;

    fn put_u16(blob: &mut Vec<u8>, v: u16) {
        blob.extend_from_slice(&v.to_le_bytes());
    }

    fn put_u32(blob: &mut Vec<u8>, v: u32) {
        blob.extend_from_slice(&v.to_le_bytes());
    }

    /// Builds a fixups blob for one segment with one page and a single
    /// `DYLD_CHAINED_IMPORT` entry.
    fn fixups_blob(format: u16, symbol: &str) -> Vec<u8> {
        let mut blob = Vec::new();
        // Header
        put_u32(&mut blob, 0);
        put_u32(&mut blob, 28); // starts_offset
        put_u32(&mut blob, 60); // imports_offset
        put_u32(&mut blob, 64); // symbols_offset
        put_u32(&mut blob, 1);
        put_u32(&mut blob, DYLD_CHAINED_IMPORT);
        put_u32(&mut blob, 0);
        // starts_in_image
        put_u32(&mut blob, 1);
        put_u32(&mut blob, 8);
        // starts_in_segment
        put_u32(&mut blob, 24);
        put_u16(&mut blob, 0x1000);
        put_u16(&mut blob, format);
        blob.extend_from_slice(&0u64.to_le_bytes());
        put_u32(&mut blob, 0);
        put_u16(&mut blob, 1);
        put_u16(&mut blob, 0);
        assert_eq!(blob.len(), 60);
        // Import: lib ordinal 1, name at 1
        put_u32(&mut blob, 1 | (1 << 9));
        blob.push(0);
        blob.extend_from_slice(symbol.as_bytes());
        blob.push(0);
        blob
    }

    fn segment(size: u64) -> SegmentCommand64 {
        let mut seg = SegmentCommand64::default();
        seg.set_name("__DATA");
        seg.vmaddr = BASE;
        seg.vmsize = size;
        seg.fileoff = 0;
        seg.filesize = size;
        seg
    }

    #[test]
    fn test_apply_64_offset() {
        let mut data = vec![0u8; 0x40];
        // Rebase to image offset 0x1234, next entry 2 strides away
        LittleEndian::write_u64(&mut data[0..], 0x1234 | (2 << 51));
        // Bind to import 0, end of chain
        LittleEndian::write_u64(&mut data[8..], 1 << 63);

        let blob = fixups_blob(DYLD_CHAINED_PTR_64_OFFSET, "_OBJC_CLASS_$_NSObject");
        let binds = apply_chained_fixups(&mut data, &blob, &[segment(0x40)], BASE).unwrap();

        assert_eq!(read_u64_le_at(&data, 0), BASE + 0x1234);
        assert_eq!(read_u64_le_at(&data, 8), 0);
        assert_eq!(
            binds.get(&(BASE + 8)).map(String::as_str),
            Some("_OBJC_CLASS_$_NSObject")
        );
    }

    #[test]
    fn test_unsupported_format_left_alone() {
        let mut data = vec![0u8; 0x10];
        LittleEndian::write_u64(&mut data[0..], 0xdead);
        let blob = fixups_blob(0x7F, "_x");
        let binds = apply_chained_fixups(&mut data, &blob, &[segment(0x10)], BASE).unwrap();
        assert!(binds.is_empty());
        assert_eq!(read_u64_le_at(&data, 0), 0xdead);
    }

    #[test]
    fn test_chain_stops_at_segment_end() {
        let mut data = vec![0u8; 0x10];
        // Next entry would be past the segment
        LittleEndian::write_u64(&mut data[0..], 0x10 | (100 << 51));
        let blob = fixups_blob(DYLD_CHAINED_PTR_64, "_x");
        apply_chained_fixups(&mut data, &blob, &[segment(0x10)], BASE).unwrap();
        assert_eq!(read_u64_le_at(&data, 0), 0x10);
    }

    #[test]
    fn test_decode_arm64e() {
        let auth_rebase = (1u64 << 63) | 0x4000;
        assert_eq!(
            decode_pointer(DYLD_CHAINED_PTR_ARM64E, auth_rebase, BASE, 0),
            Some((ChainedPointer::Rebase(BASE + 0x4000), 0))
        );

        let rebase = (0x12u64 << 43) | 0x1_0000_5000 | (3 << 51);
        assert_eq!(
            decode_pointer(DYLD_CHAINED_PTR_ARM64E, rebase, BASE, 0),
            Some((ChainedPointer::Rebase(0x1200_0001_0000_5000), 3))
        );

        let bind = (1u64 << 62) | (5 << 32) | 3;
        assert_eq!(
            decode_pointer(DYLD_CHAINED_PTR_ARM64E_USERLAND, bind, BASE, 0),
            Some((
                ChainedPointer::Bind {
                    ordinal: 3,
                    addend: 5
                },
                0
            ))
        );

        let bind24 = (1u64 << 62) | 0x12_3456;
        assert_eq!(
            decode_pointer(DYLD_CHAINED_PTR_ARM64E_USERLAND24, bind24, BASE, 0)
                .map(|(p, _)| p),
            Some(ChainedPointer::Bind {
                ordinal: 0x12_3456,
                addend: 0
            })
        );
    }

    #[test]
    fn test_decode_32() {
        let rebase = 0x4000u64 | (1 << 26);
        assert_eq!(
            decode_pointer(DYLD_CHAINED_PTR_32, rebase, 0, 0x10_0000),
            Some((ChainedPointer::Rebase(0x4000), 1))
        );
        let bind = (1u64 << 31) | 7;
        assert_eq!(
            decode_pointer(DYLD_CHAINED_PTR_32, bind, 0, 0).map(|(p, _)| p),
            Some(ChainedPointer::Bind {
                ordinal: 7,
                addend: 0
            })
        );
        assert_eq!(decode_pointer(0x7F, 0, 0, 0), None);
    }

    #[test]
    fn test_sign_extend() {
        assert_eq!(sign_extend(0x7FFFF, 19), -1);
        assert_eq!(sign_extend(5, 19), 5);
    }
}
