//! Method list decoding.

use bitflags::bitflags;
use tracing::trace;

use super::context::ParseContext;
use super::layout::{MethodEncoding, LIST_HEADER};
use super::model::{ClassRecord, Language, Method, MethodKind};
use super::reader::advance;
use crate::error::{Error, Result};

bitflags! {
    /// Flags stored in the `entsize` word of a method list.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodListFlags: u32 {
        /// Entries use 32-bit relative offsets
        const SMALL = 0x8000_0000;
        /// Names are selector offsets into a shared cache string table
        const PREOPT = 0x3;
    }
}

/// Bits of `entsize` that are flags rather than size.
pub const ENTSIZE_FLAG_MASK: u32 = 0xFFFF_0003;

impl MethodListFlags {
    /// Returns the entry encoding.
    #[inline]
    pub fn encoding(self) -> MethodEncoding {
        if self.contains(Self::SMALL) {
            MethodEncoding::Small
        } else {
            MethodEncoding::Legacy
        }
    }
}

/// Validates a list's declared count against the buffer.
///
/// The count must be in `[1, i32::MAX]` and `count * entry_size` bytes from
/// `offset` must fit inside the buffer.
pub(crate) fn check_count(
    ctx: &ParseContext<'_, '_>,
    addr: u64,
    offset: u64,
    count: u64,
    entry_size: u64,
) -> Result<()> {
    let malformed = Error::MalformedCount { addr, count };
    if count < 1 || count > i32::MAX as u64 {
        return Err(malformed);
    }
    let end = count
        .checked_mul(entry_size)
        .and_then(|span| span.checked_add(offset));
    match end {
        Some(end) if end <= ctx.image().size() => Ok(()),
        _ => Err(malformed),
    }
}

/// Decodes the method list at `list_addr` into `class`.
///
/// `scope` is recorded as each method's namespace. Entries whose
/// implementation address is zero are dropped; any other failure abandons
/// the rest of the list and keeps the methods decoded so far.
pub fn parse_method_list(
    ctx: &ParseContext<'_, '_>,
    class: &mut ClassRecord,
    scope: Option<&str>,
    kind: MethodKind,
    list_addr: u64,
) -> Result<()> {
    let reader = ctx.reader;
    let at = reader.resolve(list_addr)?;
    let header = reader.read_fields(&LIST_HEADER, at)?;
    let entsize = header.u32(0);
    let count = header.u32(1) as u64;
    check_count(
        ctx,
        list_addr,
        at.offset,
        count,
        (entsize & !ENTSIZE_FLAG_MASK) as u64,
    )?;

    let flags = MethodListFlags::from_bits_retain(entsize);
    let encoding = flags.encoding();
    let layout = encoding.layout();
    let step = layout.size(reader.width()) as u64;
    let encrypted = ctx.image().is_encrypted();

    let first = advance(list_addr, LIST_HEADER.size(reader.width()) as u64)?;
    for i in 0..count {
        let p = advance(first, i * step)?;
        let entry = reader.read_fields_va(layout, p)?;

        let (name_ptr, types, imp) = match encoding {
            MethodEncoding::Legacy => (entry.get(0), entry.get(1), entry.get(2)),
            MethodEncoding::Small => {
                let base = ctx.sel_string_base().unwrap_or(p);
                let name = base.wrapping_add_signed(entry.signed(0));
                let name = if flags.contains(MethodListFlags::PREOPT) {
                    name
                } else {
                    // Selector reference holding the name pointer
                    reader.read_ptr_va(name)?
                };
                let types = p.wrapping_add_signed(entry.signed(1)).wrapping_add(4);
                let imp = p.wrapping_add_signed(entry.signed(2)).wrapping_add(8);
                (name, types, imp)
            }
        };

        if imp == 0 {
            trace!("Dropping method at {:#x} without implementation", p);
            continue;
        }

        let name = reader.read_name(name_ptr);
        let signature = reader.read_name(types);
        let return_type = if encrypted {
            signature.clone()
        } else {
            signature
                .as_deref()
                .and_then(first_type)
                .map(str::to_string)
        };

        let mut address = imp;
        if ctx.image().is_thumb() && address & 1 != 0 {
            address &= !1;
        }

        class.methods.push(Method {
            name,
            class_name: scope.map(str::to_string),
            signature,
            return_type,
            address,
            kind,
            language: Language::ObjC,
        });
    }
    Ok(())
}

/// Returns the first complete type of an ObjC type encoding.
///
/// Leading qualifiers (`r`, `n`, `N`, `o`, `O`, `R`, `V`, `A`) belong to the
/// returned type.
pub fn first_type(encoding: &str) -> Option<&str> {
    let end = type_end(encoding.as_bytes(), 0)?;
    encoding.get(..end)
}

fn type_end(bytes: &[u8], mut i: usize) -> Option<usize> {
    while matches!(bytes.get(i), Some(b'r' | b'n' | b'N' | b'o' | b'O' | b'R' | b'V' | b'A')) {
        i += 1;
    }
    match *bytes.get(i)? {
        b'@' => {
            i += 1;
            match bytes.get(i) {
                Some(b'"') => {
                    let close = memchr::memchr(b'"', &bytes[i + 1..])?;
                    Some(i + close + 2)
                }
                Some(b'?') => Some(i + 1),
                _ => Some(i),
            }
        }
        b'^' => type_end(bytes, i + 1),
        open @ (b'{' | b'(' | b'[') => {
            let close = match open {
                b'{' => b'}',
                b'(' => b')',
                _ => b']',
            };
            let mut depth = 0usize;
            for (j, &b) in bytes.iter().enumerate().skip(i) {
                if b == open {
                    depth += 1;
                } else if b == close {
                    depth -= 1;
                    if depth == 0 {
                        return Some(j + 1);
                    }
                }
            }
            None
        }
        b'b' => {
            let digits = bytes[i + 1..]
                .iter()
                .take_while(|b| b.is_ascii_digit())
                .count();
            Some(i + 1 + digits)
        }
        _ => Some(i + 1),
    }
}
