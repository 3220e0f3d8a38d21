//! Instance variable list decoding.

use tracing::debug;

use super::context::ParseContext;
use super::layout::{IVAR, LIST_HEADER};
use super::method::check_count;
use super::model::{ClassRecord, Field, FieldKind, Name};
use super::reader::advance;
use crate::error::Result;

/// Raw alignment value meaning "pointer aligned".
const ALIGN_POINTER: u32 = u32::MAX;

/// Decodes the ivar list at `list_addr` into `class`.
///
/// Each ivar record points at the slot holding its effective offset; the
/// offset is read through that pointer and left at zero when the slot does
/// not resolve. Ivars without a name are skipped.
pub fn parse_ivar_list(
    ctx: &ParseContext<'_, '_>,
    class: &mut ClassRecord,
    list_addr: u64,
) -> Result<()> {
    let reader = ctx.reader;
    let width = reader.width();
    let at = reader.resolve(list_addr)?;
    let count = reader.read_fields(&LIST_HEADER, at)?.u32(1) as u64;
    let step = IVAR.size(width) as u64;
    let header = LIST_HEADER.size(width) as u64;
    check_count(ctx, list_addr, at.offset + header, count, step)?;

    let first = advance(list_addr, header)?;
    for i in 0..count {
        let p = advance(first, i * step)?;
        let ivar = reader.read_fields_va(&IVAR, p)?;
        let offset_ptr = ivar.get(0);

        let offset = match reader.translate(offset_ptr) {
            Some(slot) if slot.remaining >= 4 => reader.read_u32_pa(slot.offset)? as u64,
            _ => 0,
        };

        let Some(name) = reader.read_name(ivar.get(1)) else {
            debug!("Skipping unnamed ivar at {:#x}", p);
            continue;
        };
        let type_name = reader.read_name(ivar.get(2)).map(Name::new);

        let alignment = match ivar.u32(3) {
            ALIGN_POINTER => reader.ptr_size() as u32,
            raw => 1u32.checked_shl(raw).unwrap_or(0),
        };

        class.fields.push(Field {
            name,
            type_name,
            offset,
            size: ivar.u32(4),
            alignment,
            address: offset_ptr,
            kind: FieldKind::Ivar,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objc::demangle::NoDemangler;
    use crate::objc::model::Language;
    use crate::objc::testutil::ImageBuilder;

    fn decode(b: &ImageBuilder, list: u64) -> (ClassRecord, Result<()>) {
        let image = b.image();
        let ctx = ParseContext::new(&image, None, &NoDemangler);
        let mut class = ClassRecord::new(Language::ObjC);
        let result = parse_ivar_list(&ctx, &mut class, list);
        (class, result)
    }

    #[test]
    fn test_ivar_offsets_through_slot() {
        let mut b = ImageBuilder::le64();
        let off_a = b.ivar_offset(16);
        let off_b = b.ivar_offset(8);
        let name_a = b.string("_title");
        let name_b = b.string("_count");
        let type_a = b.string("@\"NSString\"");
        let type_b = b.string("q");
        let list = b.ivar_list(&[
            (off_a, name_a, type_a, 3, 8),
            (off_b, name_b, type_b, 3, 8),
        ]);

        let (class, result) = decode(&b, list);
        assert!(result.is_ok());
        assert_eq!(class.fields.len(), 2);
        assert_eq!(class.fields[0].name, "_title");
        assert_eq!(class.fields[0].offset, 16);
        assert_eq!(class.fields[0].alignment, 8);
        assert_eq!(class.fields[0].size, 8);
        assert_eq!(class.fields[0].address, off_a);
        assert_eq!(
            class.fields[0].type_name.as_ref().map(|t| t.raw.as_str()),
            Some("@\"NSString\"")
        );
        assert_eq!(class.fields[1].offset, 8);
        assert_eq!(class.fields[1].kind, FieldKind::Ivar);
    }

    #[test]
    fn test_ivar_list_be32() {
        let mut b = ImageBuilder::be32();
        let off = b.ivar_offset(4);
        let name = b.string("_flag");
        let ty = b.string("c");
        let list = b.ivar_list(&[(off, name, ty, 0, 1)]);

        let (class, result) = decode(&b, list);
        assert!(result.is_ok());
        assert_eq!(class.fields[0].name, "_flag");
        assert_eq!(class.fields[0].offset, 4);
        assert_eq!(class.fields[0].alignment, 1);
        assert_eq!(class.fields[0].size, 1);
    }

    #[test]
    fn test_unresolved_parts() {
        let mut b = ImageBuilder::le64();
        let name = b.string("_opaque");
        let unnamed_type = b.string("i");
        let list = b.ivar_list(&[
            // Offset slot and type do not resolve
            (0x7_0000_0000, name, 0x7_0000_0000, ALIGN_POINTER, 8),
            // No name
            (0, 0, unnamed_type, 2, 4),
        ]);

        let (class, result) = decode(&b, list);
        assert!(result.is_ok());
        assert_eq!(class.fields.len(), 1);
        assert_eq!(class.fields[0].offset, 0);
        assert_eq!(class.fields[0].type_name, None);
        assert_eq!(class.fields[0].alignment, 8);
    }

    #[test]
    fn test_oversized_alignment() {
        let mut b = ImageBuilder::le64();
        let name = b.string("_x");
        let list = b.ivar_list(&[(0, name, 0, 40, 4)]);

        let (class, _) = decode(&b, list);
        assert_eq!(class.fields[0].alignment, 0);
    }
}
