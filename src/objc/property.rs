//! Property list decoding.

use super::context::ParseContext;
use super::layout::{LIST_HEADER, PROPERTY};
use super::method::check_count;
use super::model::{ClassRecord, Field, FieldKind, Name};
use super::reader::advance;
use crate::error::Result;

/// Extracts the type from a property attribute string (`T@"NSString",&,N,V_name`).
pub fn attribute_type(attributes: &str) -> Option<&str> {
    attributes
        .split(',')
        .find_map(|attr| attr.strip_prefix('T'))
        .filter(|ty| !ty.is_empty())
}

/// Decodes the property list at `list_addr` into `class`.
///
/// Properties have no layout offset; their position in the list is
/// recorded instead.
pub fn parse_property_list(
    ctx: &ParseContext<'_, '_>,
    class: &mut ClassRecord,
    list_addr: u64,
) -> Result<()> {
    let reader = ctx.reader;
    let width = reader.width();
    let at = reader.resolve(list_addr)?;
    let count = reader.read_fields(&LIST_HEADER, at)?.u32(1) as u64;
    let step = PROPERTY.size(width) as u64;
    let header = LIST_HEADER.size(width) as u64;
    check_count(ctx, list_addr, at.offset + header, count, step)?;

    let encrypted = ctx.image().is_encrypted();
    let first = advance(list_addr, header)?;
    for index in 0..count {
        let property = reader.read_fields_va(&PROPERTY, advance(first, index * step)?)?;
        let name_ptr = property.get(0);

        let Some(name) = reader.read_name(name_ptr) else {
            continue;
        };
        let attributes = reader.read_name(property.get(1));
        let type_name = if encrypted {
            attributes.map(Name::new)
        } else {
            attributes
                .as_deref()
                .and_then(attribute_type)
                .map(Name::new)
        };

        class.fields.push(Field {
            name,
            type_name,
            offset: index,
            size: 0,
            alignment: 0,
            address: name_ptr,
            kind: FieldKind::Property,
        });
    }
    Ok(())
}
