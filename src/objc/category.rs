//! Category decoding.

use super::class::{fast_data, CLASS_DATA, RO_NAME};
use super::context::{recover, ParseContext};
use super::demangle::demangle_classname;
use super::layout::{CATEGORY, CLASS, CLASS_RO};
use super::method::parse_method_list;
use super::model::{ClassRecord, Language, MethodKind, Name};
use super::property::parse_property_list;
use super::protocol::parse_protocol_list;
use super::reader::advance;
use crate::error::Result;

const CATEGORY_NAME: usize = 0;
const CATEGORY_TARGET: usize = 1;
const CATEGORY_INSTANCE_METHODS: usize = 2;
const CATEGORY_CLASS_METHODS: usize = 3;
const CATEGORY_PROTOCOLS: usize = 4;
const CATEGORY_PROPERTIES: usize = 5;

/// Decodes the category at `addr` into a record named `Target(Category)`.
///
/// Returns `Ok(None)` when the category or its target cannot be named. The
/// target becomes the record's superclass.
pub fn parse_category(ctx: &ParseContext<'_, '_>, addr: u64) -> Result<Option<ClassRecord>> {
    let reader = ctx.reader;
    let ptr = reader.ptr_size();
    let category = reader.read_fields_va(&CATEGORY, addr)?;

    let Some(category_name) = reader.read_name(category.get(CATEGORY_NAME)) else {
        return Ok(None);
    };

    let target_addr = category.get(CATEGORY_TARGET);
    let target = if target_addr == 0 {
        // External class, bound through a relocation on the target slot
        match addr.checked_add(ptr).and_then(|slot| ctx.relocated_class(slot)) {
            Some(name) => name.to_string(),
            None => return Ok(None),
        }
    } else {
        target_name(ctx, target_addr)?.unwrap_or_default()
    };

    let mut class = ClassRecord::new(Language::ObjC);
    class.name = format!("{}({})", target, category_name);
    class.address = addr;
    if !target.is_empty() {
        class.push_superclass(Name::new(target));
    }

    let scope = class.name.clone();
    for (slot, kind) in [
        (CATEGORY_INSTANCE_METHODS, MethodKind::Instance),
        (CATEGORY_CLASS_METHODS, MethodKind::Class),
    ] {
        let methods = category.get(slot);
        if methods != 0 {
            recover(
                parse_method_list(ctx, &mut class, Some(&scope), kind, methods),
                "category method list",
                methods,
            );
        }
    }
    let protocols = category.get(CATEGORY_PROTOCOLS);
    if protocols != 0 {
        recover(
            parse_protocol_list(ctx, &mut class, protocols),
            "category protocol list",
            protocols,
        );
    }
    let properties = category.get(CATEGORY_PROPERTIES);
    if properties != 0 {
        recover(
            parse_property_list(ctx, &mut class, properties),
            "category property list",
            properties,
        );
    }
    Ok(Some(class))
}

/// Reads a target class's name straight from its `class_ro_t` name slot.
///
/// Bit 0 of the slot address is a tag and is cleared before the read.
fn target_name(ctx: &ParseContext<'_, '_>, class_addr: u64) -> Result<Option<String>> {
    let reader = ctx.reader;
    let width = reader.width();
    let data = reader.read_ptr_va(advance(
        class_addr,
        CLASS.offset_of(CLASS_DATA, width) as u64,
    )?)?;
    let name_slot = advance(
        fast_data(data, width),
        CLASS_RO.offset_of(RO_NAME, width) as u64,
    )?;
    let name_ptr = reader.read_ptr_va(name_slot & !1)?;
    Ok(reader.read_name(name_ptr).map(|n| demangle_classname(&n)))
}
