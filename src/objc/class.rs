//! Class and meta-class decoding.
//!
//! A class is decoded in two passes over the same [`ClassRecord`]: the root
//! pass reads the class itself, then (unless the root turned out to be a
//! meta-class) a single meta pass reads its `isa` to pick up class methods.
//! The meta pass never starts another pass.

use bitflags::bitflags;

use super::context::{recover, ParseContext};
use super::demangle::demangle_classname;
use super::image::PointerWidth;
use super::ivar::parse_ivar_list;
use super::layout::{CLASS, CLASS_RO};
use super::method::parse_method_list;
use super::model::{ClassRecord, MethodKind, Name};
use super::property::parse_property_list;
use super::protocol::parse_protocol_list;
use crate::error::Result;

bitflags! {
    /// `class_ro_t` flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClassRoFlags: u32 {
        /// The record describes a meta-class
        const META = 1 << 0;
        /// The class is a root class
        const ROOT = 1 << 1;
        /// The class has C++ constructors or destructors
        const HAS_CXX_STRUCTORS = 1 << 2;
        /// The class has hidden visibility
        const HIDDEN = 1 << 4;
        /// The class is an exception class
        const EXCEPTION = 1 << 5;
        /// The class was compiled with ARC
        const IS_ARC = 1 << 7;
    }
}

// objc_class slots
const CLASS_ISA: usize = 0;
const CLASS_SUPERCLASS: usize = 1;
pub(crate) const CLASS_DATA: usize = 4;

// class_ro_t slots
const RO_FLAGS: usize = 0;
pub(crate) const RO_NAME: usize = 5;
const RO_BASE_METHODS: usize = 6;
const RO_BASE_PROTOCOLS: usize = 7;
const RO_IVARS: usize = 8;
const RO_BASE_PROPERTIES: usize = 10;

/// Strips the flag bits packed into a class's data pointer.
#[inline]
pub fn fast_data(data: u64, width: PointerWidth) -> u64 {
    match width {
        PointerWidth::Bits64 => data & 0x0000_7FFF_FFFF_FFF8,
        PointerWidth::Bits32 => data & 0xFFFF_FFFC,
    }
}

/// Which half of a class is being decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Root,
    Meta,
}

/// Decodes the class at `class_addr` and its meta-class into `class`.
///
/// The record keeps the address of the class itself, not of its meta-class.
/// Failures inside the class only cut its members short; the record is
/// always usable.
pub fn parse_class(ctx: &ParseContext<'_, '_>, class: &mut ClassRecord, class_addr: u64) {
    let isa = recover(
        decode_class(ctx, class, class_addr, Pass::Root),
        "class",
        class_addr,
    )
    .flatten()
    .filter(|&isa| isa != 0);
    if let Some(isa) = isa {
        recover(
            decode_class(ctx, class, isa, Pass::Meta),
            "meta-class",
            isa,
        );
    }
}

/// Decodes one class record.
///
/// On the root pass, returns the meta-class address to visit next unless the
/// record itself is a meta-class.
fn decode_class(
    ctx: &ParseContext<'_, '_>,
    class: &mut ClassRecord,
    addr: u64,
    pass: Pass,
) -> Result<Option<u64>> {
    let reader = ctx.reader;
    let record = reader.read_fields_va(&CLASS, addr)?;
    if pass == Pass::Root {
        class.address = addr;
    }

    let superclass = record.get(CLASS_SUPERCLASS);
    if superclass != 0 {
        if let Some(name) = get_class_name(ctx, superclass) {
            // A root class's meta-class points back at the class itself
            if pass == Pass::Root || name.display() != class.name {
                class.push_superclass(name);
            }
        }
    } else if let Some(target) = addr
        .checked_add(reader.ptr_size())
        .and_then(|slot| ctx.relocated_class(slot))
    {
        let mut name = Name::new(target);
        if target.starts_with("_T") {
            name = name.with_demangled(ctx.demangler.demangle_swift(target));
        }
        class.push_superclass(name);
    }

    let ro = fast_data(record.get(CLASS_DATA), reader.width());
    let flags = recover(parse_class_ro(ctx, class, ro, pass), "class_ro", ro);
    let is_meta = flags.is_some_and(|f| f.contains(ClassRoFlags::META));

    match pass {
        Pass::Root if !is_meta => Ok(Some(record.get(CLASS_ISA))),
        _ => Ok(None),
    }
}

/// Decodes a `class_ro_t` and the member lists it points to.
fn parse_class_ro(
    ctx: &ParseContext<'_, '_>,
    class: &mut ClassRecord,
    ro_addr: u64,
    pass: Pass,
) -> Result<ClassRoFlags> {
    let reader = ctx.reader;
    let ro = reader.read_fields_va(&CLASS_RO, ro_addr)?;
    let flags = ClassRoFlags::from_bits_retain(ro.u32(RO_FLAGS));

    if let Some(raw) = reader.read_name(ro.get(RO_NAME)) {
        if pass == Pass::Root || class.is_unnamed() {
            class.name = demangle_classname(&raw);
        }
    }

    let kind = if flags.contains(ClassRoFlags::META) {
        MethodKind::Class
    } else {
        MethodKind::Instance
    };
    let scope = (!class.is_unnamed()).then(|| class.name.clone());

    let methods = ro.get(RO_BASE_METHODS);
    if methods != 0 {
        recover(
            parse_method_list(ctx, class, scope.as_deref(), kind, methods),
            "method list",
            methods,
        );
    }
    let protocols = ro.get(RO_BASE_PROTOCOLS);
    if protocols != 0 {
        recover(
            parse_protocol_list(ctx, class, protocols),
            "protocol list",
            protocols,
        );
    }
    let ivars = ro.get(RO_IVARS);
    if ivars != 0 {
        recover(parse_ivar_list(ctx, class, ivars), "ivar list", ivars);
    }
    if pass == Pass::Root {
        class.ensure_isa(reader.ptr_size() as usize);
    }
    class.sort_fields();

    let properties = ro.get(RO_BASE_PROPERTIES);
    if properties != 0 {
        recover(
            parse_property_list(ctx, class, properties),
            "property list",
            properties,
        );
    }
    Ok(flags)
}

/// Reads the name of the class at `class_addr` without decoding the class.
pub fn get_class_name(ctx: &ParseContext<'_, '_>, class_addr: u64) -> Option<Name> {
    let reader = ctx.reader;
    let record = reader.read_fields_va(&CLASS, class_addr).ok()?;
    let ro = fast_data(record.get(CLASS_DATA), reader.width());
    let name_ptr = reader.read_fields_va(&CLASS_RO, ro).ok()?.get(RO_NAME);
    let raw = reader.read_name(name_ptr)?;
    let demangled = demangle_classname(&raw);
    Some(Name::new(raw).with_demangled(Some(demangled)))
}
