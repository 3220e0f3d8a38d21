//! Swift type metadata decoding.
//!
//! Swift metadata lives in `__swift5_types` (self-relative offsets to
//! nominal type descriptors) and `__swift5_fieldmd` (field descriptors).
//! Both are addressed by physical offset: a word at position `x` of a record
//! at `base` refers to `base + 4 * x + word`.

use std::collections::HashMap;

use tracing::{debug, warn};

use super::context::ParseContext;
use super::demangle::filter_name;
use super::layout::SWIFT_TYPE_DESCRIPTOR;
use super::model::{ClassRecord, Field, FieldKind, Language, Method, MethodKind, Name};
use super::parser::MetaSection;
use crate::error::Result;

/// Upper bound on the members read per type.
pub const MAX_SWIFT_MEMBERS: u32 = 256;

/// Upper bound on the fields read per type.
pub const MAX_SWIFT_FIELDS: usize = 43;

// Nominal type descriptor words
const NCD_NAME: usize = 2;
const NCD_FIELDS: usize = 4;
const NCD_SUPER: usize = 5;
const NCD_MEMBERS: usize = 8;

// Field descriptor layout, in 32-bit words
const FIELD_DESCRIPTOR_COUNT: usize = 3;
const FIELD_DESCRIPTOR_HEADER: usize = 4;
const FIELD_RECORD_WORDS: usize = 3;

/// Leading bytes below this value mark a symbolic reference, not a name.
const SYMBOLIC_PREFIX_LIMIT: u8 = 6;

/// A decoded nominal type descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwiftTypeDescriptor {
    /// Physical offset of the descriptor
    pub address: u64,
    /// Physical offset of the type name
    pub name_addr: Option<u64>,
    /// Physical offset of the superclass name
    pub super_addr: Option<u64>,
    /// Physical offset of the field descriptor
    pub fields: Option<u64>,
    /// Physical offset of the members table
    pub members: Option<u64>,
    /// Number of members, capped at [`MAX_SWIFT_MEMBERS`]
    pub member_count: u32,
}

/// The `__swift5_fieldmd` contents as 32-bit words.
#[derive(Debug, Clone)]
pub struct FieldMetadata {
    window: MetaSection,
    words: Vec<i32>,
}

impl FieldMetadata {
    /// Loads the section's words.
    pub fn load(ctx: &ParseContext<'_, '_>, window: MetaSection) -> Result<Self> {
        let reader = ctx.reader;
        if window.addr % 4 != 0 {
            warn!("Unaligned address for section at {:#x}", window.addr);
        }
        let bytes = reader.bytes_at(window.addr, window.size)?;
        let endian = reader.endian();
        let words = bytes.chunks_exact(4).map(|w| endian.read_i32(w)).collect();
        Ok(Self { window, words })
    }

    /// Physical offset of word `index`.
    #[inline]
    fn word_addr(&self, index: usize) -> u64 {
        self.window.addr + index as u64 * 4
    }

    /// Resolves the self-relative reference stored in word `index`.
    fn relative(&self, index: usize) -> Option<u64> {
        let word = *self.words.get(index)?;
        self.word_addr(index).checked_add_signed(word as i64)
    }
}

/// Resolves word `x` of a record at `base` as a self-relative reference.
#[inline]
fn relative(base: u64, x: usize, word: i64) -> Option<u64> {
    (base + 4 * x as u64).checked_add_signed(word)
}

/// Decodes the nominal type descriptor at physical offset `type_addr`.
pub fn parse_type_descriptor(
    ctx: &ParseContext<'_, '_>,
    type_addr: u64,
) -> Result<SwiftTypeDescriptor> {
    let reader = ctx.reader;
    let size = SWIFT_TYPE_DESCRIPTOR.size(reader.width()) as u64;
    let bytes = reader.bytes_at(type_addr, size)?;
    let words = SWIFT_TYPE_DESCRIPTOR.decode(bytes, reader.width(), reader.endian());
    let at = |x: usize| relative(type_addr, x, words.signed(x));

    let members = at(NCD_MEMBERS);
    let member_count = members
        .and_then(|m| m.checked_add(3))
        .and_then(|m| reader.bytes_at(m, 4).ok())
        .filter(|b| b.len() == 4)
        .map_or(0, |b| reader.endian().read_u32(b))
        .min(MAX_SWIFT_MEMBERS);

    Ok(SwiftTypeDescriptor {
        address: type_addr,
        name_addr: at(NCD_NAME),
        super_addr: at(NCD_SUPER),
        fields: at(NCD_FIELDS),
        members,
        member_count,
    })
}

/// Decodes every type listed in `types`, appending one record per named type.
///
/// At most `limit` types are visited when `limit` is non-zero.
pub fn parse_types(
    ctx: &ParseContext<'_, '_>,
    types: MetaSection,
    fieldmd: &FieldMetadata,
    limit: usize,
    classes: &mut Vec<ClassRecord>,
) -> Result<()> {
    let reader = ctx.reader;
    let entries = reader.bytes_at(types.addr, types.size)?;
    let mut count = entries.len() / 4;
    if limit > 0 && count > limit {
        warn!("Swift class limit reached");
        count = limit;
    }
    debug!(
        "swift5_types: {} entries, swift5_fieldmd: {} words at {:#x}",
        count,
        fieldmd.words.len(),
        fieldmd.window.addr
    );

    let symbols: HashMap<u64, &str> = ctx
        .image()
        .symbols()
        .iter()
        .map(|s| (s.vaddr, s.name.as_str()))
        .collect();

    for (i, entry) in entries.chunks_exact(4).take(count).enumerate() {
        let word = reader.endian().read_i32(entry) as i64;
        let Some(type_addr) = relative(types.addr, i, word) else {
            continue;
        };
        match parse_type_descriptor(ctx, type_addr) {
            Ok(desc) => {
                if let Some(class) = parse_type(ctx, &desc, fieldmd, &symbols) {
                    classes.push(class);
                }
            }
            Err(e) => debug!("Invalid Swift type descriptor at {:#x}: {}", type_addr, e),
        }
    }
    Ok(())
}

/// Builds the record for one type descriptor.
fn parse_type(
    ctx: &ParseContext<'_, '_>,
    desc: &SwiftTypeDescriptor,
    fieldmd: &FieldMetadata,
    symbols: &HashMap<u64, &str>,
) -> Option<ClassRecord> {
    let reader = ctx.reader;
    let base = ctx.image().base_address();

    let raw_name = desc
        .name_addr
        .and_then(|addr| reader.read_cstr_pa(addr))
        .filter(|name| !name.is_empty());
    let Some(raw_name) = raw_name else {
        debug!("Swift type at {:#x} has no name", desc.address);
        return None;
    };

    let mut class = ClassRecord::new(Language::Swift);
    class.name = filter_name(&String::from_utf8_lossy(raw_name));
    class.address = base.wrapping_add(desc.address);

    // Heuristic: a symbolic reference starts with a control byte
    if let Some(superclass) = desc.super_addr.and_then(|addr| reader.read_cstr_pa(addr)) {
        if superclass.first().is_some_and(|&b| b >= SYMBOLIC_PREFIX_LIMIT) {
            let raw = String::from_utf8_lossy(superclass).into_owned();
            let demangled = ctx.demangler.demangle_swift(&raw);
            class.push_superclass(Name::new(raw).with_demangled(demangled));
        }
    }

    if let Some(members) = desc.members {
        parse_members(ctx, &mut class, members, desc.member_count, symbols);
    }
    if let Some(fields) = desc.fields {
        parse_fields(ctx, &mut class, fields, fieldmd);
    }
    Some(class)
}

/// Reads the member table; each entry holds a relative implementation offset.
fn parse_members(
    ctx: &ParseContext<'_, '_>,
    class: &mut ClassRecord,
    members: u64,
    count: u32,
    symbols: &HashMap<u64, &str>,
) {
    let reader = ctx.reader;
    let image = ctx.image();
    let Ok(table) = reader.bytes_at(members, MAX_SWIFT_MEMBERS as u64 * 16) else {
        return;
    };

    for i in 0..count as usize {
        let pos = i * 8 + 3 + 8 + 8;
        let Some(word) = table.get(pos..pos + 4) else {
            break;
        };
        let n = reader.endian().read_i32(word) as i64;
        let Some(method_addr) = (members + pos as u64).checked_add_signed(n) else {
            break;
        };
        if method_addr > image.size() {
            break;
        }
        let vaddr = image.base_address().wrapping_add(method_addr);

        let name = match symbols.get(&vaddr) {
            Some(symbol) => {
                let filtered = filter_name(symbol);
                ctx.demangler
                    .demangle_swift(&filtered)
                    .unwrap_or(filtered)
            }
            None => i.to_string(),
        };

        class.methods.push(Method {
            name: Some(strip_namespace(&name).to_string()),
            class_name: Some(class.name.clone()),
            signature: None,
            return_type: None,
            address: vaddr,
            kind: MethodKind::Instance,
            language: Language::Swift,
        });
    }
}

/// Drops the `Module.Type.` prefix of a member name.
fn strip_namespace(name: &str) -> &str {
    name.split_once('.')
        .and_then(|(_, rest)| rest.split_once('.'))
        .map_or(name, |(_, member)| member)
}

/// Reads the field records of the descriptor at `fields`.
fn parse_fields(
    ctx: &ParseContext<'_, '_>,
    class: &mut ClassRecord,
    fields: u64,
    fieldmd: &FieldMetadata,
) {
    if !fieldmd.window.contains(fields) {
        debug!("Field descriptor {:#x} outside swift5_fieldmd", fields);
        return;
    }
    let reader = ctx.reader;
    let base = ctx.image().base_address();
    let first = ((fields - fieldmd.window.addr) / 4) as usize;

    let declared = fieldmd
        .words
        .get(first + FIELD_DESCRIPTOR_COUNT)
        .map_or(0, |&n| n as u32 as usize);
    let count = declared.min(MAX_SWIFT_FIELDS);

    for k in 0..count {
        // Each record is { flags, type, name }
        let d = first + FIELD_DESCRIPTOR_HEADER + k * FIELD_RECORD_WORDS + 2;
        if d >= fieldmd.words.len() {
            break;
        }
        let Some(name_addr) = fieldmd.relative(d) else {
            break;
        };
        let Some(name) = reader.read_cstr_pa(name_addr) else {
            break;
        };
        if name.is_empty() {
            continue;
        }

        let type_name = fieldmd
            .relative(d - 1)
            .and_then(|addr| reader.read_cstr_pa(addr))
            .map(|ty| {
                let ty = if ty.first().is_some_and(|&b| b < SYMBOLIC_PREFIX_LIMIT) {
                    &ty[ty.len().min(SYMBOLIC_PREFIX_LIMIT as usize)..]
                } else {
                    ty
                };
                let mangled = String::from_utf8_lossy(ty).into_owned();
                let demangled = ctx.demangler.demangle_swift(&mangled);
                Name::new(mangled).with_demangled(demangled)
            });

        class.fields.push(Field {
            name: String::from_utf8_lossy(name).into_owned(),
            type_name,
            offset: 0,
            size: 0,
            alignment: 0,
            address: base.wrapping_add(name_addr),
            kind: FieldKind::Property,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objc::demangle::{Demangler, NoDemangler};
    use crate::objc::testutil::ImageBuilder;

    struct Fixture {
        b: ImageBuilder,
        descriptor: u64,
        types: MetaSection,
        fieldmd: MetaSection,
    }

    fn rel(target: u64, at: u64) -> i32 {
        target.wrapping_sub(at) as i32
    }

    /// Lays out one type `Point` with fields `x: Si`, `y: Si`, one named
    /// member and one anonymous member.
    fn fixture() -> Fixture {
        let mut b = ImageBuilder::le64();
        let type_name = b.string("Point");
        let super_name = b.string("So8NSObjectC");
        let x = b.string("x");
        let y = b.string("y");
        let int = b.string("Si");
        let symbolic = b.alloc(16);
        b.put_bytes(symbolic, b"\x01\x01\x01\x01\x01\x01Sd\0");

        // Field descriptor: 4 header words + 2 records
        let fm = b.alloc(4 * 10);
        b.put_u32(fm + 12, 2);
        let rec0 = fm + 16;
        b.put_i32(rec0 + 4, rel(int, rec0 + 4));
        b.put_i32(rec0 + 8, rel(x, rec0 + 8));
        let rec1 = fm + 28;
        b.put_i32(rec1 + 4, rel(symbolic, rec1 + 4));
        b.put_i32(rec1 + 8, rel(y, rec1 + 8));

        // Members: count at +3, offsets at +19 and +27
        let members = b.alloc(64);
        let method = b.alloc(16);
        b.put_u32(members + 3, 2);
        b.put_i32(members + 19, rel(method, members + 19));
        b.put_i32(members + 27, rel(method + 8, members + 27));
        b.symbol("Main.Point.move", method);

        // Type descriptor
        let td = b.alloc(64);
        b.put_i32(td + 4 * 2, rel(type_name, td + 8));
        b.put_i32(td + 4 * 4, rel(fm, td + 16));
        b.put_i32(td + 4 * 5, rel(super_name, td + 20));
        b.put_i32(td + 4 * 8, rel(members, td + 32));

        let types = b.alloc(4);
        b.put_i32(types, rel(td, types));

        let types = MetaSection {
            addr: b.paddr(types),
            size: 4,
        };
        let fieldmd = MetaSection {
            addr: b.paddr(fm),
            size: 40,
        };
        Fixture {
            b,
            descriptor: td,
            types,
            fieldmd,
        }
    }

    fn decode(f: &Fixture, demangler: &dyn Demangler, limit: usize) -> Vec<ClassRecord> {
        let image = f.b.image();
        let ctx = ParseContext::new(&image, None, demangler);
        let fieldmd = FieldMetadata::load(&ctx, f.fieldmd).unwrap();
        let mut classes = Vec::new();
        parse_types(&ctx, f.types, &fieldmd, limit, &mut classes).unwrap();
        classes
    }

    #[test]
    fn test_swift_type() {
        let f = fixture();
        let classes = decode(&f, &NoDemangler, 0);
        assert_eq!(classes.len(), 1);

        let class = &classes[0];
        assert_eq!(class.name, "Point");
        assert_eq!(class.language, Language::Swift);
        assert_eq!(class.superclasses.len(), 1);
        assert_eq!(class.superclasses[0].raw, "So8NSObjectC");

        assert_eq!(class.methods.len(), 2);
        assert_eq!(class.methods[0].name.as_deref(), Some("move"));
        assert_eq!(class.methods[0].language, Language::Swift);
        assert_eq!(class.methods[1].name.as_deref(), Some("1"));

        assert_eq!(class.fields.len(), 2);
        assert_eq!(class.fields[0].name, "x");
        assert_eq!(
            class.fields[0].type_name.as_ref().map(|t| t.raw.as_str()),
            Some("Si")
        );
        assert_eq!(class.fields[1].name, "y");
        // Symbolic prefix bytes are skipped
        assert_eq!(
            class.fields[1].type_name.as_ref().map(|t| t.raw.as_str()),
            Some("Sd")
        );
        assert_eq!(class.fields[1].kind, FieldKind::Property);
    }

    struct Upper;

    impl Demangler for Upper {
        fn demangle_swift(&self, symbol: &str) -> Option<String> {
            Some(symbol.to_uppercase())
        }
    }

    #[test]
    fn test_swift_demangler_used() {
        let f = fixture();
        let classes = decode(&f, &Upper, 0);
        let class = &classes[0];
        assert_eq!(class.superclasses[0].display(), "SO8NSOBJECTC");
        assert_eq!(class.fields[0].type_name.as_ref().map(Name::display), Some("SI"));
        // Namespace stripped after demangling
        assert_eq!(class.methods[0].name.as_deref(), Some("MOVE"));
    }

    #[test]
    fn test_swift_limit() {
        let mut f = fixture();
        let table = f.b.alloc(12);
        for i in 0..3 {
            let entry = table + 4 * i;
            f.b.put_i32(entry, rel(f.descriptor, entry));
        }
        f.types = MetaSection {
            addr: f.b.paddr(table),
            size: 12,
        };

        assert_eq!(decode(&f, &NoDemangler, 0).len(), 3);
        assert_eq!(decode(&f, &NoDemangler, 2).len(), 2);
        assert_eq!(decode(&f, &NoDemangler, 1).len(), 1);
    }

    #[test]
    fn test_strip_namespace() {
        assert_eq!(strip_namespace("Main.Point.move"), "move");
        assert_eq!(strip_namespace("Main.Point.a.b"), "a.b");
        assert_eq!(strip_namespace("Point.move"), "Point.move");
        assert_eq!(strip_namespace("7"), "7");
    }

    #[test]
    fn test_relative() {
        assert_eq!(relative(0x100, 2, -8), Some(0x100));
        assert_eq!(relative(0x100, 0, 0x10), Some(0x110));
        assert_eq!(relative(0, 0, -1), None);
    }
}
