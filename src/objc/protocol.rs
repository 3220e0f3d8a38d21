//! Protocol list decoding.
//!
//! Protocols are not kept as entities of their own. Their required instance
//! and class methods are folded into the adopting class, scoped as
//! `Class::(protocol)Name`.

use super::context::{recover, ParseContext};
use super::layout::{PROTOCOL, PROTOCOL_LIST_HEADER};
use super::method::{check_count, parse_method_list};
use super::model::{ClassRecord, MethodKind};
use super::reader::advance;
use crate::error::Result;

const PROTOCOL_NAME: usize = 1;
const PROTOCOL_INSTANCE_METHODS: usize = 3;
const PROTOCOL_CLASS_METHODS: usize = 4;

/// Decodes the protocol list at `list_addr` into `class`.
pub fn parse_protocol_list(
    ctx: &ParseContext<'_, '_>,
    class: &mut ClassRecord,
    list_addr: u64,
) -> Result<()> {
    let reader = ctx.reader;
    let ptr = reader.ptr_size();
    let at = reader.resolve(list_addr)?;
    let count = reader.read_fields(&PROTOCOL_LIST_HEADER, at)?.get(0);
    check_count(ctx, list_addr, at.offset + ptr, count, ptr)?;

    let first = advance(list_addr, ptr)?;
    for i in 0..count {
        let protocol_addr = reader.read_ptr_va(advance(first, i * ptr)?)?;
        let protocol = reader.read_fields_va(&PROTOCOL, protocol_addr)?;

        let scope = reader
            .read_name(protocol.get(PROTOCOL_NAME))
            .map(|name| format!("{}::(protocol){}", class.name, name));

        for (slot, kind) in [
            (PROTOCOL_INSTANCE_METHODS, MethodKind::Instance),
            (PROTOCOL_CLASS_METHODS, MethodKind::Class),
        ] {
            let methods = protocol.get(slot);
            if methods != 0 {
                recover(
                    parse_method_list(ctx, class, scope.as_deref(), kind, methods),
                    "protocol method list",
                    methods,
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::objc::demangle::NoDemangler;
    use crate::objc::model::Language;
    use crate::objc::testutil::ImageBuilder;

    fn decode(b: &ImageBuilder, list: u64) -> (ClassRecord, Result<()>) {
        let image = b.image();
        let ctx = ParseContext::new(&image, None, &NoDemangler);
        let mut class = ClassRecord::new(Language::ObjC);
        class.name = "Foo".to_string();
        let result = parse_protocol_list(&ctx, &mut class, list);
        (class, result)
    }

    #[test]
    fn test_protocol_methods_scoped() {
        let mut b = ImageBuilder::le64();
        let copy = b.string("copyWithZone:");
        let types = b.string("@24@0:8^{_NSZone=}16");
        let instance = b.method_list(&[(copy, types, 0x1_0000_8000)]);
        let cls = b.string("supportsSecureCoding");
        let ctypes = b.string("c16@0:8");
        let class_methods = b.method_list(&[(cls, ctypes, 0x1_0000_8100)]);

        let first_name = b.string("NSCopying");
        let first = b.protocol(first_name, instance, 0);
        let second_name = b.string("NSSecureCoding");
        let second = b.protocol(second_name, 0, class_methods);
        let list = b.protocol_list(&[first, second]);

        let (class, result) = decode(&b, list);
        assert!(result.is_ok());
        assert_eq!(class.methods.len(), 2);
        assert_eq!(
            class.methods[0].class_name.as_deref(),
            Some("Foo::(protocol)NSCopying")
        );
        assert_eq!(class.methods[0].kind, MethodKind::Instance);
        assert_eq!(class.methods[1].name.as_deref(), Some("supportsSecureCoding"));
        assert_eq!(
            class.methods[1].class_name.as_deref(),
            Some("Foo::(protocol)NSSecureCoding")
        );
        assert_eq!(class.methods[1].kind, MethodKind::Class);
    }

    #[test]
    fn test_protocol_list_32bit() {
        let mut b = ImageBuilder::le32();
        let sel = b.string("hash");
        let types = b.string("I8@0:4");
        let methods = b.method_list(&[(sel, types, 0x9000)]);
        let name = b.string("NSObject");
        let first = b.protocol(name, methods, 0);
        let second = b.protocol(name, methods, 0);
        let list = b.protocol_list(&[first, second]);

        let (class, result) = decode(&b, list);
        assert!(result.is_ok());
        // Entries are pointer-sized, so both protocols are reached
        assert_eq!(class.methods.len(), 2);
        assert_eq!(class.methods[1].return_type.as_deref(), Some("I"));
    }

    #[test]
    fn test_bad_method_list_does_not_stop_protocols() {
        let mut b = ImageBuilder::le64();
        let sel = b.string("run");
        let good = b.method_list(&[(sel, 0, 0x1_0000_8000)]);
        let name = b.string("Runnable");
        let broken = b.protocol(name, 0x5_0000_0000, 0);
        let working = b.protocol(name, good, 0);
        let list = b.protocol_list(&[broken, working]);

        let (class, result) = decode(&b, list);
        assert!(result.is_ok());
        assert_eq!(class.methods.len(), 1);
        assert_eq!(class.methods[0].name.as_deref(), Some("run"));
    }

    #[test]
    fn test_protocol_count_exceeds_buffer() {
        let mut b = ImageBuilder::le64();
        let list = b.protocol_list(&[0]);
        b.put_ptr(list, 0x1000_0000);

        let (class, result) = decode(&b, list);
        assert!(matches!(result, Err(Error::MalformedCount { .. })));
        assert!(class.methods.is_empty());
    }
}
