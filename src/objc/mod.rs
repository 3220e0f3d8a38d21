//! Objective-C and Swift class metadata decoding.
//!
//! This module turns the metadata sections of a [`BinaryImage`] into a list
//! of [`ClassRecord`]s. It never touches the container format: the image
//! supplies the section table, symbols, relocations and a few facts, and
//! every read goes through the bounds-checked [`Reader`].
//!
//! # Decoding Pipeline
//!
//! 1. **Section discovery** - `__objc_classlist`, `__objc_catlist`,
//!    `__swift5_types` and `__swift5_fieldmd` are located by name
//! 2. **Categories** - each category becomes a `Target(Category)` record
//! 3. **Swift types** - nominal type descriptors with members and fields
//! 4. **Classes** - each class and its meta-class merged into one record
//!
//! Malformed lists and records are skipped with a log message; only a
//! missing class list fails the parse.

mod category;
mod class;
mod context;
mod demangle;
mod image;
mod ivar;
mod layout;
mod method;
mod model;
mod parser;
mod property;
mod protocol;
mod reader;
mod swift;

#[cfg(test)]
mod testutil;

pub use category::parse_category;
pub use class::{fast_data, get_class_name, parse_class, ClassRoFlags};
pub use context::{recover, ParseContext, OBJC_CLASS_PREFIX};
pub use demangle::{demangle_classname, filter_name, ClassNameDemangler, Demangler, NoDemangler};
pub use image::*;
pub use ivar::parse_ivar_list;
pub use layout::{Fields, Layout, MethodEncoding, Slot};
pub use method::{first_type, parse_method_list, MethodListFlags};
pub use model::*;
pub use parser::*;
pub use property::{attribute_type, parse_property_list};
pub use protocol::parse_protocol_list;
pub use reader::{Reader, ENCRYPTED_PLACEHOLDER, MAX_NAME_LEN};
pub use swift::{
    parse_type_descriptor, parse_types, FieldMetadata, SwiftTypeDescriptor, MAX_SWIFT_FIELDS,
    MAX_SWIFT_MEMBERS,
};
