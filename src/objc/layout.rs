//! On-disk record layouts of the ObjC and Swift metadata structures.
//!
//! Instead of one struct per pointer width and byte order, each record is
//! described once as a sequence of [`Slot`]s and decoded by [`Layout::decode`]
//! for the image's width and endianness.

use super::image::{Endian, PointerWidth};

/// The kind of a single field within a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Pointer-sized unsigned value
    Ptr,
    /// 32-bit unsigned value
    U32,
    /// 32-bit signed value (sign-extended on decode)
    I32,
    /// 32-bit padding that only exists in 64-bit layouts
    Pad64,
}

impl Slot {
    #[inline]
    const fn size(self, width: PointerWidth) -> usize {
        match self {
            Slot::Ptr => width.size(),
            Slot::U32 | Slot::I32 => 4,
            Slot::Pad64 => {
                if width.is_64() {
                    4
                } else {
                    0
                }
            }
        }
    }
}

/// A fixed record layout.
#[derive(Debug, Clone, Copy)]
pub struct Layout {
    /// Human-readable record name, used in diagnostics
    pub name: &'static str,
    slots: &'static [Slot],
}

impl Layout {
    /// Creates a layout from its slots.
    pub const fn new(name: &'static str, slots: &'static [Slot]) -> Self {
        Self { name, slots }
    }

    /// Size of the record in bytes for the given pointer width.
    pub fn size(&self, width: PointerWidth) -> usize {
        self.slots.iter().map(|s| s.size(width)).sum()
    }

    /// Byte offset of slot `index` for the given pointer width.
    pub fn offset_of(&self, index: usize, width: PointerWidth) -> usize {
        self.slots
            .iter()
            .take(index)
            .map(|s| s.size(width))
            .sum()
    }

    /// Decodes `data` into one value per slot.
    ///
    /// Slots past the end of `data` decode as zero. Signed slots are
    /// sign-extended into the u64.
    pub fn decode(&self, data: &[u8], width: PointerWidth, endian: Endian) -> Fields {
        let mut values = Vec::with_capacity(self.slots.len());
        let mut pos = 0usize;
        for slot in self.slots {
            let size = slot.size(width);
            let value = match data.get(pos..pos + size) {
                Some(bytes) => match slot {
                    Slot::Ptr => endian.read_ptr(bytes, width),
                    Slot::U32 => endian.read_u32(bytes) as u64,
                    Slot::I32 => endian.read_i32(bytes) as i64 as u64,
                    Slot::Pad64 if size == 4 => endian.read_u32(bytes) as u64,
                    Slot::Pad64 => 0,
                },
                None => 0,
            };
            values.push(value);
            pos += size;
        }
        Fields(values)
    }
}

/// Decoded values of a record, indexed by slot position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fields(Vec<u64>);

impl Fields {
    /// Returns the value at slot `index` (zero if absent).
    #[inline]
    pub fn get(&self, index: usize) -> u64 {
        self.0.get(index).copied().unwrap_or(0)
    }

    /// Returns the value at slot `index` as a 32-bit unsigned value.
    #[inline]
    pub fn u32(&self, index: usize) -> u32 {
        self.get(index) as u32
    }

    /// Returns the value at slot `index` as a signed value.
    #[inline]
    pub fn signed(&self, index: usize) -> i64 {
        self.get(index) as i64
    }
}

// =============================================================================
// Record Layouts
// =============================================================================

/// `{ u32 entsize_and_flags; u32 count; }` heading method, ivar and property lists.
pub const LIST_HEADER: Layout = Layout::new("list_header", &[Slot::U32, Slot::U32]);

/// `{ uintptr_t count; }` heading protocol lists.
pub const PROTOCOL_LIST_HEADER: Layout = Layout::new("protocol_list", &[Slot::Ptr]);

/// A single pointer.
pub const POINTER: Layout = Layout::new("pointer", &[Slot::Ptr]);

/// `objc_class`: isa, superclass, cache, vtable, data.
pub const CLASS: Layout = Layout::new(
    "class",
    &[Slot::Ptr, Slot::Ptr, Slot::Ptr, Slot::Ptr, Slot::Ptr],
);

/// `class_ro_t`.
pub const CLASS_RO: Layout = Layout::new(
    "class_ro",
    &[
        Slot::U32,   // flags
        Slot::U32,   // instanceStart
        Slot::U32,   // instanceSize
        Slot::Pad64, // reserved
        Slot::Ptr,   // ivarLayout
        Slot::Ptr,   // name
        Slot::Ptr,   // baseMethods
        Slot::Ptr,   // baseProtocols
        Slot::Ptr,   // ivars
        Slot::Ptr,   // weakIvarLayout
        Slot::Ptr,   // baseProperties
    ],
);

/// `method_t` with absolute pointers: name, types, imp.
pub const METHOD_LEGACY: Layout = Layout::new("method", &[Slot::Ptr, Slot::Ptr, Slot::Ptr]);

/// Relative `method_t`: self-relative name, types, imp offsets.
pub const METHOD_SMALL: Layout =
    Layout::new("small_method", &[Slot::I32, Slot::I32, Slot::I32]);

/// `protocol_t` up to and including `instanceProperties`.
pub const PROTOCOL: Layout = Layout::new(
    "protocol",
    &[
        Slot::Ptr, // isa
        Slot::Ptr, // name
        Slot::Ptr, // protocols
        Slot::Ptr, // instanceMethods
        Slot::Ptr, // classMethods
        Slot::Ptr, // optionalInstanceMethods
        Slot::Ptr, // optionalClassMethods
        Slot::Ptr, // instanceProperties
    ],
);

/// `ivar_t`: offset pointer, name, type, alignment, size.
pub const IVAR: Layout = Layout::new(
    "ivar",
    &[Slot::Ptr, Slot::Ptr, Slot::Ptr, Slot::U32, Slot::U32],
);

/// `property_t`: name, attributes.
pub const PROPERTY: Layout = Layout::new("property", &[Slot::Ptr, Slot::Ptr]);

/// `category_t`: name, cls, instanceMethods, classMethods, protocols, instanceProperties.
pub const CATEGORY: Layout = Layout::new(
    "category",
    &[
        Slot::Ptr,
        Slot::Ptr,
        Slot::Ptr,
        Slot::Ptr,
        Slot::Ptr,
        Slot::Ptr,
    ],
);

/// The first sixteen 32-bit words of a Swift nominal type descriptor.
pub const SWIFT_TYPE_DESCRIPTOR: Layout = Layout::new("swift_type_descriptor", &[Slot::I32; 16]);

/// Encoding of the entries of a method list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodEncoding {
    /// Pointer-sized absolute name, types and imp
    Legacy,
    /// 32-bit offsets relative to each field's own address
    Small,
}

impl MethodEncoding {
    /// Returns the record layout for this encoding.
    pub fn layout(self) -> &'static Layout {
        match self {
            MethodEncoding::Legacy => &METHOD_LEGACY,
            MethodEncoding::Small => &METHOD_SMALL,
        }
    }
}
