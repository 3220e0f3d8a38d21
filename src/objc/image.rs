//! The read-only image model consumed by the metadata decoders.
//!
//! A [`BinaryImage`] is everything the decoders know about a binary: the raw
//! bytes, the section table, and the facts the container parser extracted
//! (pointer width, byte order, encryption, Thumb, relocations and symbols).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder, LittleEndian};

// =============================================================================
// Pointer Width / Byte Order
// =============================================================================

/// Pointer width of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerWidth {
    /// 32-bit pointers
    Bits32,
    /// 64-bit pointers
    Bits64,
}

impl PointerWidth {
    /// Size of a pointer in bytes.
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            PointerWidth::Bits32 => 4,
            PointerWidth::Bits64 => 8,
        }
    }

    /// Returns true for 64-bit images.
    #[inline]
    pub const fn is_64(self) -> bool {
        matches!(self, PointerWidth::Bits64)
    }
}

/// Byte order of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endian {
    /// Little-endian
    Little,
    /// Big-endian
    Big,
}

impl Endian {
    /// Reads a u16 from the start of `data`.
    #[inline]
    pub fn read_u16(self, data: &[u8]) -> u16 {
        match self {
            Endian::Little => LittleEndian::read_u16(data),
            Endian::Big => BigEndian::read_u16(data),
        }
    }

    /// Reads a u32 from the start of `data`.
    #[inline]
    pub fn read_u32(self, data: &[u8]) -> u32 {
        match self {
            Endian::Little => LittleEndian::read_u32(data),
            Endian::Big => BigEndian::read_u32(data),
        }
    }

    /// Reads a u64 from the start of `data`.
    #[inline]
    pub fn read_u64(self, data: &[u8]) -> u64 {
        match self {
            Endian::Little => LittleEndian::read_u64(data),
            Endian::Big => BigEndian::read_u64(data),
        }
    }

    /// Reads a signed 32-bit value from the start of `data`.
    #[inline]
    pub fn read_i32(self, data: &[u8]) -> i32 {
        match self {
            Endian::Little => LittleEndian::read_i32(data),
            Endian::Big => BigEndian::read_i32(data),
        }
    }

    /// Reads a pointer-sized value from the start of `data`.
    #[inline]
    pub fn read_ptr(self, data: &[u8], width: PointerWidth) -> u64 {
        match width {
            PointerWidth::Bits32 => self.read_u32(data) as u64,
            PointerWidth::Bits64 => self.read_u64(data),
        }
    }

    /// Writes a u32 to the start of `data`.
    #[inline]
    pub fn write_u32(self, data: &mut [u8], value: u32) {
        match self {
            Endian::Little => LittleEndian::write_u32(data, value),
            Endian::Big => BigEndian::write_u32(data, value),
        }
    }

    /// Writes a pointer-sized value to the start of `data`.
    #[inline]
    pub fn write_ptr(self, data: &mut [u8], value: u64, width: PointerWidth) {
        match (self, width) {
            (_, PointerWidth::Bits32) => self.write_u32(data, value as u32),
            (Endian::Little, PointerWidth::Bits64) => LittleEndian::write_u64(data, value),
            (Endian::Big, PointerWidth::Bits64) => BigEndian::write_u64(data, value),
        }
    }
}

// =============================================================================
// Sections
// =============================================================================

/// A section of the image, as reported by the container parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Section name (e.g. "__objc_classlist")
    pub name: String,
    /// Virtual address
    pub vaddr: u64,
    /// Physical (file) offset
    pub paddr: u64,
    /// Size in bytes
    pub size: u64,
}

impl Section {
    /// Creates a section.
    pub fn new(name: impl Into<String>, vaddr: u64, paddr: u64, size: u64) -> Self {
        Self {
            name: name.into(),
            vaddr,
            paddr,
            size,
        }
    }

    /// Returns true if this section contains the given virtual address.
    #[inline]
    pub fn contains_addr(&self, addr: u64) -> bool {
        addr >= self.vaddr && addr - self.vaddr < self.size
    }
}

/// A translated virtual address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationResult {
    /// Physical offset into the image buffer
    pub offset: u64,
    /// Bytes from `offset` to the end of the enclosing section
    pub remaining: u64,
}

/// Virtual-to-physical address translation.
///
/// A container parser may supply its own translator; images without one fall
/// back to searching their section table.
pub trait AddressTranslator: Send + Sync {
    /// Translates a virtual address, or returns `None` if nothing maps it.
    fn translate(&self, vaddr: u64) -> Option<TranslationResult>;
}

/// Finds the section covering `vaddr` and converts the address.
pub fn translate_with_sections(
    sections: &[Section],
    base_offset: u64,
    vaddr: u64,
) -> Option<TranslationResult> {
    if vaddr == 0 {
        return None;
    }
    let section = sections.iter().find(|s| s.contains_addr(vaddr))?;
    let delta = vaddr - section.vaddr;
    let offset = section.paddr.checked_sub(base_offset)?.checked_add(delta)?;
    Some(TranslationResult {
        offset,
        remaining: section.size - delta,
    })
}

// =============================================================================
// Externally Supplied Facts
// =============================================================================

/// A defined symbol from the image's symbol table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    /// Symbol name as stored (possibly mangled)
    pub name: String,
    /// Virtual address
    pub vaddr: u64,
}

/// Selector resolution data for images extracted from a shared cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheOptInfo {
    /// Base virtual address that small method-list name offsets are relative to
    pub sel_string_base: u64,
}

// =============================================================================
// Binary Image
// =============================================================================

/// A read-only view of a binary plus the facts needed to decode its metadata.
///
/// The image never changes while it is parsed and can be shared between
/// independent parse invocations.
pub struct BinaryImage<'a> {
    data: &'a [u8],
    pointer_width: PointerWidth,
    endian: Endian,
    encrypted: bool,
    thumb: bool,
    base_offset: u64,
    base_address: u64,
    sections: Vec<Section>,
    relocations: Option<BTreeMap<u64, String>>,
    symbols: Vec<Symbol>,
    translator: Option<Arc<dyn AddressTranslator>>,
}

impl<'a> BinaryImage<'a> {
    /// Creates an image with no sections over `data`.
    pub fn new(data: &'a [u8], pointer_width: PointerWidth, endian: Endian) -> Self {
        Self {
            data,
            pointer_width,
            endian,
            encrypted: false,
            thumb: false,
            base_offset: 0,
            base_address: 0,
            sections: Vec::new(),
            relocations: None,
            symbols: Vec::new(),
            translator: None,
        }
    }

    /// Sets the section table.
    pub fn with_sections(mut self, sections: Vec<Section>) -> Self {
        self.sections = sections;
        self
    }

    /// Flags the image as encrypted.
    pub fn with_encryption(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    /// Flags the image as Thumb-coded.
    pub fn with_thumb(mut self, thumb: bool) -> Self {
        self.thumb = thumb;
        self
    }

    /// Sets the offset of this image within a larger file.
    pub fn with_base_offset(mut self, base_offset: u64) -> Self {
        self.base_offset = base_offset;
        self
    }

    /// Sets the virtual address that physical offset zero maps to.
    pub fn with_base_address(mut self, base_address: u64) -> Self {
        self.base_address = base_address;
        self
    }

    /// Sets the relocation table (address of the relocated slot -> symbol name).
    pub fn with_relocations(mut self, relocations: BTreeMap<u64, String>) -> Self {
        self.relocations = Some(relocations);
        self
    }

    /// Sets the symbol table.
    pub fn with_symbols(mut self, symbols: Vec<Symbol>) -> Self {
        self.symbols = symbols;
        self
    }

    /// Installs a translator that takes precedence over the section table.
    pub fn with_translator(mut self, translator: Arc<dyn AddressTranslator>) -> Self {
        self.translator = Some(translator);
        self
    }

    /// Returns the raw bytes.
    #[inline]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Returns the total size of the buffer.
    #[inline]
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Returns the pointer width.
    #[inline]
    pub fn pointer_width(&self) -> PointerWidth {
        self.pointer_width
    }

    /// Returns the pointer size in bytes.
    #[inline]
    pub fn pointer_size(&self) -> usize {
        self.pointer_width.size()
    }

    /// Returns the byte order.
    #[inline]
    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Returns true if the image payload is encrypted.
    #[inline]
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Returns true if the image is Thumb-coded.
    #[inline]
    pub fn is_thumb(&self) -> bool {
        self.thumb
    }

    /// Returns the virtual address that physical offset zero maps to.
    #[inline]
    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    /// Returns the section table.
    #[inline]
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Returns the symbol table.
    #[inline]
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Returns true if a relocation table was supplied.
    #[inline]
    pub fn has_relocations(&self) -> bool {
        self.relocations.is_some()
    }

    /// Returns the number of relocations.
    pub fn relocation_count(&self) -> usize {
        self.relocations.as_ref().map_or(0, |r| r.len())
    }

    /// Looks up the symbol name relocated into the slot at `addr`.
    pub fn relocation_at(&self, addr: u64) -> Option<&str> {
        self.relocations.as_ref()?.get(&addr).map(String::as_str)
    }

    /// Translates a virtual address into a physical offset.
    ///
    /// A supplied translator takes precedence; otherwise the section table is
    /// searched. Address zero never translates.
    pub fn translate(&self, vaddr: u64) -> Option<TranslationResult> {
        if vaddr == 0 {
            return None;
        }
        match &self.translator {
            Some(translator) => translator.translate(vaddr),
            None => translate_with_sections(&self.sections, self.base_offset, vaddr),
        }
    }
}

impl fmt::Debug for BinaryImage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryImage")
            .field("size", &self.data.len())
            .field("pointer_width", &self.pointer_width)
            .field("endian", &self.endian)
            .field("encrypted", &self.encrypted)
            .field("thumb", &self.thumb)
            .field("sections", &self.sections.len())
            .field("symbols", &self.symbols.len())
            .field("relocations", &self.relocation_count())
            .field("translator", &self.translator.is_some())
            .finish()
    }
}
