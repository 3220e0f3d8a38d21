//! Synthetic images for the decoder tests.
//!
//! [`ImageBuilder`] lays records out in a flat buffer that is mapped at a
//! fixed virtual base, so virtual address = base + physical offset.

use std::collections::BTreeMap;

use super::image::{BinaryImage, Endian, PointerWidth, Section, Symbol};

/// Virtual base of 64-bit test images.
pub const VBASE_64: u64 = 0x1_0000_0000;

/// Virtual base of 32-bit test images.
pub const VBASE_32: u64 = 0x4000;

/// Fields of a `class_ro_t` worth setting in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassRo {
    pub flags: u32,
    pub name: u64,
    pub methods: u64,
    pub protocols: u64,
    pub ivars: u64,
    pub properties: u64,
}

/// Builds a [`BinaryImage`] from hand-written metadata.
pub struct ImageBuilder {
    pub width: PointerWidth,
    pub endian: Endian,
    pub vbase: u64,
    data: Vec<u8>,
    sections: Vec<Section>,
    relocations: BTreeMap<u64, String>,
    symbols: Vec<Symbol>,
    encrypted: bool,
    thumb: bool,
}

impl ImageBuilder {
    pub fn new(width: PointerWidth, endian: Endian) -> Self {
        let vbase = if width.is_64() { VBASE_64 } else { VBASE_32 };
        Self {
            width,
            endian,
            vbase,
            // Keep physical offset zero unused
            data: vec![0u8; 0x10],
            sections: Vec::new(),
            relocations: BTreeMap::new(),
            symbols: Vec::new(),
            encrypted: false,
            thumb: false,
        }
    }

    pub fn le64() -> Self {
        Self::new(PointerWidth::Bits64, Endian::Little)
    }

    pub fn le32() -> Self {
        Self::new(PointerWidth::Bits32, Endian::Little)
    }

    pub fn be32() -> Self {
        Self::new(PointerWidth::Bits32, Endian::Big)
    }

    pub fn ptr_size(&self) -> u64 {
        self.width.size() as u64
    }

    pub fn paddr(&self, vaddr: u64) -> u64 {
        vaddr - self.vbase
    }

    /// Reserves `size` zeroed bytes, 8-byte aligned, returning their vaddr.
    pub fn alloc(&mut self, size: usize) -> u64 {
        let start = (self.data.len() + 7) & !7;
        self.data.resize(start + size, 0);
        self.vbase + start as u64
    }

    fn slot(&mut self, vaddr: u64, size: usize) -> &mut [u8] {
        let off = self.paddr(vaddr) as usize;
        &mut self.data[off..off + size]
    }

    pub fn put_u32(&mut self, vaddr: u64, value: u32) {
        let endian = self.endian;
        endian.write_u32(self.slot(vaddr, 4), value);
    }

    pub fn put_i32(&mut self, vaddr: u64, value: i32) {
        self.put_u32(vaddr, value as u32);
    }

    pub fn put_ptr(&mut self, vaddr: u64, value: u64) {
        let (endian, width) = (self.endian, self.width);
        let size = width.size();
        endian.write_ptr(self.slot(vaddr, size), value, width);
    }

    pub fn put_bytes(&mut self, vaddr: u64, bytes: &[u8]) {
        self.slot(vaddr, bytes.len()).copy_from_slice(bytes);
    }

    /// Stores a NUL-terminated string.
    pub fn string(&mut self, s: &str) -> u64 {
        let addr = self.alloc(s.len() + 1);
        self.put_bytes(addr, s.as_bytes());
        addr
    }

    /// Stores consecutive pointers.
    pub fn pointers(&mut self, values: &[u64]) -> u64 {
        let ptr = self.ptr_size();
        let addr = self.alloc(values.len() * ptr as usize);
        for (i, &value) in values.iter().enumerate() {
            self.put_ptr(addr + i as u64 * ptr, value);
        }
        addr
    }

    /// Stores a list of pointers and registers it as a named section.
    pub fn pointer_section(&mut self, name: &str, values: &[u64]) -> u64 {
        let addr = self.pointers(values);
        let size = values.len() as u64 * self.ptr_size();
        self.section(name, addr, size);
        addr
    }

    /// Registers a named section at `vaddr`.
    pub fn section(&mut self, name: &str, vaddr: u64, size: u64) {
        let paddr = self.paddr(vaddr);
        self.sections.push(Section::new(name, vaddr, paddr, size));
    }

    /// Registers a section whose virtual address is unrelated to the base,
    /// backed by the bytes at `backing`.
    pub fn mapped_section(&mut self, name: &str, vaddr: u64, backing: u64, size: u64) {
        let paddr = self.paddr(backing);
        self.sections.push(Section::new(name, vaddr, paddr, size));
    }

    /// Registers a raw section table entry.
    pub fn raw_section(&mut self, name: &str, vaddr: u64, paddr: u64, size: u64) {
        self.sections.push(Section::new(name, vaddr, paddr, size));
    }

    /// Returns the buffer size.
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Overwrites the byte at physical offset `paddr`.
    pub fn poke(&mut self, paddr: u64, value: u8) {
        if let Some(byte) = self.data.get_mut(paddr as usize) {
            *byte = value;
        }
    }

    fn list_header(&mut self, entsize: u32, count: usize, entry_size: usize) -> u64 {
        let addr = self.alloc(8 + count * entry_size);
        self.put_u32(addr, entsize);
        self.put_u32(addr + 4, count as u32);
        addr
    }

    /// Stores a pointer-encoded method list of `(name, types, imp)` entries.
    pub fn method_list(&mut self, methods: &[(u64, u64, u64)]) -> u64 {
        let ptr = self.ptr_size();
        let entsize = 3 * ptr;
        let addr = self.list_header(entsize as u32, methods.len(), entsize as usize);
        for (i, &(name, types, imp)) in methods.iter().enumerate() {
            let entry = addr + 8 + i as u64 * entsize;
            self.put_ptr(entry, name);
            self.put_ptr(entry + ptr, types);
            self.put_ptr(entry + 2 * ptr, imp);
        }
        addr
    }

    /// Stores a relative method list. Each entry gives the absolute targets
    /// `(name_or_selref, types, imp)`; offsets are computed per field.
    pub fn small_method_list(&mut self, methods: &[(u64, u64, u64)], flags: u32) -> u64 {
        let entsize = 12 | 0x8000_0000 | flags;
        let addr = self.list_header(entsize, methods.len(), 12);
        for (i, &(name, types, imp)) in methods.iter().enumerate() {
            let entry = addr + 8 + i as u64 * 12;
            self.put_i32(entry, name.wrapping_sub(entry) as i32);
            self.put_i32(entry + 4, types.wrapping_sub(entry + 4) as i32);
            self.put_i32(entry + 8, imp.wrapping_sub(entry + 8) as i32);
        }
        addr
    }

    /// Stores an ivar list of `(offset_ptr, name, type, alignment, size)` entries.
    pub fn ivar_list(&mut self, ivars: &[(u64, u64, u64, u32, u32)]) -> u64 {
        let ptr = self.ptr_size();
        let entsize = 3 * ptr + 8;
        let addr = self.list_header(entsize as u32, ivars.len(), entsize as usize);
        for (i, &(offset, name, ty, alignment, size)) in ivars.iter().enumerate() {
            let entry = addr + 8 + i as u64 * entsize;
            self.put_ptr(entry, offset);
            self.put_ptr(entry + ptr, name);
            self.put_ptr(entry + 2 * ptr, ty);
            self.put_u32(entry + 3 * ptr, alignment);
            self.put_u32(entry + 3 * ptr + 4, size);
        }
        addr
    }

    /// Stores a u32 ivar offset slot.
    pub fn ivar_offset(&mut self, offset: u32) -> u64 {
        let addr = self.alloc(8);
        self.put_u32(addr, offset);
        addr
    }

    /// Stores a property list of `(name, attributes)` entries.
    pub fn property_list(&mut self, properties: &[(u64, u64)]) -> u64 {
        let ptr = self.ptr_size();
        let entsize = 2 * ptr;
        let addr = self.list_header(entsize as u32, properties.len(), entsize as usize);
        for (i, &(name, attributes)) in properties.iter().enumerate() {
            let entry = addr + 8 + i as u64 * entsize;
            self.put_ptr(entry, name);
            self.put_ptr(entry + ptr, attributes);
        }
        addr
    }

    /// Stores a `protocol_t`.
    pub fn protocol(&mut self, name: u64, instance_methods: u64, class_methods: u64) -> u64 {
        let ptr = self.ptr_size();
        let addr = self.alloc(8 * ptr as usize);
        self.put_ptr(addr + ptr, name);
        self.put_ptr(addr + 3 * ptr, instance_methods);
        self.put_ptr(addr + 4 * ptr, class_methods);
        addr
    }

    /// Stores a protocol list.
    pub fn protocol_list(&mut self, protocols: &[u64]) -> u64 {
        let mut values = vec![protocols.len() as u64];
        values.extend_from_slice(protocols);
        self.pointers(&values)
    }

    /// Stores a `class_ro_t`.
    pub fn class_ro(&mut self, ro: ClassRo) -> u64 {
        let ptr = self.ptr_size();
        let header = if self.width.is_64() { 16 } else { 12 };
        let addr = self.alloc(header as usize + 7 * ptr as usize);
        self.put_u32(addr, ro.flags);
        let fields = addr + header;
        self.put_ptr(fields + ptr, ro.name);
        self.put_ptr(fields + 2 * ptr, ro.methods);
        self.put_ptr(fields + 3 * ptr, ro.protocols);
        self.put_ptr(fields + 4 * ptr, ro.ivars);
        self.put_ptr(fields + 6 * ptr, ro.properties);
        addr
    }

    /// Stores an `objc_class`.
    pub fn class(&mut self, isa: u64, superclass: u64, data: u64) -> u64 {
        self.pointers(&[isa, superclass, 0, 0, data])
    }

    /// Stores a `category_t`.
    pub fn category(
        &mut self,
        name: u64,
        target: u64,
        instance_methods: u64,
        class_methods: u64,
        protocols: u64,
        properties: u64,
    ) -> u64 {
        self.pointers(&[
            name,
            target,
            instance_methods,
            class_methods,
            protocols,
            properties,
        ])
    }

    pub fn relocation(&mut self, addr: u64, symbol: &str) {
        self.relocations.insert(addr, symbol.to_string());
    }

    pub fn symbol(&mut self, name: &str, vaddr: u64) {
        self.symbols.push(Symbol {
            name: name.to_string(),
            vaddr,
        });
    }

    pub fn encrypted(mut self) -> Self {
        self.encrypted = true;
        self
    }

    pub fn thumb(mut self) -> Self {
        self.thumb = true;
        self
    }

    /// Returns the image. Named sections come first so lookups inside them
    /// see their own bounds; a catch-all `__data` section maps the rest.
    pub fn image(&self) -> BinaryImage<'_> {
        let mut sections = self.sections.clone();
        sections.push(Section::new("__data", self.vbase, 0, self.data.len() as u64));
        BinaryImage::new(&self.data, self.width, self.endian)
            .with_sections(sections)
            .with_encryption(self.encrypted)
            .with_thumb(self.thumb)
            .with_base_address(self.vbase)
            .with_relocations(self.relocations.clone())
            .with_symbols(self.symbols.clone())
    }
}
