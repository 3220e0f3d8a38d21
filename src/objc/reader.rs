//! Bounded access to the image buffer.
//!
//! Every byte the decoders look at goes through [`Reader`]. A read is only
//! performed once the offset and size have been checked against the buffer,
//! so a hostile section table or pointer can at worst truncate the result.

use tracing::trace;

use super::image::{BinaryImage, Endian, PointerWidth, TranslationResult};
use super::layout::{Fields, Layout, POINTER};
use crate::error::{Error, Result};
use crate::util::{c_str_lossy, memchr_null};

/// Longest name read for a class, method, ivar or property.
pub const MAX_NAME_LEN: usize = 256;

/// Substituted for every name read from an encrypted image.
pub const ENCRYPTED_PLACEHOLDER: &str = "some_encrypted_data";

/// Adds `delta` to an address read from the image.
#[inline]
pub fn advance(addr: u64, delta: u64) -> Result<u64> {
    addr.checked_add(delta).ok_or(Error::Overflow {
        offset: addr,
        size: delta,
    })
}

/// Bounds-checked reader over a [`BinaryImage`].
#[derive(Debug, Clone, Copy)]
pub struct Reader<'i, 'a> {
    image: &'i BinaryImage<'a>,
}

impl<'i, 'a> Reader<'i, 'a> {
    /// Creates a reader over the given image.
    pub fn new(image: &'i BinaryImage<'a>) -> Self {
        Self { image }
    }

    /// Returns the underlying image.
    #[inline]
    pub fn image(&self) -> &'i BinaryImage<'a> {
        self.image
    }

    /// Returns the image pointer width.
    #[inline]
    pub fn width(&self) -> PointerWidth {
        self.image.pointer_width()
    }

    /// Returns the image byte order.
    #[inline]
    pub fn endian(&self) -> Endian {
        self.image.endian()
    }

    /// Returns the pointer size in bytes.
    #[inline]
    pub fn ptr_size(&self) -> u64 {
        self.image.pointer_size() as u64
    }

    /// Translates a virtual address.
    #[inline]
    pub fn translate(&self, vaddr: u64) -> Option<TranslationResult> {
        self.image.translate(vaddr)
    }

    /// Translates a virtual address, reporting failure as [`Error::Unresolvable`].
    #[inline]
    pub fn resolve(&self, vaddr: u64) -> Result<TranslationResult> {
        self.translate(vaddr)
            .ok_or(Error::Unresolvable { addr: vaddr })
    }

    /// Checks that `size` bytes at `offset` lie inside the buffer.
    pub fn check(&self, offset: u64, size: u64) -> Result<()> {
        let available = self.image.size();
        if offset > available {
            return Err(Error::out_of_bounds(offset, size, available));
        }
        let end = offset
            .checked_add(size)
            .ok_or(Error::Overflow { offset, size })?;
        if end > available {
            return Err(Error::out_of_bounds(offset, size, available));
        }
        Ok(())
    }

    /// Reads a record of `size` bytes at `offset`.
    ///
    /// When fewer than `size` bytes remain in the enclosing region only
    /// `remaining` bytes are copied and the rest of the record is zero. The
    /// whole record must still fit inside the buffer.
    pub fn read_record(&self, offset: u64, size: usize, remaining: u64) -> Result<Vec<u8>> {
        self.check(offset, size as u64)?;
        let start = offset as usize;
        let len = (size as u64).min(remaining) as usize;
        let mut record = vec![0u8; size];
        record[..len].copy_from_slice(&self.image.data()[start..start + len]);
        if len < size {
            trace!("Truncated record at {:#x}: {} of {} bytes", offset, len, size);
        }
        Ok(record)
    }

    /// Reads and decodes a record with the given layout at a translated location.
    pub fn read_fields(&self, layout: &Layout, at: TranslationResult) -> Result<Fields> {
        let size = layout.size(self.width());
        let record = self.read_record(at.offset, size, at.remaining)?;
        Ok(layout.decode(&record, self.width(), self.endian()))
    }

    /// Reads and decodes a record at a virtual address.
    pub fn read_fields_va(&self, layout: &Layout, vaddr: u64) -> Result<Fields> {
        let at = self.resolve(vaddr)?;
        self.read_fields(layout, at)
    }

    /// Reads a pointer at a physical offset.
    pub fn read_ptr_pa(&self, offset: u64) -> Result<u64> {
        let size = self.image.pointer_size();
        let record = self.read_record(offset, size, size as u64)?;
        Ok(POINTER.decode(&record, self.width(), self.endian()).get(0))
    }

    /// Reads a pointer at a virtual address.
    ///
    /// The enclosing section must hold the whole pointer.
    pub fn read_ptr_va(&self, vaddr: u64) -> Result<u64> {
        let at = self.resolve(vaddr)?;
        if at.remaining < self.ptr_size() {
            return Err(Error::out_of_bounds(at.offset, self.ptr_size(), at.remaining));
        }
        self.read_ptr_pa(at.offset)
    }

    /// Reads a u32 at a physical offset.
    pub fn read_u32_pa(&self, offset: u64) -> Result<u32> {
        self.check(offset, 4)?;
        let start = offset as usize;
        Ok(self.endian().read_u32(&self.image.data()[start..start + 4]))
    }

    /// Returns up to `max` bytes at `offset`, clamped to the end of the buffer.
    pub fn bytes_at(&self, offset: u64, max: u64) -> Result<&'a [u8]> {
        let available = self.image.size();
        if offset >= available {
            return Err(Error::out_of_bounds(offset, max, available));
        }
        let end = offset.saturating_add(max).min(available);
        Ok(&self.image.data()[offset as usize..end as usize])
    }

    // =========================================================================
    // Names
    // =========================================================================

    /// Reads a NUL-terminated name at a virtual address.
    ///
    /// At most [`MAX_NAME_LEN`] bytes are read, fewer when the enclosing
    /// section ends sooner. Encrypted images yield [`ENCRYPTED_PLACEHOLDER`]
    /// without touching the payload. Empty names are reported as `None`.
    pub fn read_name(&self, vaddr: u64) -> Option<String> {
        let at = self.translate(vaddr)?;
        self.read_name_at(at)
    }

    /// Reads a NUL-terminated name at an already translated location.
    pub fn read_name_at(&self, at: TranslationResult) -> Option<String> {
        if at.remaining == 0 {
            return None;
        }
        if self.image.is_encrypted() {
            return Some(ENCRYPTED_PLACEHOLDER.to_string());
        }
        let len = at.remaining.min(MAX_NAME_LEN as u64);
        let bytes = self.bytes_at(at.offset, len).ok()?;
        let name = c_str_lossy(bytes);
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }

    /// Reads the raw bytes of a NUL-terminated string at a physical offset.
    ///
    /// Used for Swift metadata, which is addressed physically. At least two
    /// bytes must be readable for the string to count.
    pub fn read_cstr_pa(&self, offset: u64) -> Option<&'a [u8]> {
        let bytes = self.bytes_at(offset, MAX_NAME_LEN as u64).ok()?;
        if bytes.len() < 2 {
            return None;
        }
        Some(&bytes[..memchr_null(bytes)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objc::image::Section;
    use crate::objc::layout::LIST_HEADER;

    fn image(data: &[u8]) -> BinaryImage<'_> {
        BinaryImage::new(data, PointerWidth::Bits64, Endian::Little)
            .with_sections(vec![Section::new("__data", 0x1000, 0, data.len() as u64)])
    }

    #[test]
    fn test_check_bounds() {
        let data = vec![0u8; 0x20];
        let image = image(&data);
        let reader = Reader::new(&image);

        assert!(reader.check(0, 0x20).is_ok());
        assert!(reader.check(0x18, 8).is_ok());
        assert!(matches!(
            reader.check(0x19, 8),
            Err(Error::OutOfBounds { .. })
        ));
        assert!(matches!(
            reader.check(0x21, 0),
            Err(Error::OutOfBounds { .. })
        ));
        assert!(matches!(
            reader.check(0x10, u64::MAX),
            Err(Error::Overflow { .. })
        ));
    }

    #[test]
    fn test_read_record_truncated() {
        let data: Vec<u8> = (1..=0x20).collect();
        let image = image(&data);
        let reader = Reader::new(&image);

        let record = reader.read_record(0x10, 8, 3).unwrap();
        assert_eq!(record, vec![0x11, 0x12, 0x13, 0, 0, 0, 0, 0]);

        let record = reader.read_record(0x10, 8, 100).unwrap();
        assert_eq!(record, (0x11..=0x18).collect::<Vec<u8>>());

        assert!(reader.read_record(0x1C, 8, 8).is_err());
    }

    #[test]
    fn test_read_fields_va() {
        let mut data = vec![0u8; 0x20];
        data[8..12].copy_from_slice(&24u32.to_le_bytes());
        data[12..16].copy_from_slice(&3u32.to_le_bytes());
        let image = image(&data);
        let reader = Reader::new(&image);

        let header = reader.read_fields_va(&LIST_HEADER, 0x1008).unwrap();
        assert_eq!(header.u32(0), 24);
        assert_eq!(header.u32(1), 3);
        assert!(matches!(
            reader.read_fields_va(&LIST_HEADER, 0x2000),
            Err(Error::Unresolvable { addr: 0x2000 })
        ));
    }

    #[test]
    fn test_read_name() {
        let mut data = vec![0u8; 0x20];
        data[4..13].copy_from_slice(b"NSObject\0");
        data[0x1E..0x20].copy_from_slice(b"ab");
        let image = image(&data);
        let reader = Reader::new(&image);

        assert_eq!(reader.read_name(0x1004).as_deref(), Some("NSObject"));
        // Unterminated name running into the end of the section
        assert_eq!(reader.read_name(0x101E).as_deref(), Some("ab"));
        // Empty name
        assert_eq!(reader.read_name(0x1000), None);
        // Unmapped
        assert_eq!(reader.read_name(0x5000), None);
    }

    #[test]
    fn test_read_name_encrypted() {
        let mut data = vec![0u8; 0x20];
        data[4..13].copy_from_slice(b"NSObject\0");
        let image = image(&data).with_encryption(true);
        let reader = Reader::new(&image);

        assert_eq!(
            reader.read_name(0x1004).as_deref(),
            Some(ENCRYPTED_PLACEHOLDER)
        );
        assert_eq!(
            reader.read_name(0x1000).as_deref(),
            Some(ENCRYPTED_PLACEHOLDER)
        );
    }

    #[test]
    fn test_read_ptr() {
        let mut data = vec![0u8; 0x20];
        data[0x10..0x18].copy_from_slice(&0x1_0000_4000u64.to_le_bytes());
        let image = image(&data);
        let reader = Reader::new(&image);

        assert_eq!(reader.read_ptr_pa(0x10).unwrap(), 0x1_0000_4000);
        assert_eq!(reader.read_ptr_va(0x1010).unwrap(), 0x1_0000_4000);
        // Only four bytes left in the section
        assert!(reader.read_ptr_va(0x101C).is_err());
    }

    #[test]
    fn test_read_cstr_pa() {
        let mut data = vec![0u8; 0x20];
        data[0..6].copy_from_slice(b"Point\0");
        let image = image(&data);
        let reader = Reader::new(&image);

        assert_eq!(reader.read_cstr_pa(0), Some(&b"Point"[..]));
        assert_eq!(reader.read_cstr_pa(0x1F), None);
        assert_eq!(reader.read_cstr_pa(0x40), None);
    }

    #[test]
    fn test_advance() {
        assert_eq!(advance(0x1000, 8).unwrap(), 0x1008);
        assert_eq!(advance(u64::MAX - 8, 8).unwrap(), u64::MAX);
        assert!(matches!(
            advance(u64::MAX - 7, 8),
            Err(Error::Overflow { offset, size: 8 }) if offset == u64::MAX - 7
        ));
    }
}
