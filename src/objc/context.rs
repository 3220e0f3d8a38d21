//! State shared by the decoders during one parse pass.

use tracing::{debug, warn};

use super::demangle::Demangler;
use super::image::{BinaryImage, CacheOptInfo};
use super::reader::Reader;
use crate::error::Result;

/// External-class symbol prefix used by relocations naming a class.
pub const OBJC_CLASS_PREFIX: &str = "_OBJC_CLASS_$_";

/// Context for a single parse pass.
///
/// Holds the reader over the image plus the optional collaborators the
/// decoders consult. Nothing here is mutated while parsing.
pub struct ParseContext<'p, 'a> {
    /// Bounds-checked access to the image
    pub reader: Reader<'p, 'a>,
    /// Shared-cache selector base, if the image came out of a cache
    pub opt_info: Option<CacheOptInfo>,
    /// Swift symbol demangler
    pub demangler: &'p dyn Demangler,
}

impl<'p, 'a> ParseContext<'p, 'a> {
    /// Creates a context over `image`.
    pub fn new(
        image: &'p BinaryImage<'a>,
        opt_info: Option<CacheOptInfo>,
        demangler: &'p dyn Demangler,
    ) -> Self {
        Self {
            reader: Reader::new(image),
            opt_info,
            demangler,
        }
    }

    /// Returns the image being parsed.
    #[inline]
    pub fn image(&self) -> &'p BinaryImage<'a> {
        self.reader.image()
    }

    /// Returns the selector string base if one is usable.
    #[inline]
    pub fn sel_string_base(&self) -> Option<u64> {
        self.opt_info
            .map(|oi| oi.sel_string_base)
            .filter(|&base| base != 0)
    }

    /// Looks up an external class name relocated into the slot at `addr`.
    ///
    /// Returns the name with the class symbol prefix stripped, or `None` if
    /// there is no relocation or it does not name a class.
    pub fn relocated_class(&self, addr: u64) -> Option<&'p str> {
        self.image()
            .relocation_at(addr)?
            .strip_prefix(OBJC_CLASS_PREFIX)
    }
}

/// Swallows a decode failure for one entity, logging it.
///
/// Decoders abandon the current list or record on the first bounds
/// violation; the caller keeps whatever was decoded before it.
pub fn recover<T>(result: Result<T>, what: &str, addr: u64) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) if e.is_recoverable() => {
            debug!("Skipping {} at {:#x}: {}", what, addr, e);
            None
        }
        Err(e) => {
            warn!("Failed to parse {} at {:#x}: {}", what, addr, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::error::Error;
    use crate::objc::demangle::NoDemangler;
    use crate::objc::image::{Endian, PointerWidth};

    #[test]
    fn test_relocated_class() {
        let data = [0u8; 16];
        let mut relocs = BTreeMap::new();
        relocs.insert(0x1008, "_OBJC_CLASS_$_NSObject".to_string());
        relocs.insert(0x1010, "_objc_msgSend".to_string());
        let image =
            BinaryImage::new(&data, PointerWidth::Bits64, Endian::Little).with_relocations(relocs);
        let ctx = ParseContext::new(&image, None, &NoDemangler);

        assert_eq!(ctx.relocated_class(0x1008), Some("NSObject"));
        assert_eq!(ctx.relocated_class(0x1010), None);
        assert_eq!(ctx.relocated_class(0x1018), None);
    }

    #[test]
    fn test_sel_string_base() {
        let data = [0u8; 16];
        let image = BinaryImage::new(&data, PointerWidth::Bits64, Endian::Little);

        let ctx = ParseContext::new(&image, None, &NoDemangler);
        assert_eq!(ctx.sel_string_base(), None);

        let ctx = ParseContext::new(&image, Some(CacheOptInfo::default()), &NoDemangler);
        assert_eq!(ctx.sel_string_base(), None);

        let info = CacheOptInfo {
            sel_string_base: 0x1_8000_0000,
        };
        let ctx = ParseContext::new(&image, Some(info), &NoDemangler);
        assert_eq!(ctx.sel_string_base(), Some(0x1_8000_0000));
    }

    #[test]
    fn test_recover() {
        assert_eq!(recover(Ok::<_, Error>(3), "list", 0), Some(3));
        assert_eq!(
            recover::<()>(Err(Error::Unresolvable { addr: 0x10 }), "list", 0x10),
            None
        );
        assert_eq!(
            recover::<()>(Err(Error::MissingClassList), "list", 0),
            None
        );
    }
}
