//! objcmeta - Objective-C and Swift class metadata extractor.
//!
//! This library reads the class metadata the Objective-C runtime and the
//! Swift compiler leave in Mach-O binaries and turns it into a flat list of
//! [`ClassRecord`]s: names, superclasses, methods, instance variables and
//! properties.
//!
//! # Features
//!
//! - Fast memory-mapped file I/O
//! - Thin and universal (fat) Mach-O, 32/64-bit, little and big endian
//! - Bind opcode and chained fixup relocations (arm64e included)
//! - Legacy and small (relative) method lists
//! - Categories, protocols and Swift nominal type descriptors
//! - Bounded reads everywhere: malformed metadata is truncated, not trusted
//!
//! # Example
//!
//! ```no_run
//! use objcmeta::{parse_file, ParseOptions};
//!
//! fn main() -> objcmeta::Result<()> {
//!     let classes = parse_file("/path/to/binary", None, &ParseOptions::default())?;
//!
//!     for class in &classes {
//!         println!("{}", class);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod macho;
pub mod objc;
pub mod util;

// Re-export main types
pub use error::{Error, Result};
pub use macho::MachOFile;
pub use objc::{
    parse_classes, BinaryImage, ClassNameDemangler, ClassRecord, Demangler, Field, Method,
    ParseOptions,
};

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;
use tracing::info;

/// Memory-maps a file read-only.
pub fn map_file<P: AsRef<Path>>(path: P) -> Result<Mmap> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| Error::FileOpen {
        path: path.to_path_buf(),
        source: e,
    })?;

    unsafe { Mmap::map(&file) }.map_err(|e| Error::MemoryMap {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Extracts the class metadata of a Mach-O file.
///
/// # Arguments
///
/// * `path` - Path of the thin or universal Mach-O
/// * `arch` - Architecture slice to use (e.g. "arm64"); `None` picks the first
/// * `options` - Parse options
///
/// # Returns
///
/// Every class, category and Swift type found, in that order: categories,
/// Swift types, then the class list. Fails if the file is not a Mach-O or
/// has no `__objc_classlist` section.
pub fn parse_file<P: AsRef<Path>>(
    path: P,
    arch: Option<&str>,
    options: &ParseOptions,
) -> Result<Vec<ClassRecord>> {
    let path = path.as_ref();
    let mmap = map_file(path)?;
    let macho = MachOFile::parse(&mmap, arch)?;
    info!(
        "Parsing {} ({}, {} sections)",
        path.display(),
        macho.arch_name(),
        macho.image_sections().len()
    );

    let image = macho.to_image();
    parse_classes(&image, None, options, &ClassNameDemangler)
}
