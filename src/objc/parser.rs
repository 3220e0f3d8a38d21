//! Top-level metadata extraction.
//!
//! Locates the metadata sections of an image and drives the decoders over
//! them. Categories are decoded first, then Swift types, then the class
//! list; records come back in that order.

use std::collections::HashMap;
use std::env;

use tracing::{debug, info, warn};

use super::category::parse_category;
use super::class::parse_class;
use super::context::{recover, ParseContext};
use super::demangle::Demangler;
use super::image::{BinaryImage, CacheOptInfo};
use super::model::{ClassRecord, Language};
use super::swift::{parse_types, FieldMetadata};
use crate::error::{Error, Result};

/// Environment switch disabling Swift metadata parsing.
pub const ENV_NO_SWIFT: &str = "OBJCMETA_NOSWIFT";

/// Environment variable holding the class limit.
pub const ENV_CLASS_LIMIT: &str = "OBJCMETA_LIMIT";

const CLASSLIST: &str = "__objc_classlist";
const CATLIST: &str = "__objc_catlist";
const SWIFT_TYPES: &str = "swift5_types";
const SWIFT_FIELDMD: &str = "swift5_fieldmd";

/// Options for one parse pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOptions {
    /// Decode Swift type metadata
    pub parse_swift: bool,
    /// Maximum number of classes (and Swift types) to decode, 0 for no limit
    pub class_limit: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            parse_swift: true,
            class_limit: 0,
        }
    }
}

impl ParseOptions {
    /// Creates options from `OBJCMETA_NOSWIFT` and `OBJCMETA_LIMIT`.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Ok(value) = env::var(ENV_NO_SWIFT) {
            options.parse_swift = !is_truthy(&value);
        }
        if let Ok(value) = env::var(ENV_CLASS_LIMIT) {
            match value.trim().parse() {
                Ok(limit) => options.class_limit = limit,
                Err(_) => warn!("Ignoring invalid {}: {:?}", ENV_CLASS_LIMIT, value),
            }
        }
        options
    }

    /// Enables or disables Swift parsing.
    pub fn with_swift(mut self, parse_swift: bool) -> Self {
        self.parse_swift = parse_swift;
        self
    }

    /// Sets the class limit.
    pub fn with_class_limit(mut self, class_limit: usize) -> Self {
        self.class_limit = class_limit;
        self
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// A physical window of the image holding one metadata section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaSection {
    /// Physical offset
    pub addr: u64,
    /// Size in bytes
    pub size: u64,
}

impl MetaSection {
    /// Returns true if `addr` lies inside the window.
    #[inline]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.addr && addr - self.addr < self.size
    }

    /// Clamps the window to a buffer of `bufsize` bytes.
    ///
    /// Sections starting outside the buffer, or claiming to be at least as
    /// large as it, are dropped. Sections running past the end are cut short.
    fn adjust_bounds(self, name: &str, bufsize: u64) -> Option<Self> {
        if self.addr >= bufsize || self.size >= bufsize {
            warn!(
                "Dropping section {} at {:#x} (size {:#x}): outside image",
                name, self.addr, self.size
            );
            return None;
        }
        if self.addr + self.size >= bufsize {
            let size = bufsize - self.addr;
            warn!(
                "Truncating section {} at {:#x} from {:#x} to {:#x} bytes",
                name, self.addr, self.size, size
            );
            return Some(Self { size, ..self });
        }
        Some(self)
    }
}

/// The metadata sections of one image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetaSections {
    /// `__objc_classlist`
    pub classlist: Option<MetaSection>,
    /// `__objc_catlist`
    pub catlist: Option<MetaSection>,
    /// `__swift5_types`
    pub swift_types: Option<MetaSection>,
    /// `__swift5_fieldmd`
    pub swift_fieldmd: Option<MetaSection>,
}

impl MetaSections {
    /// Scans the section table once. The first match for each slot wins.
    pub fn locate(image: &BinaryImage<'_>) -> Self {
        let bufsize = image.size();
        let mut found = Self::default();
        for section in image.sections() {
            let slot = if section.name.contains(CLASSLIST) {
                &mut found.classlist
            } else if section.name.contains(CATLIST) {
                &mut found.catlist
            } else if section.name.contains(SWIFT_TYPES) {
                &mut found.swift_types
            } else if section.name.contains(SWIFT_FIELDMD) {
                &mut found.swift_fieldmd
            } else {
                continue;
            };
            if slot.is_some() {
                continue;
            }
            let window = MetaSection {
                addr: section.paddr,
                size: section.size,
            };
            *slot = window.adjust_bounds(&section.name, bufsize);
        }
        found
    }
}

/// Extracts every class, category and Swift type from `image`.
///
/// Fails with [`Error::MissingClassList`] if the image has no usable class
/// list, and with the underlying error if a class-list slot cannot be read.
/// Everything else is recovered per entity.
pub fn parse_classes(
    image: &BinaryImage<'_>,
    opt_info: Option<CacheOptInfo>,
    options: &ParseOptions,
    demangler: &dyn Demangler,
) -> Result<Vec<ClassRecord>> {
    let ctx = ParseContext::new(image, opt_info, demangler);
    let sections = MetaSections::locate(image);
    debug!("Metadata sections: {:?}", sections);

    let mut classes = Vec::new();

    if let Some(catlist) = sections.catlist {
        parse_categories(&ctx, catlist, &mut classes);
    }

    if options.parse_swift {
        if let (Some(types), Some(fieldmd)) = (sections.swift_types, sections.swift_fieldmd) {
            match FieldMetadata::load(&ctx, fieldmd) {
                Ok(fieldmd) => {
                    recover(
                        parse_types(&ctx, types, &fieldmd, options.class_limit, &mut classes),
                        "swift5_types",
                        types.addr,
                    );
                }
                Err(e) => warn!("Failed to load swift5_fieldmd: {}", e),
            }
        }
    }

    let classlist = sections
        .classlist
        .filter(|s| s.size > 0)
        .ok_or(Error::MissingClassList)?;
    parse_classlist(&ctx, classlist, options.class_limit, &mut classes)?;

    info!("Extracted {} classes", classes.len());
    Ok(classes)
}

/// Decodes the category list, merging categories with the same name.
fn parse_categories(
    ctx: &ParseContext<'_, '_>,
    catlist: MetaSection,
    classes: &mut Vec<ClassRecord>,
) {
    let reader = ctx.reader;
    let ptr = reader.ptr_size();
    let mut index: HashMap<String, usize> = HashMap::new();

    let mut offset = 0;
    while offset + ptr <= catlist.size {
        let slot = catlist.addr + offset;
        offset += ptr;

        let addr = match reader.read_ptr_pa(slot) {
            Ok(addr) => addr,
            Err(e) => {
                warn!("Failed to read category list at {:#x}: {}", slot, e);
                break;
            }
        };
        let Some(category) = recover(parse_category(ctx, addr), "category", addr).flatten()
        else {
            continue;
        };

        match index.get(&category.name) {
            Some(&i) => classes[i].absorb(category),
            None => {
                index.insert(category.name.clone(), classes.len());
                classes.push(category);
            }
        }
    }
}

/// Decodes the class list proper.
fn parse_classlist(
    ctx: &ParseContext<'_, '_>,
    classlist: MetaSection,
    limit: usize,
    classes: &mut Vec<ClassRecord>,
) -> Result<()> {
    let reader = ctx.reader;
    let ptr = reader.ptr_size();
    let mut unnamed = 0usize;

    let mut offset = 0;
    let mut ordinal = 0usize;
    while offset < classlist.size {
        if limit > 0 && ordinal >= limit {
            warn!("Class limit reached ({})", limit);
            break;
        }
        if classlist.size - offset < ptr {
            warn!("Chopped class list at {:#x}", classlist.addr + offset);
            break;
        }

        let class_addr = reader.read_ptr_pa(classlist.addr + offset)?;
        let mut class = ClassRecord::new(Language::ObjC);
        parse_class(ctx, &mut class, class_addr);
        if class.is_unnamed() {
            class.name = format!("UnnamedClass{}", unnamed);
            unnamed += 1;
        }
        classes.push(class);

        offset += ptr;
        ordinal += 1;
    }
    Ok(())
}
