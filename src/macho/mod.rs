//! Mach-O container parsing.
//!
//! This module reads thin and universal Mach-O files and produces the
//! [`BinaryImage`](crate::objc::BinaryImage) consumed by the metadata
//! decoders: sections, defined symbols, bound-symbol relocations (from bind
//! opcodes or chained fixups) and image facts.

mod bind;
mod constants;
mod context;
mod fixups;
mod structs;

pub use bind::{parse_bind_info, BindKind, BindRecord};
pub use constants::*;
pub use context::*;
pub use fixups::{apply_chained_fixups, decode_pointer, pointer_stride, ChainedPointer};
pub use structs::*;
