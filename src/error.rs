//! Error types for Mach-O class metadata extraction.
//!
//! The decoders in [`crate::objc`] recover from almost every error locally:
//! a failing list or entity is abandoned and the partial result kept. Only the
//! container layer and the absence of a class list surface errors to callers.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for metadata extraction.
#[derive(Error, Debug)]
pub enum Error {
    // ==================== I/O Errors ====================
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to open file '{path}': {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to memory map file '{path}': {source}")]
    MemoryMap {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ==================== Bounds Errors ====================
    #[error("read of {size} bytes at {offset:#x} exceeds buffer (size: {available:#x})")]
    OutOfBounds {
        offset: u64,
        size: u64,
        available: u64,
    },

    #[error("read of {size} bytes at {offset:#x} overflows")]
    Overflow { offset: u64, size: u64 },

    #[error("virtual address {addr:#x} is not covered by any section")]
    Unresolvable { addr: u64 },

    #[error("list at {addr:#x} has malformed count {count}")]
    MalformedCount { addr: u64, count: u64 },

    // ==================== Metadata Errors ====================
    #[error("no usable __objc_classlist section")]
    MissingClassList,

    // ==================== Mach-O Errors ====================
    #[error("invalid Mach-O magic: {0:#x}")]
    InvalidMachoMagic(u32),

    #[error("architecture '{0}' not present in universal binary")]
    UnsupportedArch(String),

    #[error("load command at offset {offset:#x} extends beyond header")]
    LoadCommandOverflow { offset: usize },

    #[error("invalid ULEB128 at offset {offset:#x}")]
    InvalidUleb128 { offset: usize },

    #[error("unsupported chained pointer format: {0}")]
    UnsupportedPointerFormat(u16),

    // ==================== Parse Errors ====================
    #[error("parse error at offset {offset:#x}: {reason}")]
    Parse { offset: usize, reason: String },

    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },
}

/// A specialized Result type for metadata extraction.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns true if this error only invalidates the entity being decoded.
    ///
    /// Decoders log these at debug level and keep whatever was decoded so far.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::OutOfBounds { .. }
                | Error::Overflow { .. }
                | Error::Unresolvable { .. }
                | Error::MalformedCount { .. }
        )
    }

    /// Creates a parse error with a formatted message.
    #[inline]
    pub fn parse(offset: usize, reason: impl Into<String>) -> Self {
        Error::Parse {
            offset,
            reason: reason.into(),
        }
    }

    /// Creates an out of bounds error.
    #[inline]
    pub fn out_of_bounds(offset: u64, size: u64, available: u64) -> Self {
        Error::OutOfBounds {
            offset,
            size,
            available,
        }
    }

    /// Creates a buffer too small error.
    #[inline]
    pub fn buffer_too_small(needed: usize, available: usize) -> Self {
        Error::BufferTooSmall { needed, available }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable() {
        assert!(Error::Unresolvable { addr: 0x1000 }.is_recoverable());
        assert!(Error::out_of_bounds(0x10, 8, 0x12).is_recoverable());
        assert!(!Error::MissingClassList.is_recoverable());
        assert!(!Error::InvalidMachoMagic(0).is_recoverable());
    }

    #[test]
    fn test_display() {
        let err = Error::MalformedCount {
            addr: 0x4000,
            count: 0,
        };
        assert_eq!(err.to_string(), "list at 0x4000 has malformed count 0");
    }
}
