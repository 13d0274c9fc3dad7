//! Error types for Mach-O, fat and shared cache inspection.
//!
//! Structural errors carry enough context (command index, expected and
//! actual sizes) to reproduce the failure from the input bytes alone.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::format::FileFormat;

/// Why a load command failed the bounds walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedReason {
    /// The walk reached the end of the command stream before visiting
    /// `ncmds` commands, or the 8-byte prefix does not fit.
    PastEnd,
    /// `cmdsize` is smaller than the 8-byte prefix.
    TooSmall,
    /// `cmdsize` places the next command beyond the command stream.
    TooLarge,
    /// Advancing by `cmdsize` overflows.
    Overflow,
    /// `cmdsize` is not a multiple of four.
    Misaligned,
}

impl fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MalformedReason::PastEnd => "command stream ends before this command",
            MalformedReason::TooSmall => "cmdsize is smaller than 8",
            MalformedReason::TooLarge => "cmdsize extends past the command stream",
            MalformedReason::Overflow => "cmdsize overflows the command offset",
            MalformedReason::Misaligned => "cmdsize is not a multiple of 4",
        })
    }
}

/// The main error type for binary inspection operations.
#[derive(Error, Debug)]
pub enum Error {
    // ==================== I/O Errors ====================
    /// An I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The input file could not be opened.
    #[error("failed to open file '{path}': {source}")]
    FileOpen {
        /// Path that was opened
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The input file could not be mapped.
    #[error("failed to memory map file '{path}': {source}")]
    MemoryMap {
        /// Path that was mapped
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    // ==================== Format Errors ====================
    /// The leading magic is not a known format.
    #[error("unrecognized format: magic {magic:#010x}")]
    UnrecognizedFormat {
        /// First four bytes, read big-endian
        magic: u32,
    },

    /// The input is shorter than a required fixed-size record.
    #[error("truncated input: need {needed} bytes, have {available}")]
    TruncatedInput {
        /// Bytes required
        needed: u64,
        /// Bytes present
        available: u64,
    },

    /// The input was opened as one container kind but is another.
    #[error("expected a {expected}, found {found}")]
    NotExpectedContainerKind {
        /// Requested kind
        expected: &'static str,
        /// Sniffed format
        found: FileFormat,
    },

    // ==================== Load Command Errors ====================
    /// A load command breaks the bounds of the command stream.
    #[error("malformed load command {index}: {reason}")]
    MalformedLoadCommand {
        /// Zero-based command index
        index: u32,
        /// Which check failed
        reason: MalformedReason,
    },

    /// An unknown command has the "required" bit set.
    #[error("unknown required load command {index}: {cmd:#x}")]
    UnknownRequiredLoadCommand {
        /// Zero-based command index
        index: u32,
        /// Command kind
        cmd: u32,
    },

    /// A command's size does not match its kind.
    #[error("load command {index} ({cmd:#x}) has size {actual}, expected {expected}")]
    WrongRecordSize {
        /// Zero-based command index
        index: u32,
        /// Command kind
        cmd: u32,
        /// Size the kind requires
        expected: u64,
        /// Declared `cmdsize`
        actual: u32,
    },

    /// A string offset points outside its command.
    #[error("load command {index}: string offset {offset} is outside cmdsize {cmdsize}")]
    StringOffsetOverflow {
        /// Zero-based command index
        index: u32,
        /// String offset relative to the command
        offset: u32,
        /// Declared `cmdsize`
        cmdsize: u32,
    },

    /// A string runs to the end of its command without a terminator.
    #[error("load command {index}: string is not terminated before the end of the command")]
    UnterminatedString {
        /// Zero-based command index
        index: u32,
    },

    /// The header's file type is not one this crate inspects.
    #[error("unsupported Mach-O file type: {0:#x}")]
    UnsupportedFileType(u32),

    /// A segment's file range extends past the end of the image.
    #[error("segment {index} ({name}) ends at file offset {end:#x}, past image size {available:#x}")]
    SegmentOutsideFile {
        /// Zero-based segment index
        index: usize,
        /// Segment name
        name: String,
        /// `fileoff + filesize`, saturated
        end: u64,
        /// Image length
        available: u64,
    },

    // ==================== Fat Errors ====================
    /// The fat header is inconsistent.
    #[error("malformed fat header: {0}")]
    MalformedFatHeader(&'static str),

    /// A fat arch entry is inconsistent.
    #[error("malformed fat arch {index}: {reason}")]
    MalformedFatArch {
        /// Zero-based arch index
        index: u32,
        /// Which check failed
        reason: &'static str,
    },

    // ==================== Cache Format Errors ====================
    /// The input does not start with `dyld_v1`.
    #[error("invalid dyld cache magic: {0:?}")]
    InvalidCacheMagic([u8; 16]),

    /// No cache mapping covers an address.
    #[error("address {addr:#x} not found in any cache mapping")]
    AddressNotFound {
        /// Unslid address
        addr: u64,
    },

    /// Neither the cache nor its symbols file has a local symbols table.
    #[error("cache has no local symbols")]
    MissingLocalSymbols,

    /// The symbols file does not belong to the cache.
    #[error("local symbols UUID mismatch for '{path}': expected {expected}, got {actual}")]
    LocalSymbolsUuidMismatch {
        /// Path of the symbols file
        path: PathBuf,
        /// UUID named by the cache header
        expected: String,
        /// UUID of the symbols file
        actual: String,
    },

    /// An image's run of nlist records extends past the nlist array.
    #[error(
        "local symbol run for image {index} ({start}+{count}) exceeds {available} symbols"
    )]
    LocalSymbolRunOutOfBounds {
        /// Image table index
        index: usize,
        /// First record of the run
        start: u64,
        /// Records in the run
        count: u64,
        /// Records in the array
        available: u64,
    },

    /// No image has the requested install name.
    #[error("image not found: {name}")]
    ImageNotFound {
        /// Requested install name
        name: String,
    },

    // ==================== Symbol Errors ====================
    /// The export trie is truncated or cyclic.
    #[error("invalid export trie at offset {offset:#x}")]
    InvalidExportTrie {
        /// Offset of the bad node
        offset: usize,
    },

    /// A LEB128 value is truncated or too long.
    #[error("invalid ULEB128 at offset {offset:#x}")]
    InvalidUleb128 {
        /// Offset of the value
        offset: usize,
    },

    /// The bind stream holds an opcode this crate does not know.
    #[error("invalid bind opcode {opcode:#x} at offset {offset:#x}")]
    InvalidBindOpcode {
        /// Opcode byte, immediate masked off
        opcode: u8,
        /// Offset in the bind stream
        offset: usize,
    },

    /// The chained fixups header or import table is inconsistent.
    #[error("invalid chained fixups: {reason}")]
    InvalidChainedFixups {
        /// Which check failed
        reason: &'static str,
    },
}

/// A specialized Result type for inspection operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns true if this error describes a structural defect of the input
    /// rather than an environment failure such as I/O.
    #[inline]
    pub fn is_structural(&self) -> bool {
        !matches!(
            self,
            Error::Io(_) | Error::FileOpen { .. } | Error::MemoryMap { .. }
        )
    }

    /// Creates a truncated input error.
    #[inline]
    pub fn truncated(needed: u64, available: usize) -> Self {
        Error::TruncatedInput {
            needed,
            available: available as u64,
        }
    }

    /// Creates a malformed load command error.
    #[inline]
    pub fn malformed(index: u32, reason: MalformedReason) -> Self {
        Error::MalformedLoadCommand { index, reason }
    }
}
