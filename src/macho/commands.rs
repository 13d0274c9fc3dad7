//! Load command traversal.
//!
//! Two walks share one bounds check:
//!
//! - [`LoadCommands`] is strict. It yields `Result` items and stops after the
//!   first malformed command, reporting its index. Structural validation and
//!   any caller that needs certification use it; validation adds the
//!   alignment check on top.
//! - [`LenientLoadCommands`] is best-effort. It yields commands until the
//!   first inconsistency (including a `cmdsize` that is not a multiple of
//!   four) and then ends silently. Segment, symbol, entitlement and string
//!   discovery use it, so they degrade to "nothing found" instead of failing.
//!
//! Both are lazy: dropping the iterator after any element stops the walk.

use std::iter::FusedIterator;

use tracing::debug;
use zerocopy::FromBytes;

use super::constants::*;
use super::header::ThinHeaderView;
use super::structs::LoadCommandPrefix;
use crate::error::{Error, MalformedReason, Result};
use crate::util::{bytes_at, c_str_at, read_record, read_u32_at, read_u64_at, ByteSwap, Endian};

// =============================================================================
// Load Command
// =============================================================================

/// One load command, borrowed from the image.
#[derive(Debug, Clone, Copy)]
pub struct LoadCommand<'a> {
    index: u32,
    cmd: u32,
    cmdsize: u32,
    offset: usize,
    bytes: &'a [u8],
    endian: Endian,
}

impl<'a> LoadCommand<'a> {
    /// Zero-based position in the command stream.
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Command kind (`LC_*`).
    #[inline]
    pub fn cmd(&self) -> u32 {
        self.cmd
    }

    /// Declared size, including the 8-byte prefix.
    #[inline]
    pub fn cmdsize(&self) -> u32 {
        self.cmdsize
    }

    /// Offset of the command from the start of the image.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The `cmdsize` bytes of the command, prefix included.
    #[inline]
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Byte order of the image.
    #[inline]
    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Returns true if the loader must understand this command.
    #[inline]
    pub fn is_required(&self) -> bool {
        self.cmd & LC_REQ_DYLD != 0
    }

    /// Reads a u32 field at `offset` within the command.
    #[inline]
    pub fn read_u32(&self, offset: usize) -> Option<u32> {
        read_u32_at(self.bytes, offset, self.endian)
    }

    /// Reads a u64 field at `offset` within the command.
    #[inline]
    pub fn read_u64(&self, offset: usize) -> Option<u64> {
        read_u64_at(self.bytes, offset, self.endian)
    }

    /// Decodes the command as `T`, or `None` if it is too short.
    #[inline]
    pub fn parse<T: FromBytes + ByteSwap>(&self) -> Option<T> {
        read_record(self.bytes, 0, self.endian)
    }

    /// Returns the bytes following the fixed `T`-sized part of the command.
    pub fn payload_after(&self, fixed: usize) -> Option<&'a [u8]> {
        self.bytes.get(fixed..)
    }

    /// Reads the string whose offset is stored in the u32 at `field_offset`.
    ///
    /// The string must start inside the command and be terminated before
    /// its end.
    pub fn string_at(&self, field_offset: usize) -> Option<&'a str> {
        let offset = self.read_u32(field_offset)? as usize;
        c_str_at(self.bytes, offset)
    }

    /// Returns the symbolic name of the command kind, if known.
    pub fn name(&self) -> Option<&'static str> {
        load_command_name(self.cmd)
    }
}

/// Returns the `LC_*` name of a command kind.
pub fn load_command_name(cmd: u32) -> Option<&'static str> {
    Some(match cmd {
        LC_SEGMENT => "LC_SEGMENT",
        LC_SYMTAB => "LC_SYMTAB",
        LC_SYMSEG => "LC_SYMSEG",
        LC_THREAD => "LC_THREAD",
        LC_UNIXTHREAD => "LC_UNIXTHREAD",
        LC_LOADFVMLIB => "LC_LOADFVMLIB",
        LC_IDFVMLIB => "LC_IDFVMLIB",
        LC_IDENT => "LC_IDENT",
        LC_FVMFILE => "LC_FVMFILE",
        LC_PREPAGE => "LC_PREPAGE",
        LC_DYSYMTAB => "LC_DYSYMTAB",
        LC_LOAD_DYLIB => "LC_LOAD_DYLIB",
        LC_ID_DYLIB => "LC_ID_DYLIB",
        LC_LOAD_DYLINKER => "LC_LOAD_DYLINKER",
        LC_ID_DYLINKER => "LC_ID_DYLINKER",
        LC_PREBOUND_DYLIB => "LC_PREBOUND_DYLIB",
        LC_ROUTINES => "LC_ROUTINES",
        LC_SUB_FRAMEWORK => "LC_SUB_FRAMEWORK",
        LC_SUB_UMBRELLA => "LC_SUB_UMBRELLA",
        LC_SUB_CLIENT => "LC_SUB_CLIENT",
        LC_SUB_LIBRARY => "LC_SUB_LIBRARY",
        LC_TWOLEVEL_HINTS => "LC_TWOLEVEL_HINTS",
        LC_PREBIND_CKSUM => "LC_PREBIND_CKSUM",
        LC_LOAD_WEAK_DYLIB => "LC_LOAD_WEAK_DYLIB",
        LC_SEGMENT_64 => "LC_SEGMENT_64",
        LC_ROUTINES_64 => "LC_ROUTINES_64",
        LC_UUID => "LC_UUID",
        LC_RPATH => "LC_RPATH",
        LC_CODE_SIGNATURE => "LC_CODE_SIGNATURE",
        LC_SEGMENT_SPLIT_INFO => "LC_SEGMENT_SPLIT_INFO",
        LC_REEXPORT_DYLIB => "LC_REEXPORT_DYLIB",
        LC_LAZY_LOAD_DYLIB => "LC_LAZY_LOAD_DYLIB",
        LC_ENCRYPTION_INFO => "LC_ENCRYPTION_INFO",
        LC_DYLD_INFO => "LC_DYLD_INFO",
        LC_DYLD_INFO_ONLY => "LC_DYLD_INFO_ONLY",
        LC_LOAD_UPWARD_DYLIB => "LC_LOAD_UPWARD_DYLIB",
        LC_VERSION_MIN_MACOSX => "LC_VERSION_MIN_MACOSX",
        LC_VERSION_MIN_IPHONEOS => "LC_VERSION_MIN_IPHONEOS",
        LC_FUNCTION_STARTS => "LC_FUNCTION_STARTS",
        LC_DYLD_ENVIRONMENT => "LC_DYLD_ENVIRONMENT",
        LC_MAIN => "LC_MAIN",
        LC_DATA_IN_CODE => "LC_DATA_IN_CODE",
        LC_SOURCE_VERSION => "LC_SOURCE_VERSION",
        LC_DYLIB_CODE_SIGN_DRS => "LC_DYLIB_CODE_SIGN_DRS",
        LC_ENCRYPTION_INFO_64 => "LC_ENCRYPTION_INFO_64",
        LC_LINKER_OPTION => "LC_LINKER_OPTION",
        LC_LINKER_OPTIMIZATION_HINT => "LC_LINKER_OPTIMIZATION_HINT",
        LC_VERSION_MIN_TVOS => "LC_VERSION_MIN_TVOS",
        LC_VERSION_MIN_WATCHOS => "LC_VERSION_MIN_WATCHOS",
        LC_NOTE => "LC_NOTE",
        LC_BUILD_VERSION => "LC_BUILD_VERSION",
        LC_DYLD_EXPORTS_TRIE => "LC_DYLD_EXPORTS_TRIE",
        LC_DYLD_CHAINED_FIXUPS => "LC_DYLD_CHAINED_FIXUPS",
        LC_FILESET_ENTRY => "LC_FILESET_ENTRY",
        LC_ATOM_INFO => "LC_ATOM_INFO",
        LC_FUNCTION_VARIANTS => "LC_FUNCTION_VARIANTS",
        LC_FUNCTION_VARIANT_FIXUPS => "LC_FUNCTION_VARIANT_FIXUPS",
        _ => return None,
    })
}

// =============================================================================
// Strict Walk
// =============================================================================

/// Strict, lazy walk over the command stream.
///
/// Yields exactly `ncmds` commands, or stops after the first
/// `MalformedLoadCommand` error.
#[derive(Debug, Clone)]
pub struct LoadCommands<'a> {
    data: &'a [u8],
    endian: Endian,
    ncmds: u32,
    index: u32,
    start: usize,
    offset: usize,
    end: usize,
    done: bool,
}

impl<'a> LoadCommands<'a> {
    fn new(view: &ThinHeaderView<'a>) -> Self {
        let range = view.commands_range();
        Self {
            data: view.data(),
            endian: view.endian(),
            ncmds: view.ncmds(),
            index: 0,
            start: range.start,
            offset: range.start,
            end: range.end,
            done: false,
        }
    }

    /// Bytes of the command stream visited so far.
    pub fn consumed(&self) -> usize {
        self.offset - self.start
    }

    fn step(&mut self) -> Result<LoadCommand<'a>> {
        let index = self.index;
        let current = self.offset;

        if current >= self.end || self.end - current < LoadCommandPrefix::SIZE {
            return Err(Error::malformed(index, MalformedReason::PastEnd));
        }

        let prefix: LoadCommandPrefix = read_record(self.data, current, self.endian)
            .ok_or(Error::malformed(index, MalformedReason::PastEnd))?;

        if (prefix.cmdsize as usize) < LoadCommandPrefix::SIZE {
            return Err(Error::malformed(index, MalformedReason::TooSmall));
        }

        let next = current
            .checked_add(prefix.cmdsize as usize)
            .ok_or(Error::malformed(index, MalformedReason::Overflow))?;

        if next > self.end {
            return Err(Error::malformed(index, MalformedReason::TooLarge));
        }

        let bytes = bytes_at(self.data, current, prefix.cmdsize as usize)
            .ok_or(Error::malformed(index, MalformedReason::TooLarge))?;

        self.offset = next;
        self.index += 1;

        Ok(LoadCommand {
            index,
            cmd: prefix.cmd,
            cmdsize: prefix.cmdsize,
            offset: current,
            bytes,
            endian: self.endian,
        })
    }
}

impl<'a> Iterator for LoadCommands<'a> {
    type Item = Result<LoadCommand<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.index >= self.ncmds {
            return None;
        }

        let item = self.step();
        if item.is_err() {
            self.done = true;
        }
        Some(item)
    }
}

impl FusedIterator for LoadCommands<'_> {}

// =============================================================================
// Lenient Walk
// =============================================================================

/// Best-effort walk that ends silently at the first inconsistency.
#[derive(Debug, Clone)]
pub struct LenientLoadCommands<'a> {
    inner: LoadCommands<'a>,
}

impl<'a> Iterator for LenientLoadCommands<'a> {
    type Item = LoadCommand<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next()? {
            Ok(command) if command.cmdsize % 4 != 0 => {
                debug!(
                    "Stopping lenient walk at command {}: {}",
                    command.index,
                    MalformedReason::Misaligned
                );
                self.inner.done = true;
                None
            }
            Ok(command) => Some(command),
            Err(e) => {
                debug!("Stopping lenient walk: {}", e);
                None
            }
        }
    }
}

impl FusedIterator for LenientLoadCommands<'_> {}

impl<'a> ThinHeaderView<'a> {
    /// Returns the strict command walk.
    pub fn load_commands(&self) -> LoadCommands<'a> {
        LoadCommands::new(self)
    }

    /// Returns the best-effort command walk.
    pub fn lenient_load_commands(&self) -> LenientLoadCommands<'a> {
        LenientLoadCommands {
            inner: LoadCommands::new(self),
        }
    }

    /// Returns the first command of kind `cmd` reachable by the lenient walk.
    pub fn find_command(&self, cmd: u32) -> Option<LoadCommand<'a>> {
        self.lenient_load_commands().find(|c| c.cmd() == cmd)
    }
}
