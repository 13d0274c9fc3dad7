//! Mach-O and fat binary structures.
//!
//! These structures match the on-disk format of Mach-O files. They are read
//! with [`read_record`](crate::util::read_record), which decodes them with
//! `zerocopy` and byte-swaps records stored in the foreign byte order.

use std::fmt;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::util::{fixed_name, impl_byte_swap};

// =============================================================================
// Header Structures
// =============================================================================

/// 32-bit Mach-O header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct MachHeader {
    /// Magic number (MH_MAGIC)
    pub magic: u32,
    /// CPU type
    pub cputype: u32,
    /// CPU subtype
    pub cpusubtype: u32,
    /// File type
    pub filetype: u32,
    /// Number of load commands
    pub ncmds: u32,
    /// Size of load commands
    pub sizeofcmds: u32,
    /// Flags
    pub flags: u32,
}

impl MachHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 28;
}

/// 64-bit Mach-O header.
///
/// 32-bit headers are widened into this layout with `reserved` set to zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct MachHeader64 {
    /// Magic number (MH_MAGIC_64)
    pub magic: u32,
    /// CPU type
    pub cputype: u32,
    /// CPU subtype
    pub cpusubtype: u32,
    /// File type
    pub filetype: u32,
    /// Number of load commands
    pub ncmds: u32,
    /// Size of load commands
    pub sizeofcmds: u32,
    /// Flags
    pub flags: u32,
    /// Reserved
    pub reserved: u32,
}

impl MachHeader64 {
    /// Size of the header in bytes.
    pub const SIZE: usize = 32;
}

impl From<MachHeader> for MachHeader64 {
    fn from(h: MachHeader) -> Self {
        Self {
            magic: h.magic,
            cputype: h.cputype,
            cpusubtype: h.cpusubtype,
            filetype: h.filetype,
            ncmds: h.ncmds,
            sizeofcmds: h.sizeofcmds,
            flags: h.flags,
            reserved: 0,
        }
    }
}

// =============================================================================
// Load Command Prefix
// =============================================================================

/// The `(cmd, cmdsize)` prefix shared by every load command.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct LoadCommandPrefix {
    /// Type of load command
    pub cmd: u32,
    /// Size of load command
    pub cmdsize: u32,
}

impl LoadCommandPrefix {
    /// Size of the load command prefix.
    pub const SIZE: usize = 8;
}

// =============================================================================
// Segment Commands
// =============================================================================

/// 32-bit segment command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct SegmentCommand {
    /// LC_SEGMENT
    pub cmd: u32,
    /// Size of this load command, including sections
    pub cmdsize: u32,
    /// Segment name (16 bytes, null-padded)
    pub segname: [u8; 16],
    /// Virtual memory address
    pub vmaddr: u32,
    /// Virtual memory size
    pub vmsize: u32,
    /// File offset
    pub fileoff: u32,
    /// File size
    pub filesize: u32,
    /// Maximum VM protection
    pub maxprot: u32,
    /// Initial VM protection
    pub initprot: u32,
    /// Number of sections
    pub nsects: u32,
    /// Flags
    pub flags: u32,
}

impl SegmentCommand {
    /// Size of the command without sections.
    pub const SIZE: usize = 56;
}

/// 64-bit segment command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct SegmentCommand64 {
    /// LC_SEGMENT_64
    pub cmd: u32,
    /// Size of this load command, including sections
    pub cmdsize: u32,
    /// Segment name (16 bytes, null-padded)
    pub segname: [u8; 16],
    /// Virtual memory address
    pub vmaddr: u64,
    /// Virtual memory size
    pub vmsize: u64,
    /// File offset
    pub fileoff: u64,
    /// File size
    pub filesize: u64,
    /// Maximum VM protection
    pub maxprot: u32,
    /// Initial VM protection
    pub initprot: u32,
    /// Number of sections
    pub nsects: u32,
    /// Flags
    pub flags: u32,
}

impl SegmentCommand64 {
    /// Size of the command without sections.
    pub const SIZE: usize = 72;

    /// Returns the segment name as a string.
    #[inline]
    pub fn name(&self) -> &str {
        fixed_name(&self.segname)
    }
}

/// 32-bit section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Section {
    /// Section name
    pub sectname: [u8; 16],
    /// Segment name
    pub segname: [u8; 16],
    /// Virtual memory address
    pub addr: u32,
    /// Size in bytes
    pub size: u32,
    /// File offset
    pub offset: u32,
    /// Alignment (power of 2)
    pub align: u32,
    /// File offset of relocation entries
    pub reloff: u32,
    /// Number of relocation entries
    pub nreloc: u32,
    /// Flags (section type and attributes)
    pub flags: u32,
    /// Reserved (for offset or index)
    pub reserved1: u32,
    /// Reserved (for count or sizeof)
    pub reserved2: u32,
}

impl Section {
    /// Size of this structure.
    pub const SIZE: usize = 68;
}

/// 64-bit section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Section64 {
    /// Section name
    pub sectname: [u8; 16],
    /// Segment name
    pub segname: [u8; 16],
    /// Virtual memory address
    pub addr: u64,
    /// Size in bytes
    pub size: u64,
    /// File offset
    pub offset: u32,
    /// Alignment (power of 2)
    pub align: u32,
    /// File offset of relocation entries
    pub reloff: u32,
    /// Number of relocation entries
    pub nreloc: u32,
    /// Flags (section type and attributes)
    pub flags: u32,
    /// Reserved (for offset or index)
    pub reserved1: u32,
    /// Reserved (for count or sizeof)
    pub reserved2: u32,
    /// Reserved
    pub reserved3: u32,
}

impl Section64 {
    /// Size of this structure.
    pub const SIZE: usize = 80;
}

// =============================================================================
// Symbol Table
// =============================================================================

/// Symbol table command.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct SymtabCommand {
    /// LC_SYMTAB
    pub cmd: u32,
    /// Size of this load command
    pub cmdsize: u32,
    /// Symbol table offset
    pub symoff: u32,
    /// Number of symbol table entries
    pub nsyms: u32,
    /// String table offset
    pub stroff: u32,
    /// String table size in bytes
    pub strsize: u32,
}

impl SymtabCommand {
    /// Size of this command.
    pub const SIZE: usize = 24;
}

/// Dynamic symbol table command. Only its size is checked.
pub struct DysymtabCommand;

impl DysymtabCommand {
    /// Size of this command.
    pub const SIZE: usize = 80;
}

/// 32-bit symbol table entry.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Nlist {
    /// Index into string table
    pub n_strx: u32,
    /// Type flag
    pub n_type: u8,
    /// Section number or NO_SECT
    pub n_sect: u8,
    /// Description
    pub n_desc: u16,
    /// Value
    pub n_value: u32,
}

impl Nlist {
    /// Size of this structure.
    pub const SIZE: usize = 12;
}

/// 64-bit symbol table entry.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Nlist64 {
    /// Index into string table
    pub n_strx: u32,
    /// Type flag
    pub n_type: u8,
    /// Section number or NO_SECT
    pub n_sect: u8,
    /// Description
    pub n_desc: u16,
    /// Value
    pub n_value: u64,
}

impl Nlist64 {
    /// Size of this structure.
    pub const SIZE: usize = 16;
}

// =============================================================================
// Link-edit Commands
// =============================================================================

/// Compressed dyld info command.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DyldInfoCommand {
    /// LC_DYLD_INFO or LC_DYLD_INFO_ONLY
    pub cmd: u32,
    /// Size of this load command
    pub cmdsize: u32,
    /// File offset to rebase info
    pub rebase_off: u32,
    /// Size of rebase info
    pub rebase_size: u32,
    /// File offset to binding info
    pub bind_off: u32,
    /// Size of binding info
    pub bind_size: u32,
    /// File offset to weak binding info
    pub weak_bind_off: u32,
    /// Size of weak binding info
    pub weak_bind_size: u32,
    /// File offset to lazy binding info
    pub lazy_bind_off: u32,
    /// Size of lazy binding info
    pub lazy_bind_size: u32,
    /// File offset to export info
    pub export_off: u32,
    /// Size of export info
    pub export_size: u32,
}

impl DyldInfoCommand {
    /// Size of this command.
    pub const SIZE: usize = 48;
}

/// Generic link-edit data command (code signature, function starts,
/// exports trie, chained fixups, ...).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct LinkeditDataCommand {
    /// Command type
    pub cmd: u32,
    /// Size of this load command
    pub cmdsize: u32,
    /// File offset
    pub dataoff: u32,
    /// Size
    pub datasize: u32,
}

impl LinkeditDataCommand {
    /// Size of this command.
    pub const SIZE: usize = 16;
}

/// Header of the `LC_DYLD_CHAINED_FIXUPS` payload.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DyldChainedFixupsHeader {
    /// Version of the fixups format
    pub fixups_version: u32,
    /// Offset of `dyld_chained_starts_in_image`
    pub starts_offset: u32,
    /// Offset of the imports table
    pub imports_offset: u32,
    /// Offset of the symbol name pool
    pub symbols_offset: u32,
    /// Number of imports
    pub imports_count: u32,
    /// Import record format (1, 2 or 3)
    pub imports_format: u32,
    /// 0 for uncompressed, 1 for zlib
    pub symbols_format: u32,
}

impl DyldChainedFixupsHeader {
    /// Size of this structure.
    pub const SIZE: usize = 28;
}

// =============================================================================
// Dylib Command
// =============================================================================

/// Dylib load command (`LC_LOAD_DYLIB`, `LC_ID_DYLIB`, ...).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DylibCommand {
    /// Command type
    pub cmd: u32,
    /// Total size (includes path string)
    pub cmdsize: u32,
    /// Library's path name offset from the start of the command
    pub name_offset: u32,
    /// Library's build timestamp
    pub timestamp: u32,
    /// Library's current version number
    pub current_version: u32,
    /// Library's compatibility version number
    pub compatibility_version: u32,
}

impl DylibCommand {
    /// Minimum size of this command (without path string).
    pub const SIZE: usize = 24;
}

// =============================================================================
// Identification Commands
// =============================================================================

/// UUID command.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct UuidCommand {
    /// LC_UUID
    pub cmd: u32,
    /// Size of this load command
    pub cmdsize: u32,
    /// UUID
    pub uuid: [u8; 16],
}

impl UuidCommand {
    /// Size of this command.
    pub const SIZE: usize = 24;
}

/// Build version command.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct BuildVersionCommand {
    /// LC_BUILD_VERSION
    pub cmd: u32,
    /// Size of this load command
    pub cmdsize: u32,
    /// Platform
    pub platform: u32,
    /// Minimum OS version (X.Y.Z packed into 32 bits)
    pub minos: u32,
    /// SDK version (X.Y.Z packed into 32 bits)
    pub sdk: u32,
    /// Number of tool entries following
    pub ntools: u32,
}

impl BuildVersionCommand {
    /// Size of this command (without tool entries).
    pub const SIZE: usize = 24;
    /// Size of one tool entry.
    pub const TOOL_SIZE: usize = 8;
}

/// Minimum OS version command (`LC_VERSION_MIN_*`).
pub struct VersionMinCommand;

impl VersionMinCommand {
    /// Size of this command.
    pub const SIZE: usize = 16;
}

/// Main entry point command.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct EntryPointCommand {
    /// LC_MAIN
    pub cmd: u32,
    /// Size of this load command
    pub cmdsize: u32,
    /// File offset of main()
    pub entryoff: u64,
    /// Initial stack size, if not zero
    pub stacksize: u64,
}

impl EntryPointCommand {
    /// Size of this command.
    pub const SIZE: usize = 24;
}

/// Source version command. Only its size is checked.
pub struct SourceVersionCommand;

impl SourceVersionCommand {
    /// Size of this command.
    pub const SIZE: usize = 16;
}

/// Fileset entry command (kernel collections).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct FilesetEntryCommand {
    /// LC_FILESET_ENTRY
    pub cmd: u32,
    /// Size of this load command
    pub cmdsize: u32,
    /// Virtual memory address
    pub vmaddr: u64,
    /// File offset
    pub fileoff: u64,
    /// Offset to entry path name
    pub entry_id_offset: u32,
    /// Reserved
    pub reserved: u32,
}

impl FilesetEntryCommand {
    /// Minimum size of this command.
    pub const SIZE: usize = 32;
}

/// Encryption info command sizes (`LC_ENCRYPTION_INFO[_64]`).
pub struct EncryptionInfoCommand;

impl EncryptionInfoCommand {
    /// Size of the 32-bit command.
    pub const SIZE: usize = 20;
    /// Size of the 64-bit command, which adds padding.
    pub const SIZE_64: usize = 24;
}

// =============================================================================
// Fat Structures
// =============================================================================

/// Fat container header. Always big-endian on disk.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct FatHeader {
    /// FAT_MAGIC
    pub magic: u32,
    /// Number of architecture entries that follow
    pub nfat_arch: u32,
}

impl FatHeader {
    /// Size of this structure.
    pub const SIZE: usize = 8;
}

/// Fat architecture entry. Always big-endian on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct FatArch {
    /// CPU type
    pub cputype: u32,
    /// CPU subtype
    pub cpusubtype: u32,
    /// File offset of the slice
    pub offset: u32,
    /// Size of the slice
    pub size: u32,
    /// Alignment as a power of two
    pub align: u32,
}

impl FatArch {
    /// Size of this structure.
    pub const SIZE: usize = 20;
}

// =============================================================================
// Byte Swapping
// =============================================================================

impl_byte_swap!(MachHeader { magic, cputype, cpusubtype, filetype, ncmds, sizeofcmds, flags });
impl_byte_swap!(MachHeader64 { magic, cputype, cpusubtype, filetype, ncmds, sizeofcmds, flags, reserved });
impl_byte_swap!(LoadCommandPrefix { cmd, cmdsize });
impl_byte_swap!(SegmentCommand {
    cmd, cmdsize, vmaddr, vmsize, fileoff, filesize, maxprot, initprot, nsects, flags
});
impl_byte_swap!(SegmentCommand64 {
    cmd, cmdsize, vmaddr, vmsize, fileoff, filesize, maxprot, initprot, nsects, flags
});
impl_byte_swap!(Section {
    addr, size, offset, align, reloff, nreloc, flags, reserved1, reserved2
});
impl_byte_swap!(Section64 {
    addr, size, offset, align, reloff, nreloc, flags, reserved1, reserved2, reserved3
});
impl_byte_swap!(SymtabCommand { cmd, cmdsize, symoff, nsyms, stroff, strsize });
impl_byte_swap!(Nlist { n_strx, n_desc, n_value });
impl_byte_swap!(Nlist64 { n_strx, n_desc, n_value });
impl_byte_swap!(DyldInfoCommand {
    cmd, cmdsize, rebase_off, rebase_size, bind_off, bind_size, weak_bind_off,
    weak_bind_size, lazy_bind_off, lazy_bind_size, export_off, export_size
});
impl_byte_swap!(LinkeditDataCommand { cmd, cmdsize, dataoff, datasize });
impl_byte_swap!(DyldChainedFixupsHeader {
    fixups_version, starts_offset, imports_offset, symbols_offset, imports_count,
    imports_format, symbols_format
});
impl_byte_swap!(DylibCommand {
    cmd, cmdsize, name_offset, timestamp, current_version, compatibility_version
});
impl_byte_swap!(UuidCommand { cmd, cmdsize });
impl_byte_swap!(BuildVersionCommand { cmd, cmdsize, platform, minos, sdk, ntools });
impl_byte_swap!(EntryPointCommand { cmd, cmdsize, entryoff, stacksize });
impl_byte_swap!(FilesetEntryCommand { cmd, cmdsize, vmaddr, fileoff, entry_id_offset, reserved });
impl_byte_swap!(FatHeader { magic, nfat_arch });
impl_byte_swap!(FatArch { cputype, cpusubtype, offset, size, align });

// =============================================================================
// Display Implementations
// =============================================================================

impl fmt::Display for SegmentCommand64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Segment {{ name: \"{}\", vm: {:#x}+{:#x}, file: {:#x}+{:#x}, sects: {} }}",
            self.name(),
            self.vmaddr,
            self.vmsize,
            self.fileoff,
            self.filesize,
            self.nsects
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::{encode_record, read_record, Endian};

    #[test]
    fn test_struct_sizes() {
        assert_eq!(std::mem::size_of::<MachHeader>(), MachHeader::SIZE);
        assert_eq!(std::mem::size_of::<MachHeader64>(), MachHeader64::SIZE);
        assert_eq!(std::mem::size_of::<SegmentCommand>(), SegmentCommand::SIZE);
        assert_eq!(std::mem::size_of::<SegmentCommand64>(), SegmentCommand64::SIZE);
        assert_eq!(std::mem::size_of::<Section>(), Section::SIZE);
        assert_eq!(std::mem::size_of::<Section64>(), Section64::SIZE);
        assert_eq!(std::mem::size_of::<Nlist>(), Nlist::SIZE);
        assert_eq!(std::mem::size_of::<Nlist64>(), Nlist64::SIZE);
        assert_eq!(std::mem::size_of::<DyldInfoCommand>(), DyldInfoCommand::SIZE);
        assert_eq!(std::mem::size_of::<FilesetEntryCommand>(), FilesetEntryCommand::SIZE);
        assert_eq!(std::mem::size_of::<FatArch>(), FatArch::SIZE);
        assert_eq!(
            std::mem::size_of::<DyldChainedFixupsHeader>(),
            DyldChainedFixupsHeader::SIZE
        );
    }

    #[test]
    fn test_foreign_order_record() {
        let arch = FatArch {
            cputype: 0x0100_000C,
            cpusubtype: 2,
            offset: 0x4000,
            size: 0x1234,
            align: 14,
        };
        let bytes = encode_record(arch, Endian::Big);
        assert_eq!(&bytes[..4], &[0x01, 0x00, 0x00, 0x0C]);
        let decoded: FatArch = read_record(&bytes, 0, Endian::Big).unwrap();
        assert_eq!(decoded, arch);
        assert!(read_record::<FatArch>(&bytes, 1, Endian::Big).is_none());
    }
}
