//! Dyld shared cache binary structures.
//!
//! These structures match the on-disk format of the shared cache. Every
//! cache is little-endian; records are decoded with
//! [`read_record`](crate::util::read_record) so big-endian hosts read the
//! same values.

use std::fmt;
use std::mem::offset_of;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::util::impl_byte_swap;

// =============================================================================
// Header Structures
// =============================================================================

/// The shared cache header, laid out as in the newest format.
///
/// Older caches have a shorter header: `mapping_offset` marks where it
/// ends, and any field at or past it is absent. Query fields through
/// [`contains_field`](Self::contains_field). Ranges this crate never reads
/// are kept as reserved bytes so the offsets of later fields stay exact.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DyldCacheHeader {
    /// `dyld_v1` followed by the right-aligned architecture name
    pub magic: [u8; 16],
    /// Offset of the mapping table; also the header length
    pub mapping_offset: u32,
    /// Mapping table entries
    pub mapping_count: u32,
    /// Image table offset in caches older than `images_offset`
    pub images_offset_old: u32,
    /// Image table entries in caches older than `images_count`
    pub images_count_old: u32,
    /// Unslid load address of dyld
    pub dyld_base_address: u64,
    /// Offset of the cache's code signature
    pub code_signature_offset: u64,
    /// Length of the cache's code signature
    pub code_signature_size: u64,
    _slide_info: [u64; 2],
    /// Offset of the local symbols table, relative to the file start
    pub local_symbols_offset: u64,
    /// Length of the local symbols table; zero means "to end of file"
    pub local_symbols_size: u64,
    /// Identity of this file
    pub uuid: [u8; 16],
    /// 0 for development, 1 for production caches
    pub cache_type: u64,
    _reserved0: [u8; 0x68],
    /// `PLATFORM_*` value the cache was built for
    pub platform: u32,
    /// Builder format version in the low byte, flags above it
    pub format_version_and_flags: u32,
    /// Base of the shared region
    pub shared_region_start: u64,
    /// Size of the shared region
    pub shared_region_size: u64,
    /// Largest slide the cache tolerates
    pub max_slide: u64,
    _reserved1: [u8; 0x74],
    /// Packed OS version
    pub os_version: u32,
    /// Secondary platform (for example macCatalyst)
    pub alt_platform: u32,
    /// Packed secondary OS version
    pub alt_os_version: u32,
    _reserved2: [u8; 0x10],
    /// Offset of the sub-cache table
    pub sub_cache_array_offset: u32,
    /// Sub-cache table entries
    pub sub_cache_array_count: u32,
    /// UUID the companion `.symbols` file must carry; zero if none
    pub symbol_file_uuid: [u8; 16],
    _reserved3: [u8; 0x20],
    /// Offset of the image table
    pub images_offset: u32,
    /// Image table entries
    pub images_count: u32,
    /// Sub-cache flavour, as `cache_type`
    pub cache_sub_type: u32,
    _pad1: u32,
    _reserved4: [u8; 0x30],
}

impl_byte_swap!(DyldCacheHeader {
    mapping_offset, mapping_count, images_offset_old, images_count_old,
    dyld_base_address, code_signature_offset, code_signature_size,
    local_symbols_offset, local_symbols_size, cache_type,
    platform, format_version_and_flags, shared_region_start, shared_region_size, max_slide,
    os_version, alt_platform, alt_os_version,
    sub_cache_array_offset, sub_cache_array_count,
    images_offset, images_count, cache_sub_type,
});

impl DyldCacheHeader {
    /// Size of the newest header layout.
    pub const SIZE: usize = 512;

    /// Returns the architecture from the magic string.
    pub fn architecture(&self) -> &str {
        let end = crate::util::memchr_null(&self.magic);
        std::str::from_utf8(&self.magic[..end])
            .unwrap_or("")
            .trim_start_matches("dyld_v1")
            .trim()
    }

    /// Checks if a header field exists based on mapping_offset.
    pub fn contains_field(&self, field_offset: usize) -> bool {
        field_offset < self.mapping_offset as usize
    }

    /// Returns true if this cache names a separate symbols file.
    pub fn has_symbol_file(&self) -> bool {
        self.contains_field(offset_of!(Self, symbol_file_uuid))
            && self.symbol_file_uuid != [0u8; 16]
    }

    /// Returns true if this file carries a local symbols table.
    pub fn has_local_symbols(&self) -> bool {
        self.contains_field(offset_of!(Self, local_symbols_size)) && self.local_symbols_offset != 0
    }

    /// Returns true if local symbol entries use 64-bit dylib offsets.
    pub fn uses_64bit_local_symbol_entries(&self) -> bool {
        self.mapping_offset as usize >= offset_of!(Self, symbol_file_uuid)
    }

    /// Returns true if this cache uses the new images location.
    pub fn uses_new_images_offset(&self) -> bool {
        self.contains_field(offset_of!(Self, images_offset)) && self.images_offset != 0
    }

    /// Returns the actual images offset (new or legacy location).
    pub fn actual_images_offset(&self) -> u64 {
        if self.uses_new_images_offset() {
            self.images_offset as u64
        } else {
            self.images_offset_old as u64
        }
    }

    /// Returns the actual images count (new or legacy location).
    pub fn actual_images_count(&self) -> u64 {
        if self.uses_new_images_offset() {
            self.images_count as u64
        } else {
            self.images_count_old as u64
        }
    }
}

impl fmt::Display for DyldCacheHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} cache {} ({} mappings, {} images, platform {})",
            self.architecture(),
            uuid_to_string(&self.uuid),
            self.mapping_count,
            self.actual_images_count(),
            self.platform
        )
    }
}

// =============================================================================
// Mapping and Image Structures
// =============================================================================

/// Mapping from a file range to a virtual memory range.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DyldCacheMappingInfo {
    /// Virtual memory address
    pub address: u64,
    /// Size in bytes
    pub size: u64,
    /// File offset
    pub file_offset: u64,
    /// Maximum memory protection
    pub max_prot: u32,
    /// Initial memory protection
    pub init_prot: u32,
}

impl_byte_swap!(DyldCacheMappingInfo { address, size, file_offset, max_prot, init_prot });

impl DyldCacheMappingInfo {
    /// Size of this structure.
    pub const SIZE: usize = 32;
}

/// Information about a dylib in the cache.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DyldCacheImageInfo {
    /// Address of the Mach-O header
    pub address: u64,
    /// Modification time
    pub mod_time: u64,
    /// Inode
    pub inode: u64,
    /// Offset to path string
    pub path_file_offset: u32,
    /// Padding
    pub pad: u32,
}

impl_byte_swap!(DyldCacheImageInfo { address, mod_time, inode, path_file_offset, pad });

impl DyldCacheImageInfo {
    /// Size of this structure.
    pub const SIZE: usize = 32;
}

// =============================================================================
// Local Symbols
// =============================================================================

/// Local symbols information header. Offsets are relative to this record.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DyldCacheLocalSymbolsInfo {
    /// Offset to nlist array
    pub nlist_offset: u32,
    /// Number of nlist entries
    pub nlist_count: u32,
    /// Offset to string pool
    pub strings_offset: u32,
    /// Size of string pool
    pub strings_size: u32,
    /// Offset to per-dylib entries
    pub entries_offset: u32,
    /// Number of entries
    pub entries_count: u32,
}

impl_byte_swap!(DyldCacheLocalSymbolsInfo {
    nlist_offset, nlist_count, strings_offset, strings_size, entries_offset, entries_count,
});

impl DyldCacheLocalSymbolsInfo {
    /// Size of this structure.
    pub const SIZE: usize = 24;
}

/// Per-dylib local symbol entry (32-bit dylib offset).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DyldCacheLocalSymbolsEntry {
    /// File offset to dylib header
    pub dylib_offset: u32,
    /// Index into nlist array
    pub nlist_start_index: u32,
    /// Number of nlist entries for this dylib
    pub nlist_count: u32,
}

impl_byte_swap!(DyldCacheLocalSymbolsEntry { dylib_offset, nlist_start_index, nlist_count });

impl DyldCacheLocalSymbolsEntry {
    /// Size of this structure.
    pub const SIZE: usize = 12;
}

/// Per-dylib local symbol entry (64-bit dylib offset, newer caches).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DyldCacheLocalSymbolsEntry64 {
    /// VM offset to dylib header
    pub dylib_offset: u64,
    /// Index into nlist array
    pub nlist_start_index: u32,
    /// Number of nlist entries for this dylib
    pub nlist_count: u32,
}

impl_byte_swap!(DyldCacheLocalSymbolsEntry64 { dylib_offset, nlist_start_index, nlist_count });

impl DyldCacheLocalSymbolsEntry64 {
    /// Size of this structure.
    pub const SIZE: usize = 16;
}

/// Formats a UUID as a hex string.
pub fn uuid_to_string(uuid: &[u8; 16]) -> String {
    format!(
        "{:02X}{:02X}{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
        uuid[0], uuid[1], uuid[2], uuid[3],
        uuid[4], uuid[5],
        uuid[6], uuid[7],
        uuid[8], uuid[9],
        uuid[10], uuid[11], uuid[12], uuid[13], uuid[14], uuid[15]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_sizes() {
        assert_eq!(std::mem::size_of::<DyldCacheHeader>(), DyldCacheHeader::SIZE);
        assert_eq!(offset_of!(DyldCacheHeader, local_symbols_offset), 0x48);
        assert_eq!(offset_of!(DyldCacheHeader, platform), 0xD8);
        assert_eq!(offset_of!(DyldCacheHeader, os_version), 0x16C);
        assert_eq!(offset_of!(DyldCacheHeader, symbol_file_uuid), 0x190);
        assert_eq!(offset_of!(DyldCacheHeader, images_offset), 0x1C0);
        assert_eq!(std::mem::size_of::<DyldCacheMappingInfo>(), DyldCacheMappingInfo::SIZE);
        assert_eq!(std::mem::size_of::<DyldCacheImageInfo>(), DyldCacheImageInfo::SIZE);
        assert_eq!(std::mem::size_of::<DyldCacheLocalSymbolsEntry64>(), 16);
    }

    #[test]
    fn test_uuid_to_string() {
        let uuid = [
            0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0, 0x01, 0x23, 0x45, 0x67, 0x89, 0xAB,
            0xCD, 0xEF,
        ];
        assert_eq!(uuid_to_string(&uuid), "12345678-9ABC-DEF0-0123-456789ABCDEF");
    }
}
