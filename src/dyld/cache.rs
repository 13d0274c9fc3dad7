//! Shared cache header, mappings and image table.

use tracing::debug;

use super::local_symbols::LocalSymbols;
use super::structs::*;
use crate::error::{Error, Result};
use crate::macho::{ThinHeaderView, DYLD_CACHE_MAGIC_PREFIX, VM_PROT_EXECUTE, VM_PROT_READ, VM_PROT_WRITE};
use crate::symbols::Symbol;
use crate::util::{bytes_at_u64, c_str_at, read_record, Endian};

// =============================================================================
// Mapping Entry
// =============================================================================

/// A file range mapped at a virtual address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingEntry {
    /// Virtual memory address
    pub address: u64,
    /// Size in bytes
    pub size: u64,
    /// File offset
    pub file_offset: u64,
    /// Maximum protection
    pub max_prot: u32,
    /// Initial protection
    pub init_prot: u32,
}

impl From<DyldCacheMappingInfo> for MappingEntry {
    fn from(info: DyldCacheMappingInfo) -> Self {
        Self {
            address: info.address,
            size: info.size,
            file_offset: info.file_offset,
            max_prot: info.max_prot,
            init_prot: info.init_prot,
        }
    }
}

impl MappingEntry {
    /// Returns true if this mapping contains the given virtual address.
    #[inline]
    pub fn contains_addr(&self, addr: u64) -> bool {
        addr >= self.address && addr - self.address < self.size
    }

    /// Returns true if this mapping contains the given file offset.
    #[inline]
    pub fn contains_offset(&self, offset: u64) -> bool {
        offset >= self.file_offset && offset - self.file_offset < self.size
    }

    /// Converts a virtual address inside this mapping to a file offset.
    #[inline]
    pub fn addr_to_offset(&self, addr: u64) -> Option<u64> {
        if !self.contains_addr(addr) {
            return None;
        }
        self.file_offset.checked_add(addr - self.address)
    }

    /// Converts a file offset inside this mapping to a virtual address.
    #[inline]
    pub fn offset_to_addr(&self, offset: u64) -> Option<u64> {
        if !self.contains_offset(offset) {
            return None;
        }
        self.address.checked_add(offset - self.file_offset)
    }

    /// Returns true if this mapping is readable.
    #[inline]
    pub fn is_readable(&self) -> bool {
        self.init_prot & VM_PROT_READ != 0
    }

    /// Returns true if this mapping is writable.
    #[inline]
    pub fn is_writable(&self) -> bool {
        self.init_prot & VM_PROT_WRITE != 0
    }

    /// Returns true if this mapping is executable.
    #[inline]
    pub fn is_executable(&self) -> bool {
        self.init_prot & VM_PROT_EXECUTE != 0
    }
}

// =============================================================================
// Shared Cache
// =============================================================================

/// A parsed shared cache file.
///
/// The header, mapping table and image table are bounds-checked once by
/// [`parse`](Self::parse); image headers and install names are resolved
/// lazily.
#[derive(Debug, Clone)]
pub struct SharedCache<'a> {
    data: &'a [u8],
    header: DyldCacheHeader,
    mappings: Vec<MappingEntry>,
}

impl<'a> SharedCache<'a> {
    /// Parses the cache header and tables at the start of `data`.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if !data.starts_with(DYLD_CACHE_MAGIC_PREFIX) {
            let mut magic = [0u8; 16];
            let len = data.len().min(16);
            magic[..len].copy_from_slice(&data[..len]);
            return Err(Error::InvalidCacheMagic(magic));
        }

        let header: DyldCacheHeader = read_record(data, 0, Endian::Little)
            .ok_or_else(|| Error::truncated(DyldCacheHeader::SIZE as u64, data.len()))?;

        let mapping_end = header.mapping_offset as u64
            + header.mapping_count as u64 * DyldCacheMappingInfo::SIZE as u64;
        if mapping_end > data.len() as u64 {
            return Err(Error::truncated(mapping_end, data.len()));
        }
        let mappings = (0..header.mapping_count as usize)
            .filter_map(|i| {
                let offset = header.mapping_offset as usize + i * DyldCacheMappingInfo::SIZE;
                read_record::<DyldCacheMappingInfo>(data, offset, Endian::Little)
            })
            .map(MappingEntry::from)
            .collect::<Vec<_>>();

        let images_end = header
            .actual_images_count()
            .checked_mul(DyldCacheImageInfo::SIZE as u64)
            .and_then(|size| size.checked_add(header.actual_images_offset()))
            .ok_or(Error::TruncatedInput {
                needed: u64::MAX,
                available: data.len() as u64,
            })?;
        if images_end > data.len() as u64 {
            return Err(Error::truncated(images_end, data.len()));
        }

        debug!(
            "Parsed shared cache {}: {} mappings, {} images",
            header.architecture(),
            mappings.len(),
            header.actual_images_count()
        );

        Ok(Self {
            data,
            header,
            mappings,
        })
    }

    /// Returns the cache bytes.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Returns the header with every field in host byte order.
    pub fn header(&self) -> &DyldCacheHeader {
        &self.header
    }

    /// Returns the architecture named by the magic, e.g. `arm64e`.
    pub fn architecture(&self) -> &str {
        self.header.architecture()
    }

    /// Returns the cache UUID.
    pub fn uuid(&self) -> [u8; 16] {
        self.header.uuid
    }

    /// Returns the mappings in table order.
    pub fn mappings(&self) -> &[MappingEntry] {
        &self.mappings
    }

    /// Returns the mapping containing a virtual address.
    pub fn mapping_for_addr(&self, addr: u64) -> Option<&MappingEntry> {
        self.mappings.iter().find(|m| m.contains_addr(addr))
    }

    /// Converts a virtual address to a file offset.
    pub fn addr_to_offset(&self, addr: u64) -> Result<u64> {
        self.mapping_for_addr(addr)
            .and_then(|m| m.addr_to_offset(addr))
            .ok_or(Error::AddressNotFound { addr })
    }

    /// Returns true if nlist records in this file are 64-bit.
    pub fn uses_64bit_nlist(&self) -> bool {
        let arch = self.architecture();
        arch.contains("64") && arch != "arm64_32"
    }

    // ==================== Images ====================

    /// Returns the number of images in the image table.
    pub fn image_count(&self) -> usize {
        self.header.actual_images_count() as usize
    }

    /// Returns the image at `index` in the image table.
    pub fn image(&self, index: usize) -> Option<SharedCacheImage<'a>> {
        if index >= self.image_count() {
            return None;
        }
        let offset = self.header.actual_images_offset() as usize + index * DyldCacheImageInfo::SIZE;
        let info: DyldCacheImageInfo = read_record(self.data, offset, Endian::Little)?;
        Some(SharedCacheImage {
            index,
            info,
            install_name: c_str_at(self.data, info.path_file_offset as usize),
            data: self.data,
            file_offset: self.mapping_for_addr(info.address).and_then(|m| m.addr_to_offset(info.address)),
        })
    }

    /// Returns every image in table order.
    pub fn images(&self) -> impl Iterator<Item = SharedCacheImage<'a>> + '_ {
        (0..self.image_count()).filter_map(|index| self.image(index))
    }

    /// Returns the table index of the first image with this exact install name.
    pub fn image_index(&self, install_name: &str) -> Option<usize> {
        self.images()
            .find(|image| image.install_name() == Some(install_name))
            .map(|image| image.index())
    }

    /// Finds an image by exact install name.
    pub fn find_image(&self, install_name: &str) -> Option<SharedCacheImage<'a>> {
        self.image_index(install_name).and_then(|index| self.image(index))
    }

    // ==================== Local Symbols ====================

    /// Returns the local symbols table stored in this file, if any.
    pub fn local_symbols(&self) -> Result<Option<LocalSymbols<'a>>> {
        if !self.header.has_local_symbols() {
            return Ok(None);
        }

        let offset = self.header.local_symbols_offset;
        let size = match self.header.local_symbols_size {
            0 => (self.data.len() as u64).saturating_sub(offset),
            size => size,
        };
        let region = bytes_at_u64(self.data, offset, size)
            .ok_or_else(|| Error::truncated(offset.saturating_add(size), self.data.len()))?;

        LocalSymbols::parse(
            region,
            self.header.uses_64bit_local_symbol_entries(),
            self.uses_64bit_nlist(),
        )
        .map(Some)
    }

    /// Returns the local symbols of the image named `install_name`.
    ///
    /// The image's position in this cache's image table selects the entry
    /// in `symbols_cache`'s local symbols table; that entry's run of nlist
    /// records is read from `symbols_cache`. Pass `self` for caches that
    /// keep their local symbols in the same file.
    ///
    /// An image beyond the end of the entry table has no local symbols.
    pub fn local_symbols_for(
        &self,
        install_name: &str,
        symbols_cache: &SharedCache<'_>,
    ) -> Result<Vec<Symbol>> {
        let index = self
            .image_index(install_name)
            .ok_or_else(|| Error::ImageNotFound {
                name: install_name.to_string(),
            })?;

        let locals = symbols_cache
            .local_symbols()?
            .ok_or(Error::MissingLocalSymbols)?;

        match locals.symbols(index)? {
            Some(symbols) => Ok(symbols),
            None => {
                debug!(
                    "Image {} ({}) has no local symbols entry ({} entries)",
                    index,
                    install_name,
                    locals.len()
                );
                Ok(Vec::new())
            }
        }
    }
}

// =============================================================================
// Shared Cache Image
// =============================================================================

/// One entry of the image table.
///
/// The header view borrows the cache bytes, so it lives exactly as long as
/// the cache region.
#[derive(Debug, Clone, Copy)]
pub struct SharedCacheImage<'a> {
    index: usize,
    info: DyldCacheImageInfo,
    install_name: Option<&'a str>,
    data: &'a [u8],
    file_offset: Option<u64>,
}

impl<'a> SharedCacheImage<'a> {
    /// Position in the image table.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Unslid address of the Mach-O header.
    pub fn address(&self) -> u64 {
        self.info.address
    }

    /// Install name, if the path string is readable.
    pub fn install_name(&self) -> Option<&'a str> {
        self.install_name
    }

    /// File offset of the header, if a mapping in this file covers it.
    pub fn file_offset(&self) -> Option<u64> {
        self.file_offset
    }

    /// Modification time recorded when the cache was built.
    pub fn mod_time(&self) -> u64 {
        self.info.mod_time
    }

    /// Inode recorded when the cache was built.
    pub fn inode(&self) -> u64 {
        self.info.inode
    }

    /// Parses the image header.
    ///
    /// Images whose address is not mapped by this file (for example images
    /// stored in a sub-cache) fail with [`Error::AddressNotFound`].
    pub fn header(&self) -> Result<ThinHeaderView<'a>> {
        let offset = self.file_offset.ok_or(Error::AddressNotFound {
            addr: self.info.address,
        })?;
        let offset = usize::try_from(offset).map_err(|_| Error::truncated(offset, self.data.len()))?;
        ThinHeaderView::parse_at(self.data, offset)
    }
}
