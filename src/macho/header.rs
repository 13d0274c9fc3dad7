//! Zero-copy view over a thin Mach-O header.

use std::ops::Range;

use super::arch::Architecture;
use super::constants::*;
use super::structs::{MachHeader, MachHeader64};
use crate::error::{Error, Result};
use crate::util::{read_record, read_u32_at, Endian};

/// 4 KiB pages.
pub const PAGE_SIZE_4K: u64 = 0x1000;
/// 16 KiB pages.
pub const PAGE_SIZE_16K: u64 = 0x4000;

/// A validated thin Mach-O header and the bytes it lives in.
///
/// `data` starts at the header and extends to the end of the enclosing
/// region (or fat slice); its length bounds every offset derived from the
/// image. Construction guarantees that the header and its command stream
/// fit inside `data`.
#[derive(Debug, Clone, Copy)]
pub struct ThinHeaderView<'a> {
    data: &'a [u8],
    header: MachHeader64,
    endian: Endian,
    is64: bool,
}

impl<'a> ThinHeaderView<'a> {
    /// Parses the header at the start of `data`.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let magic = read_u32_at(data, 0, Endian::Little)
            .ok_or_else(|| Error::truncated(4, data.len()))?;

        let (is64, endian) = match magic {
            MH_MAGIC => (false, Endian::Little),
            MH_CIGAM => (false, Endian::Big),
            MH_MAGIC_64 => (true, Endian::Little),
            MH_CIGAM_64 => (true, Endian::Big),
            _ => {
                return Err(Error::UnrecognizedFormat {
                    magic: magic.swap_bytes(),
                })
            }
        };

        let header_size = if is64 { MachHeader64::SIZE } else { MachHeader::SIZE };
        let header: MachHeader64 = if is64 {
            read_record(data, 0, endian)
        } else {
            read_record::<MachHeader>(data, 0, endian).map(MachHeader64::from)
        }
        .ok_or_else(|| Error::truncated(header_size as u64, data.len()))?;

        let needed = header_size as u64 + header.sizeofcmds as u64;
        if needed > data.len() as u64 {
            return Err(Error::truncated(needed, data.len()));
        }

        Ok(Self {
            data,
            header,
            endian,
            is64,
        })
    }

    /// Parses the header at `offset` within `data`.
    pub fn parse_at(data: &'a [u8], offset: usize) -> Result<Self> {
        let tail = data
            .get(offset..)
            .ok_or_else(|| Error::truncated(offset as u64, data.len()))?;
        Self::parse(tail)
    }

    // ==================== Raw Fields ====================

    /// Returns the header with every field in host byte order.
    #[inline]
    pub fn raw(&self) -> &MachHeader64 {
        &self.header
    }

    /// Returns the bytes from the header to the end of the enclosing region.
    #[inline]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Returns the magic in host byte order (`MH_MAGIC` or `MH_MAGIC_64`).
    #[inline]
    pub fn magic(&self) -> u32 {
        self.header.magic
    }

    /// Returns the CPU type.
    #[inline]
    pub fn cputype(&self) -> u32 {
        self.header.cputype
    }

    /// Returns the CPU subtype, including capability bits.
    #[inline]
    pub fn cpusubtype(&self) -> u32 {
        self.header.cpusubtype
    }

    /// Returns the file type (`MH_EXECUTE`, `MH_DYLIB`, ...).
    #[inline]
    pub fn filetype(&self) -> u32 {
        self.header.filetype
    }

    /// Returns the declared number of load commands.
    #[inline]
    pub fn ncmds(&self) -> u32 {
        self.header.ncmds
    }

    /// Returns the declared byte length of the command stream.
    #[inline]
    pub fn sizeofcmds(&self) -> u32 {
        self.header.sizeofcmds
    }

    /// Returns the header flags. Unknown bits are preserved.
    #[inline]
    pub fn flags(&self) -> MachOFlags {
        MachOFlags::from_bits_retain(self.header.flags)
    }

    /// Returns true for 64-bit images.
    #[inline]
    pub fn is64(&self) -> bool {
        self.is64
    }

    /// Returns the byte order of the image.
    #[inline]
    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Returns true if the image is stored in the foreign byte order.
    #[inline]
    pub fn is_swapped(&self) -> bool {
        !self.endian.is_native()
    }

    // ==================== Layout ====================

    /// Returns the size of the fixed header.
    #[inline]
    pub fn header_size(&self) -> usize {
        if self.is64 {
            MachHeader64::SIZE
        } else {
            MachHeader::SIZE
        }
    }

    /// Returns the byte range of the command stream within [`data`](Self::data).
    #[inline]
    pub fn commands_range(&self) -> Range<usize> {
        let start = self.header_size();
        start..start + self.header.sizeofcmds as usize
    }

    /// Returns the raw command stream.
    #[inline]
    pub fn commands_data(&self) -> &'a [u8] {
        // In bounds by construction.
        &self.data[self.commands_range()]
    }

    /// Returns the pointer size in bytes.
    #[inline]
    pub fn pointer_size(&self) -> u64 {
        if self.is64 {
            8
        } else {
            4
        }
    }

    // ==================== Architecture ====================

    /// Returns the named architecture, if the CPU pair is known.
    pub fn architecture(&self) -> Option<Architecture> {
        Architecture::from_cpu(self.header.cputype, self.header.cpusubtype)
    }

    /// Returns the architecture name, or a `cpu(type,subtype)` fallback.
    pub fn arch_name(&self) -> String {
        match self.architecture() {
            Some(arch) => arch.name().to_string(),
            None => format!("cpu({:#x},{:#x})", self.header.cputype, self.header.cpusubtype),
        }
    }

    /// Returns true if the platform maps this image with 16 KiB pages.
    pub fn uses_16k_pages(&self) -> bool {
        match self.header.cputype {
            CPU_TYPE_ARM64 | CPU_TYPE_ARM64_32 => true,
            CPU_TYPE_ARM => {
                self.header.cpusubtype == CPU_SUBTYPE_ARM_V7K && !self.is_kext_bundle()
            }
            _ => false,
        }
    }

    /// Returns the page size used for file size inference.
    pub fn page_size(&self) -> u64 {
        if self.uses_16k_pages() {
            PAGE_SIZE_16K
        } else {
            PAGE_SIZE_4K
        }
    }

    // ==================== Image Kind ====================

    /// Dynamic library.
    pub fn is_dylib(&self) -> bool {
        self.header.filetype == MH_DYLIB
    }

    /// Dynamic library stub.
    pub fn is_dylib_stub(&self) -> bool {
        self.header.filetype == MH_DYLIB_STUB
    }

    /// Loadable bundle.
    pub fn is_bundle(&self) -> bool {
        self.header.filetype == MH_BUNDLE
    }

    /// Main executable.
    pub fn is_executable(&self) -> bool {
        self.header.filetype == MH_EXECUTE
    }

    /// Dynamic linker.
    pub fn is_dylinker(&self) -> bool {
        self.header.filetype == MH_DYLINKER
    }

    /// Kernel extension.
    pub fn is_kext_bundle(&self) -> bool {
        self.header.filetype == MH_KEXT_BUNDLE
    }

    /// Relocatable object file.
    pub fn is_object(&self) -> bool {
        self.header.filetype == MH_OBJECT
    }

    /// Kernel collection.
    pub fn is_fileset(&self) -> bool {
        self.header.filetype == MH_FILESET
    }

    /// Preloaded (static) executable.
    pub fn is_preload(&self) -> bool {
        self.header.filetype == MH_PRELOAD
    }

    /// Position-independent executable.
    pub fn is_pie(&self) -> bool {
        self.is_executable() && self.flags().contains(MachOFlags::PIE)
    }

    /// Uses two-level namespace bindings.
    pub fn is_two_level_namespace(&self) -> bool {
        self.flags().contains(MachOFlags::TWOLEVEL)
    }

    /// Marked as part of a dyld shared cache.
    pub fn in_dyld_cache(&self) -> bool {
        self.flags().contains(MachOFlags::DYLIB_IN_CACHE)
    }

    /// Returns true if the file type is one validation accepts.
    pub fn has_supported_file_type(&self) -> bool {
        SUPPORTED_FILE_TYPES.contains(&self.header.filetype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ImageBuilder;

    #[test]
    fn test_parse_64_little() {
        let image = ImageBuilder::new64()
            .cpu(CPU_TYPE_ARM64, CPU_SUBTYPE_ARM64E)
            .filetype(MH_DYLIB)
            .build();
        let view = ThinHeaderView::parse(&image).unwrap();
        assert!(view.is64());
        assert_eq!(view.endian(), Endian::Little);
        assert_eq!(view.magic(), MH_MAGIC_64);
        assert_eq!(view.architecture(), Some(Architecture::Arm64e));
        assert_eq!(view.header_size(), 32);
        assert!(view.is_dylib());
        assert_eq!(view.page_size(), PAGE_SIZE_16K);
    }

    #[test]
    fn test_parse_32_big() {
        let image = ImageBuilder::new32()
            .endian(Endian::Big)
            .cpu(CPU_TYPE_POWERPC, CPU_SUBTYPE_POWERPC_ALL)
            .filetype(MH_EXECUTE)
            .flags(MachOFlags::PIE.bits())
            .build();
        assert_eq!(&image[..4], &[0xFE, 0xED, 0xFA, 0xCE]);

        let view = ThinHeaderView::parse(&image).unwrap();
        assert!(!view.is64());
        assert_eq!(view.endian(), Endian::Big);
        assert_eq!(view.cputype(), CPU_TYPE_POWERPC);
        assert_eq!(view.arch_name(), "ppc");
        assert_eq!(view.header_size(), 28);
        assert!(view.is_pie());
        assert_eq!(view.page_size(), PAGE_SIZE_4K);
    }

    #[test]
    fn test_parse_rejects_bad_magic() {
        let err = ThinHeaderView::parse(&[0xCA, 0xFE, 0xBA, 0xBE, 0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, Error::UnrecognizedFormat { magic: 0xCAFEBABE }));
    }

    #[test]
    fn test_parse_truncated_header() {
        let image = ImageBuilder::new64().build();
        let err = ThinHeaderView::parse(&image[..20]).unwrap_err();
        assert!(matches!(err, Error::TruncatedInput { needed: 32, available: 20 }));

        let err = ThinHeaderView::parse(&image[..2]).unwrap_err();
        assert!(matches!(err, Error::TruncatedInput { needed: 4, .. }));
    }

    #[test]
    fn test_parse_commands_exceed_region() {
        let image = ImageBuilder::new64().sizeofcmds(0x100).build();
        let err = ThinHeaderView::parse(&image).unwrap_err();
        assert!(matches!(err, Error::TruncatedInput { needed: 0x120, .. }));
    }

    #[test]
    fn test_page_size_armv7k() {
        let exe = ImageBuilder::new32()
            .cpu(CPU_TYPE_ARM, CPU_SUBTYPE_ARM_V7K)
            .filetype(MH_EXECUTE)
            .build();
        assert_eq!(ThinHeaderView::parse(&exe).unwrap().page_size(), PAGE_SIZE_16K);

        let kext = ImageBuilder::new32()
            .cpu(CPU_TYPE_ARM, CPU_SUBTYPE_ARM_V7K)
            .filetype(MH_KEXT_BUNDLE)
            .build();
        assert_eq!(ThinHeaderView::parse(&kext).unwrap().page_size(), PAGE_SIZE_4K);
    }

    #[test]
    fn test_unknown_arch_name() {
        let image = ImageBuilder::new64().cpu(0x42, 0x7).build();
        let view = ThinHeaderView::parse(&image).unwrap();
        assert_eq!(view.architecture(), None);
        assert_eq!(view.arch_name(), "cpu(0x42,0x7)");
    }
}
