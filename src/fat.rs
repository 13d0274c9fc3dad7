//! Fat (universal) containers.
//!
//! The fat header and architecture table are big-endian on every host:
//!
//! ```text
//! fat_header: magic u32 | nfat_arch u32
//! fat_arch:   cputype u32 | cpusubtype u32 | offset u32 | size u32 | align u32
//! ```
//!
//! Every slice is checked when the container is parsed, so lookups never
//! fail on structure.

use std::ops::Range;

use tracing::debug;

use crate::error::{Error, Result};
use crate::macho::{Architecture, FatArch, FatHeader, ThinHeaderView, FAT_MAGIC};
use crate::util::{read_record, Endian};

/// Most architectures a fat header can describe within one 4 KiB page.
pub const MAX_FAT_ARCHS: u32 = ((4096 - FatHeader::SIZE) / FatArch::SIZE) as u32;

/// One architecture table entry, decoded to host order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatSlice {
    /// CPU type.
    pub cputype: u32,
    /// CPU subtype.
    pub cpusubtype: u32,
    /// Offset of the slice from the start of the container.
    pub offset: u32,
    /// Size of the slice.
    pub size: u32,
    /// Alignment as a power of two.
    pub align: u32,
}

impl FatSlice {
    /// Byte range of the slice within the container.
    pub fn range(&self) -> Range<usize> {
        let start = self.offset as usize;
        start..start + self.size as usize
    }

    /// Named architecture, if the CPU pair is known.
    pub fn architecture(&self) -> Option<Architecture> {
        Architecture::from_cpu(self.cputype, self.cpusubtype)
    }
}

impl From<FatArch> for FatSlice {
    fn from(arch: FatArch) -> Self {
        Self {
            cputype: arch.cputype,
            cpusubtype: arch.cpusubtype,
            offset: arch.offset,
            size: arch.size,
            align: arch.align,
        }
    }
}

/// A slice and the thin image inside it.
#[derive(Debug, Clone)]
pub struct FatEntry<'a> {
    /// Architecture table entry.
    pub slice: FatSlice,
    /// Header of the embedded image, bounded by the slice.
    pub header: ThinHeaderView<'a>,
}

/// A parsed fat container.
#[derive(Debug, Clone)]
pub struct FatContainer<'a> {
    data: &'a [u8],
    entries: Vec<FatEntry<'a>>,
}

impl<'a> FatContainer<'a> {
    /// Parses the fat header and every slice.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let header: FatHeader = read_record(data, 0, Endian::Big)
            .ok_or_else(|| Error::truncated(FatHeader::SIZE as u64, data.len()))?;

        if header.magic != FAT_MAGIC {
            return Err(Error::UnrecognizedFormat {
                magic: header.magic,
            });
        }
        if header.nfat_arch > MAX_FAT_ARCHS {
            return Err(Error::MalformedFatHeader("too many architectures"));
        }

        let table_end = FatHeader::SIZE as u64 + header.nfat_arch as u64 * FatArch::SIZE as u64;
        if table_end > data.len() as u64 {
            return Err(Error::truncated(table_end, data.len()));
        }

        let mut entries: Vec<FatEntry<'a>> = Vec::with_capacity(header.nfat_arch as usize);
        for index in 0..header.nfat_arch {
            let offset = FatHeader::SIZE + index as usize * FatArch::SIZE;
            let slice: FatSlice = read_record::<FatArch>(data, offset, Endian::Big)
                .ok_or(Error::MalformedFatArch {
                    index,
                    reason: "entry truncated",
                })?
                .into();

            let end = (slice.offset as u64)
                .checked_add(slice.size as u64)
                .ok_or(Error::MalformedFatArch {
                    index,
                    reason: "offset + size overflows",
                })?;
            if end > data.len() as u64 {
                return Err(Error::MalformedFatArch {
                    index,
                    reason: "slice extends past end of file",
                });
            }
            if (slice.offset as u64) < table_end && slice.size > 0 {
                return Err(Error::MalformedFatArch {
                    index,
                    reason: "slice overlaps architecture table",
                });
            }

            let range = slice.range();
            if entries.iter().any(|other| {
                let r = other.slice.range();
                range.start < r.end && r.start < range.end
            }) {
                return Err(Error::MalformedFatArch {
                    index,
                    reason: "slice overlaps another slice",
                });
            }

            let header = ThinHeaderView::parse(&data[range]).map_err(|e| {
                debug!("Fat slice {} has no valid image: {}", index, e);
                Error::MalformedFatArch {
                    index,
                    reason: "slice is not a thin image",
                }
            })?;

            entries.push(FatEntry { slice, header });
        }

        Ok(Self { data, entries })
    }

    /// Returns the container bytes.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Returns every slice in table order.
    pub fn entries(&self) -> &[FatEntry<'a>] {
        &self.entries
    }

    /// Returns the number of slices.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the container has no slices.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Finds the slice with exactly this CPU pair.
    pub fn find(&self, cputype: u32, cpusubtype: u32) -> Option<&FatEntry<'a>> {
        self.entries
            .iter()
            .find(|e| e.slice.cputype == cputype && e.slice.cpusubtype == cpusubtype)
    }

    /// Finds the slice for a named architecture.
    pub fn find_arch(&self, arch: Architecture) -> Option<&FatEntry<'a>> {
        let (cputype, cpusubtype) = arch.cpu();
        self.find(cputype, cpusubtype)
    }
}
