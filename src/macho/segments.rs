//! Segment and section enumeration, and layout inference.
//!
//! Enumeration runs on the lenient command walk: a malformed command ends
//! the list instead of failing it.

use std::ops::Range;

use tracing::debug;

use super::constants::*;
use super::header::ThinHeaderView;
use super::structs::*;
use crate::util::{align_up, encode_record, fixed_name, read_record, Endian};

// =============================================================================
// Section Info
// =============================================================================

/// A section record, widened to 64-bit fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionInfo {
    /// Raw section name field.
    pub sectname: [u8; 16],
    /// Raw segment name field.
    pub segname: [u8; 16],
    /// Virtual address.
    pub addr: u64,
    /// Size in bytes.
    pub size: u64,
    /// File offset.
    pub offset: u32,
    /// Alignment as a power of two.
    pub align: u32,
    /// File offset of relocation entries.
    pub reloff: u32,
    /// Number of relocation entries.
    pub nreloc: u32,
    /// Section type and attributes.
    pub flags: u32,
    /// Reserved fields (`reserved3` is zero for 32-bit sections).
    pub reserved: [u32; 3],
}

impl SectionInfo {
    fn from_64(s: Section64) -> Self {
        Self {
            sectname: s.sectname,
            segname: s.segname,
            addr: s.addr,
            size: s.size,
            offset: s.offset,
            align: s.align,
            reloff: s.reloff,
            nreloc: s.nreloc,
            flags: s.flags,
            reserved: [s.reserved1, s.reserved2, s.reserved3],
        }
    }

    fn from_32(s: Section) -> Self {
        Self {
            sectname: s.sectname,
            segname: s.segname,
            addr: s.addr as u64,
            size: s.size as u64,
            offset: s.offset,
            align: s.align,
            reloff: s.reloff,
            nreloc: s.nreloc,
            flags: s.flags,
            reserved: [s.reserved1, s.reserved2, 0],
        }
    }

    /// Section name, e.g. `__text`.
    pub fn name(&self) -> &str {
        fixed_name(&self.sectname)
    }

    /// Name of the owning segment.
    pub fn segment_name(&self) -> &str {
        fixed_name(&self.segname)
    }

    /// Section type (`S_*`).
    pub fn section_type(&self) -> u32 {
        self.flags & SECTION_TYPE
    }

    /// Returns true for sections with no file contents.
    pub fn is_zerofill(&self) -> bool {
        matches!(
            self.section_type(),
            S_ZEROFILL | S_GB_ZEROFILL | S_THREAD_LOCAL_ZEROFILL
        )
    }

    /// File byte range of the section contents, if it has any.
    pub fn file_range(&self) -> Option<Range<usize>> {
        if self.is_zerofill() || self.offset == 0 {
            return None;
        }
        let start = self.offset as usize;
        let end = start.checked_add(usize::try_from(self.size).ok()?)?;
        Some(start..end)
    }
}

// =============================================================================
// Segment Info
// =============================================================================

/// A segment descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    /// Raw segment name field (up to 16 bytes, NUL-padded).
    pub segname: [u8; 16],
    /// Virtual address.
    pub vmaddr: u64,
    /// Virtual size.
    pub vmsize: u64,
    /// File offset.
    pub fileoff: u64,
    /// File size.
    pub filesize: u64,
    /// Segment flags (`SG_*`).
    pub flags: u32,
    /// Zero-based position among the image's segments.
    pub index: usize,
    /// Maximum VM protection.
    pub max_prot: u32,
    /// Initial VM protection.
    pub init_prot: u32,
    /// Decoded from `LC_SEGMENT_64`.
    pub is64: bool,
    /// Declared command size.
    pub cmdsize: u32,
    /// Sections that fit inside the command.
    pub sections: Vec<SectionInfo>,
}

impl SegmentInfo {
    /// Segment name, e.g. `__TEXT`.
    pub fn name(&self) -> &str {
        fixed_name(&self.segname)
    }

    /// Made read-only after fixups.
    pub fn is_read_only(&self) -> bool {
        self.flags & SG_READ_ONLY != 0
    }

    /// Protected (encrypted) segment.
    pub fn is_protected(&self) -> bool {
        self.flags & SG_PROTECTED_VERSION_1 != 0
    }

    /// Initially readable.
    pub fn is_readable(&self) -> bool {
        self.init_prot & VM_PROT_READ != 0
    }

    /// Initially writable.
    pub fn is_writable(&self) -> bool {
        self.init_prot & VM_PROT_WRITE != 0
    }

    /// Initially executable.
    pub fn is_executable(&self) -> bool {
        self.init_prot & VM_PROT_EXECUTE != 0
    }

    /// Read-write segment whose tail is zero-filled in memory.
    pub fn has_zero_fill(&self) -> bool {
        self.init_prot == VM_PROT_READ | VM_PROT_WRITE && self.filesize < self.vmsize
    }

    /// End of the segment's file contents, or `None` on overflow.
    pub fn file_end(&self) -> Option<u64> {
        self.fileoff.checked_add(self.filesize)
    }

    /// Returns true if the file contents lie within `len` bytes.
    pub fn fits_in(&self, len: u64) -> bool {
        self.file_end().is_some_and(|end| end <= len)
    }

    /// Returns true if `addr` lies inside the segment's VM range.
    pub fn contains_addr(&self, addr: u64) -> bool {
        addr >= self.vmaddr && addr - self.vmaddr < self.vmsize
    }

    /// Re-serializes the segment command and its sections.
    ///
    /// For a segment decoded from an image this reproduces the original
    /// command bytes when the command holds exactly its sections.
    pub fn encode(&self, endian: Endian) -> Vec<u8> {
        let nsects = self.sections.len() as u32;
        let mut out = if self.is64 {
            encode_record(
                SegmentCommand64 {
                    cmd: LC_SEGMENT_64,
                    cmdsize: self.cmdsize,
                    segname: self.segname,
                    vmaddr: self.vmaddr,
                    vmsize: self.vmsize,
                    fileoff: self.fileoff,
                    filesize: self.filesize,
                    maxprot: self.max_prot,
                    initprot: self.init_prot,
                    nsects,
                    flags: self.flags,
                },
                endian,
            )
        } else {
            encode_record(
                SegmentCommand {
                    cmd: LC_SEGMENT,
                    cmdsize: self.cmdsize,
                    segname: self.segname,
                    vmaddr: self.vmaddr as u32,
                    vmsize: self.vmsize as u32,
                    fileoff: self.fileoff as u32,
                    filesize: self.filesize as u32,
                    maxprot: self.max_prot,
                    initprot: self.init_prot,
                    nsects,
                    flags: self.flags,
                },
                endian,
            )
        };

        for s in &self.sections {
            let bytes = if self.is64 {
                encode_record(
                    Section64 {
                        sectname: s.sectname,
                        segname: s.segname,
                        addr: s.addr,
                        size: s.size,
                        offset: s.offset,
                        align: s.align,
                        reloff: s.reloff,
                        nreloc: s.nreloc,
                        flags: s.flags,
                        reserved1: s.reserved[0],
                        reserved2: s.reserved[1],
                        reserved3: s.reserved[2],
                    },
                    endian,
                )
            } else {
                encode_record(
                    Section {
                        sectname: s.sectname,
                        segname: s.segname,
                        addr: s.addr as u32,
                        size: s.size as u32,
                        offset: s.offset,
                        align: s.align,
                        reloff: s.reloff,
                        nreloc: s.nreloc,
                        flags: s.flags,
                        reserved1: s.reserved[0],
                        reserved2: s.reserved[1],
                    },
                    endian,
                )
            };
            out.extend_from_slice(&bytes);
        }

        if out.len() < self.cmdsize as usize {
            out.resize(self.cmdsize as usize, 0);
        }
        out
    }
}

// =============================================================================
// Layout Inference
// =============================================================================

/// Inferred on-disk size of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileLayout {
    /// Inferred file size in bytes.
    pub size: u64,
    /// Segments are not laid out back to back, or one is zero-filled.
    pub has_hole: bool,
}

impl FileLayout {
    /// Infers the file size from file-backed segments, in visitation order.
    ///
    /// Returns `None` if no segment has file contents.
    pub fn from_segments(segments: &[SegmentInfo], page_size: u64) -> Option<Self> {
        let mut max_end: Option<u64> = None;
        let mut prev_end: Option<u64> = None;
        let mut has_hole = false;

        for segment in segments {
            has_hole |= segment.has_zero_fill();
            if segment.filesize == 0 {
                continue;
            }

            let end = segment.file_end().unwrap_or(u64::MAX);
            if prev_end.is_some_and(|prev| prev != segment.fileoff) {
                has_hole = true;
            }
            prev_end = Some(end);
            max_end = Some(max_end.map_or(end, |m| m.max(end)));
        }

        let max_end = max_end?;
        Some(Self {
            size: align_up(max_end, page_size).unwrap_or(max_end),
            has_hole,
        })
    }
}

/// Virtual memory footprint of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmLayout {
    /// Span from the lowest to the highest mapped address, page-rounded.
    pub vm_space: u64,
    /// A writable segment is partly zero-filled, or a segment has no VM size.
    pub has_zero_fill: bool,
    /// The page-rounded span differs from the unrounded sum of segment
    /// sizes, so a segment gap or an unaligned size both count.
    pub has_hole: bool,
}

impl VmLayout {
    /// Computes the layout, ignoring `__PAGEZERO`.
    pub fn from_segments(segments: &[SegmentInfo], page_size: u64) -> Self {
        let mut low = u64::MAX;
        let mut high = 0u64;
        let mut total = 0u64;
        let mut has_zero_fill = false;

        for segment in segments.iter().filter(|s| s.name() != SEG_PAGEZERO) {
            if segment.vmsize == 0
                || (segment.is_writable() && segment.filesize != segment.vmsize)
            {
                has_zero_fill = true;
            }
            low = low.min(segment.vmaddr);
            high = high.max(segment.vmaddr.saturating_add(segment.vmsize));
            total = total.saturating_add(segment.vmsize);
        }

        if low > high {
            return Self {
                vm_space: 0,
                has_zero_fill,
                has_hole: false,
            };
        }

        let span = high - low;
        let vm_space = align_up(span, page_size).unwrap_or(span);
        Self {
            vm_space,
            has_zero_fill,
            has_hole: vm_space != total,
        }
    }
}

// =============================================================================
// Enumeration
// =============================================================================

impl ThinHeaderView<'_> {
    /// Returns the image's segments in command order.
    pub fn segments(&self) -> Vec<SegmentInfo> {
        let mut segments = Vec::new();

        for command in self.lenient_load_commands() {
            let decoded = match command.cmd() {
                LC_SEGMENT_64 => decode_segment_64(command.bytes(), command.endian()),
                LC_SEGMENT => decode_segment_32(command.bytes(), command.endian()),
                _ => continue,
            };

            match decoded {
                Some(mut segment) => {
                    segment.index = segments.len();
                    segments.push(segment);
                }
                None => {
                    debug!("Segment command {} is too short, stopping", command.index());
                    break;
                }
            }
        }

        segments
    }

    /// Returns the first segment named `name`.
    pub fn segment(&self, name: &str) -> Option<SegmentInfo> {
        self.segments().into_iter().find(|s| s.name() == name)
    }

    /// Returns every section of every segment.
    pub fn sections(&self) -> Vec<SectionInfo> {
        self.segments()
            .into_iter()
            .flat_map(|segment| segment.sections)
            .collect()
    }

    /// Infers the on-disk size of the image.
    ///
    /// Relocatable objects end at their string table; other images end at
    /// their last file-backed segment, rounded to the page size. Images with
    /// neither fall back to the header and command stream.
    pub fn file_layout(&self) -> FileLayout {
        let minimum = FileLayout {
            size: self.commands_range().end as u64,
            has_hole: false,
        };

        if self.is_object() {
            return self
                .find_command(LC_SYMTAB)
                .and_then(|c| c.parse::<SymtabCommand>())
                .map(|symtab| FileLayout {
                    size: symtab.stroff as u64 + symtab.strsize as u64,
                    has_hole: false,
                })
                .unwrap_or(minimum);
        }

        FileLayout::from_segments(&self.segments(), self.page_size()).unwrap_or(minimum)
    }

    /// Computes the virtual memory footprint of the image.
    pub fn vm_layout(&self) -> VmLayout {
        VmLayout::from_segments(&self.segments(), self.page_size())
    }
}

fn decode_segment_64(bytes: &[u8], endian: Endian) -> Option<SegmentInfo> {
    let seg: SegmentCommand64 = read_record(bytes, 0, endian)?;
    let sections = (0..seg.nsects as usize)
        .map_while(|i| {
            let offset = SegmentCommand64::SIZE.checked_add(i.checked_mul(Section64::SIZE)?)?;
            read_record::<Section64>(bytes, offset, endian)
        })
        .map(SectionInfo::from_64)
        .collect();

    Some(SegmentInfo {
        segname: seg.segname,
        vmaddr: seg.vmaddr,
        vmsize: seg.vmsize,
        fileoff: seg.fileoff,
        filesize: seg.filesize,
        flags: seg.flags,
        index: 0,
        max_prot: seg.maxprot,
        init_prot: seg.initprot,
        is64: true,
        cmdsize: seg.cmdsize,
        sections,
    })
}

fn decode_segment_32(bytes: &[u8], endian: Endian) -> Option<SegmentInfo> {
    let seg: SegmentCommand = read_record(bytes, 0, endian)?;
    let sections = (0..seg.nsects as usize)
        .map_while(|i| {
            let offset = SegmentCommand::SIZE.checked_add(i.checked_mul(Section::SIZE)?)?;
            read_record::<Section>(bytes, offset, endian)
        })
        .map(SectionInfo::from_32)
        .collect();

    Some(SegmentInfo {
        segname: seg.segname,
        vmaddr: seg.vmaddr as u64,
        vmsize: seg.vmsize as u64,
        fileoff: seg.fileoff as u64,
        filesize: seg.filesize as u64,
        flags: seg.flags,
        index: 0,
        max_prot: seg.maxprot,
        init_prot: seg.initprot,
        is64: false,
        cmdsize: seg.cmdsize,
        sections,
    })
}
