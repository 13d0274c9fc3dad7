//! Synthetic image builders for unit tests.

use crate::macho::*;
use crate::util::{encode_record, to_fixed_name, Endian};

/// A section to place inside a segment built by [`ImageBuilder::segment`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct SectionSpec<'s> {
    pub name: &'s str,
    pub addr: u64,
    pub size: u64,
    pub offset: u32,
    pub flags: u32,
}

/// Builds a thin Mach-O image byte by byte.
#[derive(Debug, Clone)]
pub(crate) struct ImageBuilder {
    is64: bool,
    endian: Endian,
    cputype: u32,
    cpusubtype: u32,
    filetype: u32,
    flags: u32,
    commands: Vec<u8>,
    count: u32,
    ncmds: Option<u32>,
    sizeofcmds: Option<u32>,
    tail: Vec<u8>,
    patches: Vec<(usize, Vec<u8>)>,
}

impl ImageBuilder {
    pub fn new64() -> Self {
        Self::new(true)
    }

    pub fn new32() -> Self {
        Self::new(false)
    }

    fn new(is64: bool) -> Self {
        Self {
            is64,
            endian: Endian::Little,
            cputype: if is64 { CPU_TYPE_ARM64 } else { CPU_TYPE_ARM },
            cpusubtype: if is64 { CPU_SUBTYPE_ARM64_ALL } else { CPU_SUBTYPE_ARM_V7 },
            filetype: MH_EXECUTE,
            flags: 0,
            commands: Vec::new(),
            count: 0,
            ncmds: None,
            sizeofcmds: None,
            tail: Vec::new(),
            patches: Vec::new(),
        }
    }

    pub fn endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    pub fn cpu(mut self, cputype: u32, cpusubtype: u32) -> Self {
        self.cputype = cputype;
        self.cpusubtype = cpusubtype;
        self
    }

    pub fn filetype(mut self, filetype: u32) -> Self {
        self.filetype = filetype;
        self
    }

    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// Overrides the declared command count.
    pub fn ncmds(mut self, ncmds: u32) -> Self {
        self.ncmds = Some(ncmds);
        self
    }

    /// Overrides the declared command stream size.
    pub fn sizeofcmds(mut self, sizeofcmds: u32) -> Self {
        self.sizeofcmds = Some(sizeofcmds);
        self
    }

    /// Appends bytes after the command stream.
    pub fn tail(mut self, bytes: &[u8]) -> Self {
        self.tail.extend_from_slice(bytes);
        self
    }

    /// Writes `bytes` at an absolute file offset, growing the image as needed.
    pub fn data_at(mut self, offset: usize, bytes: &[u8]) -> Self {
        self.patches.push((offset, bytes.to_vec()));
        self
    }

    pub fn u32_bytes(&self, values: &[u32]) -> Vec<u8> {
        let mut out = vec![0u8; values.len() * 4];
        for (i, v) in values.iter().enumerate() {
            self.endian.write_u32(&mut out[i * 4..], *v);
        }
        out
    }

    /// Appends a command with `cmdsize = 8 + payload.len()`.
    pub fn command(self, cmd: u32, payload: &[u8]) -> Self {
        let size = 8 + payload.len() as u32;
        self.command_with_size(cmd, size, payload)
    }

    /// Appends a command declaring `cmdsize` regardless of the payload length.
    pub fn command_with_size(mut self, cmd: u32, cmdsize: u32, payload: &[u8]) -> Self {
        let prefix = self.u32_bytes(&[cmd, cmdsize]);
        self.commands.extend_from_slice(&prefix);
        self.commands.extend_from_slice(payload);
        self.count += 1;
        self
    }

    /// Appends a command built from u32 fields.
    pub fn command_u32s(self, cmd: u32, fields: &[u32]) -> Self {
        let payload = self.u32_bytes(fields);
        self.command(cmd, &payload)
    }

    /// Appends a command whose u32 `fields` are followed by a NUL-terminated
    /// string, padded to a multiple of 8.
    pub fn string_command(self, cmd: u32, fields: &[u32], string: &str) -> Self {
        let mut payload = self.u32_bytes(fields);
        payload.extend_from_slice(string.as_bytes());
        payload.push(0);
        while (8 + payload.len()) % 8 != 0 {
            payload.push(0);
        }
        self.command(cmd, &payload)
    }

    /// Appends a dylib command (`LC_LOAD_DYLIB` and friends).
    pub fn dylib(self, cmd: u32, path: &str) -> Self {
        self.string_command(cmd, &[24, 2, 0x0001_0000, 0x0001_0000], path)
    }

    /// Appends a path-only command (`LC_RPATH`, `LC_LOAD_DYLINKER`, ...).
    pub fn path_command(self, cmd: u32, path: &str) -> Self {
        self.string_command(cmd, &[12], path)
    }

    /// Appends a link-edit data command.
    pub fn linkedit(self, cmd: u32, dataoff: u32, datasize: u32) -> Self {
        self.command_u32s(cmd, &[dataoff, datasize])
    }

    /// Appends a segment command of the builder's width.
    pub fn segment(
        mut self,
        name: &str,
        vm: (u64, u64),
        file: (u64, u64),
        prot: u32,
        sections: &[SectionSpec<'_>],
    ) -> Self {
        let nsects = sections.len() as u32;
        let mut bytes = if self.is64 {
            encode_record(
                SegmentCommand64 {
                    cmd: LC_SEGMENT_64,
                    cmdsize: (SegmentCommand64::SIZE + sections.len() * Section64::SIZE) as u32,
                    segname: to_fixed_name(name),
                    vmaddr: vm.0,
                    vmsize: vm.1,
                    fileoff: file.0,
                    filesize: file.1,
                    maxprot: 7,
                    initprot: prot,
                    nsects,
                    flags: 0,
                },
                self.endian,
            )
        } else {
            encode_record(
                SegmentCommand {
                    cmd: LC_SEGMENT,
                    cmdsize: (SegmentCommand::SIZE + sections.len() * Section::SIZE) as u32,
                    segname: to_fixed_name(name),
                    vmaddr: vm.0 as u32,
                    vmsize: vm.1 as u32,
                    fileoff: file.0 as u32,
                    filesize: file.1 as u32,
                    maxprot: 7,
                    initprot: prot,
                    nsects,
                    flags: 0,
                },
                self.endian,
            )
        };

        for spec in sections {
            let encoded = if self.is64 {
                encode_record(
                    Section64 {
                        sectname: to_fixed_name(spec.name),
                        segname: to_fixed_name(name),
                        addr: spec.addr,
                        size: spec.size,
                        offset: spec.offset,
                        align: 0,
                        reloff: 0,
                        nreloc: 0,
                        flags: spec.flags,
                        reserved1: 0,
                        reserved2: 0,
                        reserved3: 0,
                    },
                    self.endian,
                )
            } else {
                encode_record(
                    Section {
                        sectname: to_fixed_name(spec.name),
                        segname: to_fixed_name(name),
                        addr: spec.addr as u32,
                        size: spec.size as u32,
                        offset: spec.offset,
                        align: 0,
                        reloff: 0,
                        nreloc: 0,
                        flags: spec.flags,
                        reserved1: 0,
                        reserved2: 0,
                    },
                    self.endian,
                )
            };
            bytes.extend_from_slice(&encoded);
        }

        self.commands.extend_from_slice(&bytes);
        self.count += 1;
        self
    }

    /// Returns the header size of the image being built.
    pub fn header_size(&self) -> usize {
        if self.is64 {
            MachHeader64::SIZE
        } else {
            MachHeader::SIZE
        }
    }

    pub fn build(&self) -> Vec<u8> {
        let ncmds = self.ncmds.unwrap_or(self.count);
        let sizeofcmds = self.sizeofcmds.unwrap_or(self.commands.len() as u32);

        let mut out = if self.is64 {
            encode_record(
                MachHeader64 {
                    magic: MH_MAGIC_64,
                    cputype: self.cputype,
                    cpusubtype: self.cpusubtype,
                    filetype: self.filetype,
                    ncmds,
                    sizeofcmds,
                    flags: self.flags,
                    reserved: 0,
                },
                self.endian,
            )
        } else {
            encode_record(
                MachHeader {
                    magic: MH_MAGIC,
                    cputype: self.cputype,
                    cpusubtype: self.cpusubtype,
                    filetype: self.filetype,
                    ncmds,
                    sizeofcmds,
                    flags: self.flags,
                },
                self.endian,
            )
        };

        out.extend_from_slice(&self.commands);
        out.extend_from_slice(&self.tail);

        for (offset, bytes) in &self.patches {
            let end = offset + bytes.len();
            if out.len() < end {
                out.resize(end, 0);
            }
            out[*offset..end].copy_from_slice(bytes);
        }
        out
    }
}

/// Builds a fat container holding `slices` at 4 KiB-aligned offsets.
pub(crate) fn build_fat(slices: &[Vec<u8>]) -> Vec<u8> {
    let mut archs = Vec::new();
    let mut offset = 0x1000usize;
    for image in slices {
        let header = ThinHeaderView::parse(image).expect("slice must be a valid image");
        archs.push(FatArch {
            cputype: header.cputype(),
            cpusubtype: header.cpusubtype(),
            offset: offset as u32,
            size: image.len() as u32,
            align: 12,
        });
        offset += image.len().div_ceil(0x1000) * 0x1000;
    }

    let mut out = build_fat_table(&archs);
    for (arch, image) in archs.iter().zip(slices) {
        let start = arch.offset as usize;
        if out.len() < start + image.len() {
            out.resize(start + image.len(), 0);
        }
        out[start..start + image.len()].copy_from_slice(image);
    }
    out
}

/// Encodes a fat header and architecture table with no slice data.
pub(crate) fn build_fat_table(archs: &[FatArch]) -> Vec<u8> {
    let mut out = encode_record(
        FatHeader {
            magic: FAT_MAGIC,
            nfat_arch: archs.len() as u32,
        },
        Endian::Big,
    );
    for arch in archs {
        out.extend_from_slice(&encode_record(*arch, Endian::Big));
    }
    out
}

// =============================================================================
// Shared Caches
// =============================================================================

/// Unslid address of the first mapping in caches built by [`CacheBuilder`].
pub(crate) const CACHE_BASE: u64 = 0x1_8000_0000;

/// Builds a single-file shared cache with one mapping covering the file.
#[derive(Debug, Clone)]
pub(crate) struct CacheBuilder {
    arch: String,
    mapping_offset: u32,
    legacy_images: bool,
    uuid: [u8; 16],
    symbol_file_uuid: [u8; 16],
    images: Vec<(String, Vec<u8>)>,
    locals: Option<(Vec<String>, Vec<(u32, u32)>)>,
}

impl CacheBuilder {
    pub fn new(arch: &str) -> Self {
        Self {
            arch: arch.to_string(),
            mapping_offset: crate::dyld::DyldCacheHeader::SIZE as u32,
            legacy_images: false,
            uuid: [0; 16],
            symbol_file_uuid: [0; 16],
            images: Vec::new(),
            locals: None,
        }
    }

    /// Declares an older, shorter header layout.
    pub fn mapping_offset(mut self, offset: u32) -> Self {
        self.mapping_offset = offset;
        self
    }

    /// Stores the image table in the legacy header fields.
    pub fn legacy_images(mut self) -> Self {
        self.legacy_images = true;
        self
    }

    pub fn uuid(mut self, uuid: [u8; 16]) -> Self {
        self.uuid = uuid;
        self
    }

    pub fn symbol_file_uuid(mut self, uuid: [u8; 16]) -> Self {
        self.symbol_file_uuid = uuid;
        self
    }

    /// Adds a dylib whose `LC_ID_DYLIB` names `install_name`.
    pub fn image(mut self, install_name: &str) -> Self {
        let image = ImageBuilder::new64()
            .filetype(MH_DYLIB)
            .flags(MachOFlags::DYLIB_IN_CACHE.bits())
            .dylib(LC_ID_DYLIB, install_name)
            .build();
        self.images.push((install_name.to_string(), image));
        self
    }

    /// Adds a local symbols table: the nlist names in table order and one
    /// `(start, count)` run per entry.
    pub fn local_symbols(mut self, names: &[&str], runs: &[(u32, u32)]) -> Self {
        self.locals = Some((
            names.iter().map(|s| s.to_string()).collect(),
            runs.to_vec(),
        ));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        use crate::dyld::*;
        use zerocopy::FromZeros;

        let align = |n: usize, a: usize| n.div_ceil(a) * a;
        let mapping_offset = self.mapping_offset as usize;
        let images_offset = align(
            DyldCacheHeader::SIZE.max(mapping_offset + DyldCacheMappingInfo::SIZE),
            8,
        );
        let paths_offset = images_offset + self.images.len() * DyldCacheImageInfo::SIZE;

        let mut out = vec![0u8; paths_offset];
        let mut path_offsets = Vec::new();
        for (name, _) in &self.images {
            path_offsets.push(out.len());
            out.extend_from_slice(name.as_bytes());
            out.push(0);
        }

        let mut image_offsets = Vec::new();
        for (_, image) in &self.images {
            out.resize(align(out.len(), 0x1000), 0);
            image_offsets.push(out.len());
            out.extend_from_slice(image);
        }

        let mut header = DyldCacheHeader::new_zeroed();
        header.magic = to_fixed_name(&format!("dyld_v1{:>9}", self.arch));
        header.mapping_offset = self.mapping_offset;
        header.mapping_count = 1;
        header.uuid = self.uuid;
        header.symbol_file_uuid = self.symbol_file_uuid;
        if self.legacy_images {
            header.images_offset_old = images_offset as u32;
            header.images_count_old = self.images.len() as u32;
        } else {
            header.images_offset = images_offset as u32;
            header.images_count = self.images.len() as u32;
        }

        if let Some((names, runs)) = &self.locals {
            out.resize(align(out.len(), 8), 0);
            let locals_offset = out.len();
            let entries_64 = header.uses_64bit_local_symbol_entries();
            let nlist_64 = self.arch.contains("64") && self.arch != "arm64_32";

            let mut entries = Vec::new();
            for (i, (start, count)) in runs.iter().enumerate() {
                let dylib_offset = image_offsets.get(i).copied().unwrap_or(0);
                if entries_64 {
                    entries.extend_from_slice(&encode_record(
                        DyldCacheLocalSymbolsEntry64 {
                            dylib_offset: dylib_offset as u64,
                            nlist_start_index: *start,
                            nlist_count: *count,
                        },
                        Endian::Little,
                    ));
                } else {
                    entries.extend_from_slice(&encode_record(
                        DyldCacheLocalSymbolsEntry {
                            dylib_offset: dylib_offset as u32,
                            nlist_start_index: *start,
                            nlist_count: *count,
                        },
                        Endian::Little,
                    ));
                }
            }

            let mut strings = vec![0u8];
            let mut nlist = Vec::new();
            for name in names {
                let strx = strings.len() as u32;
                strings.extend_from_slice(name.as_bytes());
                strings.push(0);
                if nlist_64 {
                    nlist.extend_from_slice(&encode_record(
                        Nlist64 { n_strx: strx, n_type: 0x0E, n_sect: 1, n_desc: 0, n_value: CACHE_BASE },
                        Endian::Little,
                    ));
                } else {
                    nlist.extend_from_slice(&encode_record(
                        Nlist { n_strx: strx, n_type: 0x0E, n_sect: 1, n_desc: 0, n_value: 0x1000 },
                        Endian::Little,
                    ));
                }
            }

            let entries_offset = DyldCacheLocalSymbolsInfo::SIZE;
            let nlist_offset = entries_offset + entries.len();
            let strings_offset = nlist_offset + nlist.len();
            let info = DyldCacheLocalSymbolsInfo {
                nlist_offset: nlist_offset as u32,
                nlist_count: names.len() as u32,
                strings_offset: strings_offset as u32,
                strings_size: strings.len() as u32,
                entries_offset: entries_offset as u32,
                entries_count: runs.len() as u32,
            };
            out.extend_from_slice(&encode_record(info, Endian::Little));
            out.extend_from_slice(&entries);
            out.extend_from_slice(&nlist);
            out.extend_from_slice(&strings);

            header.local_symbols_offset = locals_offset as u64;
            header.local_symbols_size = (out.len() - locals_offset) as u64;
        }

        out[..DyldCacheHeader::SIZE].copy_from_slice(&encode_record(header, Endian::Little));

        let mapping = DyldCacheMappingInfo {
            address: CACHE_BASE,
            size: out.len() as u64,
            file_offset: 0,
            max_prot: VM_PROT_READ | VM_PROT_EXECUTE,
            init_prot: VM_PROT_READ | VM_PROT_EXECUTE,
        };
        out[mapping_offset..mapping_offset + DyldCacheMappingInfo::SIZE]
            .copy_from_slice(&encode_record(mapping, Endian::Little));

        for (i, image_offset) in image_offsets.iter().enumerate() {
            let info = DyldCacheImageInfo {
                address: CACHE_BASE + *image_offset as u64,
                mod_time: 0,
                inode: i as u64,
                path_file_offset: path_offsets[i] as u32,
                pad: 0,
            };
            let at = images_offset + i * DyldCacheImageInfo::SIZE;
            out[at..at + DyldCacheImageInfo::SIZE].copy_from_slice(&encode_record(info, Endian::Little));
        }
        out
    }
}
