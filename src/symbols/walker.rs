//! The default symbol walker, reading link-edit data directly.

use std::collections::HashSet;
use std::ops::ControlFlow;

use tracing::debug;

use super::bind::{bind_opcodes::BIND_SYMBOL_FLAGS_NON_WEAK_DEFINITION, parse_bind_info};
use super::trie::ExportTrieParser;
use super::{ExportedSymbol, ImportedSymbol, Symbol, SymbolWalker};
use crate::error::{Error, Result};
use crate::macho::*;
use crate::util::{bytes_at_u64, c_str_at, read_record, read_u32_at, read_u64_at};

/// Chained import format: 32-bit records.
pub const DYLD_CHAINED_IMPORT: u32 = 1;
/// Chained import format: 32-bit records with a 32-bit addend.
pub const DYLD_CHAINED_IMPORT_ADDEND: u32 = 2;
/// Chained import format: 64-bit records with a 64-bit addend.
pub const DYLD_CHAINED_IMPORT_ADDEND64: u32 = 3;

/// Walks symbols using the image's own link-edit information.
///
/// Exports come from the export trie (`LC_DYLD_EXPORTS_TRIE` or
/// `LC_DYLD_INFO[_ONLY]`); imports from the chained-fixups import table or
/// the bind opcode streams. Images with neither fall back to the external
/// entries of the symbol table.
///
/// Link-edit offsets are resolved against the image's own bytes, so the
/// walker applies to standalone images and fat slices.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkeditWalker;

impl SymbolWalker for LinkeditWalker {
    fn walk_imports(
        &self,
        image: &ThinHeaderView<'_>,
        visit: &mut dyn FnMut(ImportedSymbol) -> ControlFlow<()>,
    ) -> Result<()> {
        let dylibs: Vec<String> = image
            .linked_dylibs()
            .into_iter()
            .map(|d| d.path.to_string())
            .collect();

        if let Some(command) = image.find_command(LC_DYLD_CHAINED_FIXUPS) {
            let linkedit: LinkeditDataCommand = command
                .parse()
                .ok_or(Error::InvalidChainedFixups { reason: "command too small" })?;
            let data = linkedit_bytes(image, linkedit.dataoff, linkedit.datasize)
                .ok_or(Error::InvalidChainedFixups { reason: "data outside image" })?;
            return walk_chained_imports(data, image, &dylibs, visit);
        }

        if let Some(info) = dyld_info(image) {
            return walk_bind_imports(image, &info, &dylibs, visit);
        }

        walk_symtab(image, |entry| {
            if entry.n_type & N_STAB != 0 || entry.n_type & N_EXT == 0 || entry.n_type & N_TYPE != N_UNDF {
                return ControlFlow::Continue(());
            }
            let ordinal = i64::from(entry.n_desc >> 8);
            let ordinal = if ordinal == i64::from(EXECUTABLE_ORDINAL) {
                -1
            } else if ordinal == i64::from(DYNAMIC_LOOKUP_ORDINAL) {
                -2
            } else {
                ordinal
            };
            visit(ImportedSymbol {
                symbol: Symbol::new(entry.name),
                library: library_for_ordinal(&dylibs, ordinal),
                ordinal,
                weak: entry.n_desc & N_WEAK_REF != 0,
            })
        })
    }

    fn walk_exports(
        &self,
        image: &ThinHeaderView<'_>,
        visit: &mut dyn FnMut(ExportedSymbol) -> ControlFlow<()>,
    ) -> Result<()> {
        if let Some(trie) = export_trie(image)? {
            return ExportTrieParser::new(trie).for_each(|export| {
                let attributes = export.attributes();
                visit(ExportedSymbol {
                    symbol: Symbol::new(export.name),
                    attributes,
                    address: export.address,
                })
            });
        }

        walk_symtab(image, |entry| {
            let kind = entry.n_type & N_TYPE;
            if entry.n_type & N_STAB != 0
                || entry.n_type & N_EXT == 0
                || (kind != N_SECT && kind != N_ABS)
            {
                return ControlFlow::Continue(());
            }
            let mut attrs = Vec::new();
            if entry.n_desc & N_WEAK_DEF != 0 {
                attrs.push("weak-def");
            }
            if kind == N_ABS {
                attrs.push("absolute");
            }
            visit(ExportedSymbol {
                symbol: Symbol::new(entry.name),
                attributes: (!attrs.is_empty()).then(|| attrs.join(",")),
                address: entry.n_value,
            })
        })
    }
}

// =============================================================================
// Link-edit Lookup
// =============================================================================

fn linkedit_bytes<'a>(image: &ThinHeaderView<'a>, offset: u32, size: u32) -> Option<&'a [u8]> {
    bytes_at_u64(image.data(), offset as u64, size as u64)
}

fn dyld_info(image: &ThinHeaderView<'_>) -> Option<DyldInfoCommand> {
    image
        .lenient_load_commands()
        .find(|c| c.cmd() == LC_DYLD_INFO || c.cmd() == LC_DYLD_INFO_ONLY)?
        .parse()
}

fn export_trie<'a>(image: &ThinHeaderView<'a>) -> Result<Option<&'a [u8]>> {
    let (offset, size) = if let Some(command) = image.find_command(LC_DYLD_EXPORTS_TRIE) {
        let linkedit: LinkeditDataCommand = command
            .parse()
            .ok_or(Error::InvalidExportTrie { offset: 0 })?;
        (linkedit.dataoff, linkedit.datasize)
    } else if let Some(info) = dyld_info(image).filter(|info| info.export_size > 0) {
        (info.export_off, info.export_size)
    } else {
        return Ok(None);
    };

    linkedit_bytes(image, offset, size)
        .map(Some)
        .ok_or(Error::InvalidExportTrie { offset: offset as usize })
}

/// Resolves a library ordinal to a dependent library's install name.
///
/// Special ordinals (self, main executable, flat and weak lookup) have no
/// library path.
fn library_for_ordinal(dylibs: &[String], ordinal: i64) -> Option<String> {
    if ordinal < 1 {
        return None;
    }
    dylibs.get(ordinal as usize - 1).cloned()
}

// =============================================================================
// Bind Opcodes
// =============================================================================

fn walk_bind_imports(
    image: &ThinHeaderView<'_>,
    info: &DyldInfoCommand,
    dylibs: &[String],
    visit: &mut dyn FnMut(ImportedSymbol) -> ControlFlow<()>,
) -> Result<()> {
    let streams = [
        (info.bind_off, info.bind_size, false),
        (info.weak_bind_off, info.weak_bind_size, true),
        (info.lazy_bind_off, info.lazy_bind_size, false),
    ];

    let mut seen = HashSet::new();
    for (offset, size, weak_stream) in streams {
        if size == 0 {
            continue;
        }
        let data = linkedit_bytes(image, offset, size).ok_or(Error::InvalidBindOpcode {
            opcode: 0,
            offset: offset as usize,
        })?;

        for record in parse_bind_info(data, image.pointer_size())? {
            if weak_stream && record.symbol_flags & BIND_SYMBOL_FLAGS_NON_WEAK_DEFINITION != 0 {
                continue;
            }
            // Weak-bind entries coalesce by name and carry no library.
            let ordinal = if weak_stream { -3 } else { record.ordinal };
            if !seen.insert((record.symbol_name.clone(), ordinal)) {
                continue;
            }

            let imported = ImportedSymbol {
                weak: record.is_weak_import(),
                library: library_for_ordinal(dylibs, ordinal),
                ordinal,
                symbol: Symbol::new(record.symbol_name),
            };
            if visit(imported).is_break() {
                return Ok(());
            }
        }
    }
    Ok(())
}

// =============================================================================
// Chained Fixups
// =============================================================================

fn walk_chained_imports(
    data: &[u8],
    image: &ThinHeaderView<'_>,
    dylibs: &[String],
    visit: &mut dyn FnMut(ImportedSymbol) -> ControlFlow<()>,
) -> Result<()> {
    let endian = image.endian();
    let header: DyldChainedFixupsHeader = read_record(data, 0, endian)
        .ok_or(Error::InvalidChainedFixups { reason: "header truncated" })?;

    if header.symbols_format != 0 {
        return Err(Error::InvalidChainedFixups { reason: "compressed symbol names" });
    }

    let stride = match header.imports_format {
        DYLD_CHAINED_IMPORT => 4,
        DYLD_CHAINED_IMPORT_ADDEND => 8,
        DYLD_CHAINED_IMPORT_ADDEND64 => 16,
        _ => return Err(Error::InvalidChainedFixups { reason: "unknown imports format" }),
    };

    let symbols = data
        .get(header.symbols_offset as usize..)
        .ok_or(Error::InvalidChainedFixups { reason: "symbols outside fixups" })?;

    for i in 0..header.imports_count as usize {
        let offset = (header.imports_offset as usize)
            .checked_add(i * stride)
            .ok_or(Error::InvalidChainedFixups { reason: "import table overflow" })?;

        let (ordinal, weak, name_offset) = if header.imports_format == DYLD_CHAINED_IMPORT_ADDEND64 {
            let raw = read_u64_at(data, offset, endian)
                .ok_or(Error::InvalidChainedFixups { reason: "import table truncated" })?;
            let ordinal = (raw & 0xFFFF) as u16;
            let ordinal = if ordinal > 0xFFF0 { ordinal as i16 as i64 } else { ordinal as i64 };
            (ordinal, raw & (1 << 16) != 0, (raw >> 32) as usize)
        } else {
            let raw = read_u32_at(data, offset, endian)
                .ok_or(Error::InvalidChainedFixups { reason: "import table truncated" })?;
            let ordinal = (raw & 0xFF) as u8;
            let ordinal = if ordinal > 0xF0 { ordinal as i8 as i64 } else { ordinal as i64 };
            (ordinal, raw & (1 << 8) != 0, (raw >> 9) as usize)
        };

        let name = c_str_at(symbols, name_offset).map(str::to_string);
        if name.is_none() {
            debug!("Chained import {} has an unreadable name at {:#x}", i, name_offset);
        }

        let imported = ImportedSymbol {
            symbol: Symbol::new(name),
            library: library_for_ordinal(dylibs, ordinal),
            ordinal,
            weak,
        };
        if visit(imported).is_break() {
            break;
        }
    }
    Ok(())
}

// =============================================================================
// Symbol Table
// =============================================================================

/// A symbol table entry, widened to 64-bit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NlistEntry {
    pub name: Option<String>,
    pub n_type: u8,
    pub n_sect: u8,
    pub n_desc: u16,
    pub n_value: u64,
}

/// Reads the nlist record at `offset` and resolves its name in `strings`.
pub(crate) fn read_nlist(
    data: &[u8],
    offset: usize,
    is64: bool,
    endian: crate::util::Endian,
    strings: &[u8],
) -> Option<NlistEntry> {
    let (n_strx, n_type, n_sect, n_desc, n_value) = if is64 {
        let n: Nlist64 = read_record(data, offset, endian)?;
        (n.n_strx, n.n_type, n.n_sect, n.n_desc, n.n_value)
    } else {
        let n: Nlist = read_record(data, offset, endian)?;
        (n.n_strx, n.n_type, n.n_sect, n.n_desc, n.n_value as u64)
    };
    Some(NlistEntry {
        name: c_str_at(strings, n_strx as usize).map(str::to_string),
        n_type,
        n_sect,
        n_desc,
        n_value,
    })
}

fn walk_symtab(
    image: &ThinHeaderView<'_>,
    mut visit: impl FnMut(NlistEntry) -> ControlFlow<()>,
) -> Result<()> {
    let Some(symtab) = image.symtab() else {
        return Ok(());
    };

    let data = image.data();
    let entry_size = if image.is64() { Nlist64::SIZE } else { Nlist::SIZE } as u64;
    let needed = symtab.symoff as u64 + symtab.nsyms as u64 * entry_size;
    if needed > data.len() as u64 {
        return Err(Error::truncated(needed, data.len()));
    }
    let strings = linkedit_bytes(image, symtab.stroff, symtab.strsize).unwrap_or_default();

    for i in 0..symtab.nsyms as usize {
        let offset = symtab.symoff as usize + i * entry_size as usize;
        let Some(entry) = read_nlist(data, offset, image.is64(), image.endian(), strings) else {
            break;
        };
        if visit(entry).is_break() {
            break;
        }
    }
    Ok(())
}
