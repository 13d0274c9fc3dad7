//! Local symbols tables.
//!
//! Newer caches move the nlist records of every cached dylib into a
//! companion `.symbols` file. Its table has one entry per image, in the
//! order of the main cache's image table:
//!
//! ```text
//! info:    nlist_offset nlist_count strings_offset strings_size entries_offset entries_count
//! entry:   dylib_offset (u32 or u64) nlist_start_index nlist_count
//! ```
//!
//! All offsets are relative to the info record.

use super::structs::*;
use crate::error::{Error, Result};
use crate::macho::{Nlist, Nlist64};
use crate::symbols::{read_nlist, Symbol};
use crate::util::{bytes_at, read_record, Endian};

/// One image's run of nlist records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalSymbolsEntry {
    /// Offset of the image header (file offset in old caches, VM offset in new ones)
    pub dylib_offset: u64,
    /// First nlist record of the run
    pub nlist_start_index: u32,
    /// Number of nlist records in the run
    pub nlist_count: u32,
}

impl From<DyldCacheLocalSymbolsEntry> for LocalSymbolsEntry {
    fn from(entry: DyldCacheLocalSymbolsEntry) -> Self {
        Self {
            dylib_offset: entry.dylib_offset as u64,
            nlist_start_index: entry.nlist_start_index,
            nlist_count: entry.nlist_count,
        }
    }
}

impl From<DyldCacheLocalSymbolsEntry64> for LocalSymbolsEntry {
    fn from(entry: DyldCacheLocalSymbolsEntry64) -> Self {
        Self {
            dylib_offset: entry.dylib_offset,
            nlist_start_index: entry.nlist_start_index,
            nlist_count: entry.nlist_count,
        }
    }
}

/// A bounds-checked local symbols table.
#[derive(Debug, Clone)]
pub struct LocalSymbols<'a> {
    data: &'a [u8],
    info: DyldCacheLocalSymbolsInfo,
    entries_64: bool,
    nlist_64: bool,
}

impl<'a> LocalSymbols<'a> {
    /// Parses the table whose info record starts `data`.
    ///
    /// The entry table, nlist array and string pool must all fit in `data`.
    pub fn parse(data: &'a [u8], entries_64: bool, nlist_64: bool) -> Result<Self> {
        let info: DyldCacheLocalSymbolsInfo = read_record(data, 0, Endian::Little)
            .ok_or_else(|| Error::truncated(DyldCacheLocalSymbolsInfo::SIZE as u64, data.len()))?;

        let entry_size = if entries_64 {
            DyldCacheLocalSymbolsEntry64::SIZE
        } else {
            DyldCacheLocalSymbolsEntry::SIZE
        };
        let nlist_size = if nlist_64 { Nlist64::SIZE } else { Nlist::SIZE };

        for (offset, len) in [
            (info.entries_offset, info.entries_count as u64 * entry_size as u64),
            (info.nlist_offset, info.nlist_count as u64 * nlist_size as u64),
            (info.strings_offset, info.strings_size as u64),
        ] {
            let end = offset as u64 + len;
            if end > data.len() as u64 {
                return Err(Error::truncated(end, data.len()));
            }
        }

        Ok(Self {
            data,
            info,
            entries_64,
            nlist_64,
        })
    }

    /// Returns the info record.
    pub fn info(&self) -> &DyldCacheLocalSymbolsInfo {
        &self.info
    }

    /// Returns the number of per-image entries.
    pub fn len(&self) -> usize {
        self.info.entries_count as usize
    }

    /// Returns true if the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.info.entries_count == 0
    }

    /// Returns the total number of nlist records.
    pub fn nlist_count(&self) -> u32 {
        self.info.nlist_count
    }

    /// Returns true if entries carry 64-bit dylib offsets.
    pub fn has_64bit_entries(&self) -> bool {
        self.entries_64
    }

    /// Returns true if nlist records are 64-bit.
    pub fn has_64bit_nlist(&self) -> bool {
        self.nlist_64
    }

    /// Returns the entry at `index`.
    pub fn entry(&self, index: usize) -> Option<LocalSymbolsEntry> {
        if index >= self.len() {
            return None;
        }
        let base = self.info.entries_offset as usize;
        if self.entries_64 {
            read_record::<DyldCacheLocalSymbolsEntry64>(
                self.data,
                base + index * DyldCacheLocalSymbolsEntry64::SIZE,
                Endian::Little,
            )
            .map(LocalSymbolsEntry::from)
        } else {
            read_record::<DyldCacheLocalSymbolsEntry>(
                self.data,
                base + index * DyldCacheLocalSymbolsEntry::SIZE,
                Endian::Little,
            )
            .map(LocalSymbolsEntry::from)
        }
    }

    /// Returns every entry in table order.
    pub fn entries(&self) -> impl Iterator<Item = LocalSymbolsEntry> + '_ {
        (0..self.len()).filter_map(|index| self.entry(index))
    }

    /// Returns the symbols of the entry at `index`, or `None` if the table
    /// has no such entry.
    ///
    /// The run must lie inside the nlist array. Names that cannot be read
    /// from the string pool are kept as redacted symbols.
    pub fn symbols(&self, index: usize) -> Result<Option<Vec<Symbol>>> {
        let Some(entry) = self.entry(index) else {
            return Ok(None);
        };

        let start = entry.nlist_start_index as u64;
        let count = entry.nlist_count as u64;
        if start + count > self.info.nlist_count as u64 {
            return Err(Error::LocalSymbolRunOutOfBounds {
                index,
                start,
                count,
                available: self.info.nlist_count as u64,
            });
        }

        let strings = bytes_at(
            self.data,
            self.info.strings_offset as usize,
            self.info.strings_size as usize,
        )
        .unwrap_or_default();
        let nlist_size = if self.nlist_64 { Nlist64::SIZE } else { Nlist::SIZE };

        let symbols = (start..start + count)
            .map(|i| {
                let offset = self.info.nlist_offset as usize + i as usize * nlist_size;
                read_nlist(self.data, offset, self.nlist_64, Endian::Little, strings)
                    .map(|nlist| Symbol::new(nlist.name))
                    .unwrap_or_else(Symbol::redacted)
            })
            .collect();
        Ok(Some(symbols))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dyld::SharedCache;
    use crate::testutil::CacheBuilder;

    const NAMES: &[&str] = &["_a0", "_a1", "_b0", "_c0", "_c1", "_c2"];

    fn names(symbols: &[Symbol]) -> Vec<&str> {
        symbols.iter().map(|s| s.name()).collect()
    }

    fn main_cache() -> Vec<u8> {
        CacheBuilder::new("arm64e")
            .symbol_file_uuid([9; 16])
            .image("/usr/lib/liba.dylib")
            .image("/usr/lib/libb.dylib")
            .image("/usr/lib/libc.dylib")
            .build()
    }

    fn symbols_cache(runs: &[(u32, u32)]) -> Vec<u8> {
        CacheBuilder::new("arm64e")
            .uuid([9; 16])
            .local_symbols(NAMES, runs)
            .build()
    }

    #[test]
    fn test_runs_follow_image_order() {
        let main = main_cache();
        let symbols = symbols_cache(&[(0, 2), (2, 1), (3, 3)]);
        let main = SharedCache::parse(&main).unwrap();
        let symbols = SharedCache::parse(&symbols).unwrap();

        let a = main.local_symbols_for("/usr/lib/liba.dylib", &symbols).unwrap();
        assert_eq!(names(&a), ["_a0", "_a1"]);
        let b = main.local_symbols_for("/usr/lib/libb.dylib", &symbols).unwrap();
        assert_eq!(names(&b), ["_b0"]);
        let c = main.local_symbols_for("/usr/lib/libc.dylib", &symbols).unwrap();
        assert_eq!(names(&c), ["_c0", "_c1", "_c2"]);
    }

    #[test]
    fn test_first_and_last_records() {
        let main = main_cache();
        let symbols = symbols_cache(&[(0, 1), (1, 0), (5, 1)]);
        let main = SharedCache::parse(&main).unwrap();
        let symbols = SharedCache::parse(&symbols).unwrap();

        let a = main.local_symbols_for("/usr/lib/liba.dylib", &symbols).unwrap();
        assert_eq!(names(&a), ["_a0"]);
        let b = main.local_symbols_for("/usr/lib/libb.dylib", &symbols).unwrap();
        assert!(b.is_empty());
        let c = main.local_symbols_for("/usr/lib/libc.dylib", &symbols).unwrap();
        assert_eq!(names(&c), ["_c2"]);
    }

    #[test]
    fn test_run_past_nlist_array() {
        let main = main_cache();
        let symbols = symbols_cache(&[(0, 2), (2, 1), (4, 3)]);
        let main = SharedCache::parse(&main).unwrap();
        let symbols = SharedCache::parse(&symbols).unwrap();

        assert!(main.local_symbols_for("/usr/lib/libb.dylib", &symbols).is_ok());
        let err = main
            .local_symbols_for("/usr/lib/libc.dylib", &symbols)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::LocalSymbolRunOutOfBounds {
                index: 2,
                start: 4,
                count: 3,
                available: 6
            }
        ));
    }

    #[test]
    fn test_start_index_past_nlist_array() {
        let main = main_cache();
        let symbols = symbols_cache(&[(6, 1), (6, 0), (u32::MAX, 2)]);
        let main = SharedCache::parse(&main).unwrap();
        let symbols = SharedCache::parse(&symbols).unwrap();

        assert!(matches!(
            main.local_symbols_for("/usr/lib/liba.dylib", &symbols),
            Err(Error::LocalSymbolRunOutOfBounds { index: 0, .. })
        ));
        assert!(main
            .local_symbols_for("/usr/lib/libb.dylib", &symbols)
            .unwrap()
            .is_empty());
        assert!(matches!(
            main.local_symbols_for("/usr/lib/libc.dylib", &symbols),
            Err(Error::LocalSymbolRunOutOfBounds { index: 2, .. })
        ));
    }

    #[test]
    fn test_fewer_entries_than_images() {
        let main = main_cache();
        let symbols = symbols_cache(&[(0, 2), (2, 1)]);
        let main = SharedCache::parse(&main).unwrap();
        let symbols = SharedCache::parse(&symbols).unwrap();

        let b = main.local_symbols_for("/usr/lib/libb.dylib", &symbols).unwrap();
        assert_eq!(names(&b), ["_b0"]);
        let c = main.local_symbols_for("/usr/lib/libc.dylib", &symbols).unwrap();
        assert!(c.is_empty());
    }

    #[test]
    fn test_unknown_image_and_missing_table() {
        let main = main_cache();
        let main = SharedCache::parse(&main).unwrap();

        let symbols = symbols_cache(&[(0, 1)]);
        let symbols = SharedCache::parse(&symbols).unwrap();
        assert!(matches!(
            main.local_symbols_for("/usr/lib/libd.dylib", &symbols),
            Err(Error::ImageNotFound { .. })
        ));

        assert!(matches!(
            main.local_symbols_for("/usr/lib/liba.dylib", &main),
            Err(Error::MissingLocalSymbols)
        ));
    }

    #[test]
    fn test_same_file_legacy_table() {
        let data = CacheBuilder::new("armv7s")
            .mapping_offset(0x98)
            .legacy_images()
            .image("/usr/lib/liba.dylib")
            .image("/usr/lib/libb.dylib")
            .local_symbols(&["_x", "_y", "_z"], &[(0, 1), (1, 2)])
            .build();
        let cache = SharedCache::parse(&data).unwrap();

        let locals = cache.local_symbols().unwrap().unwrap();
        assert!(!locals.has_64bit_entries());
        assert!(!locals.has_64bit_nlist());
        assert_eq!(locals.len(), 2);
        assert_eq!(locals.entries().count(), 2);
        assert_ne!(locals.entry(1).unwrap().dylib_offset, 0);

        let b = cache.local_symbols_for("/usr/lib/libb.dylib", &cache).unwrap();
        assert_eq!(names(&b), ["_y", "_z"]);
    }

    #[test]
    fn test_unreadable_name_is_redacted() {
        let mut data = symbols_cache(&[(0, 2)]);
        let cache = SharedCache::parse(&data).unwrap();
        let locals = cache.local_symbols().unwrap().unwrap();
        let nlist = cache.header().local_symbols_offset as usize + locals.info().nlist_offset as usize;
        drop(cache);

        data[nlist + 16..nlist + 20].copy_from_slice(&0xFFFF_0000u32.to_le_bytes());
        let cache = SharedCache::parse(&data).unwrap();
        let symbols = cache.local_symbols().unwrap().unwrap().symbols(0).unwrap().unwrap();
        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[0].name(), "_a0");
        assert!(symbols[1].is_redacted());
    }

    #[test]
    fn test_truncated_tables() {
        let data = symbols_cache(&[(0, 6)]);
        let cache = SharedCache::parse(&data).unwrap();
        let start = cache.header().local_symbols_offset as usize;
        let region = &data[start..];

        assert!(LocalSymbols::parse(region, true, true).is_ok());
        assert!(matches!(
            LocalSymbols::parse(&region[..region.len() - 1], true, true),
            Err(Error::TruncatedInput { .. })
        ));
        assert!(matches!(
            LocalSymbols::parse(&region[..10], true, true),
            Err(Error::TruncatedInput { needed: 24, available: 10 })
        ));
    }
}
