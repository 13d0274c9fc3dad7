//! Container format detection.
//!
//! [`FileFormat::sniff`] classifies a region from its leading magic once;
//! everything downstream matches on the closed [`ParsedBinary`] variant
//! instead of re-inspecting bytes.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::dyld::SharedCache;
use crate::error::{Error, Result};
use crate::fat::FatContainer;
use crate::macho::{
    ThinHeaderView, DYLD_CACHE_MAGIC_PREFIX, FAT_MAGIC, MH_CIGAM, MH_CIGAM_64, MH_MAGIC,
    MH_MAGIC_64,
};
use crate::region::ByteRegion;
use crate::util::read_u32_at;
use crate::util::Endian;

/// The kind of container at the start of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileFormat {
    /// 32-bit thin Mach-O, either byte order.
    Thin32,
    /// 64-bit thin Mach-O, either byte order.
    Thin64,
    /// Fat (universal) container with a big-endian header.
    FatBigEndian,
    /// dyld shared cache.
    SharedCache,
    /// Anything else.
    Unrecognized,
}

impl FileFormat {
    /// Classifies `data` by its magic. Never guesses: inputs shorter than
    /// four bytes or with an unknown magic are `Unrecognized`.
    pub fn sniff(data: &[u8]) -> Self {
        if data.starts_with(DYLD_CACHE_MAGIC_PREFIX) {
            return FileFormat::SharedCache;
        }

        let Some(magic) = read_u32_at(data, 0, Endian::Big) else {
            return FileFormat::Unrecognized;
        };

        match magic {
            MH_MAGIC | MH_CIGAM => FileFormat::Thin32,
            MH_MAGIC_64 | MH_CIGAM_64 => FileFormat::Thin64,
            FAT_MAGIC => FileFormat::FatBigEndian,
            _ => FileFormat::Unrecognized,
        }
    }

    /// Returns true for either thin variant.
    pub fn is_thin(self) -> bool {
        matches!(self, FileFormat::Thin32 | FileFormat::Thin64)
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FileFormat::Thin32 => "32-bit Mach-O image",
            FileFormat::Thin64 => "64-bit Mach-O image",
            FileFormat::FatBigEndian => "fat container",
            FileFormat::SharedCache => "dyld shared cache",
            FileFormat::Unrecognized => "unrecognized file",
        })
    }
}

// =============================================================================
// Binary Handle
// =============================================================================

/// An opened input together with its sniffed format.
///
/// Cloning is cheap; all clones share the same region, which is released
/// when the last one is dropped. Views produced by [`Binary::parse`] borrow
/// from the handle.
#[derive(Debug, Clone)]
pub struct Binary {
    region: Arc<ByteRegion>,
    format: FileFormat,
}

impl Binary {
    /// Maps the file at `path` and sniffs its format.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let region = ByteRegion::open(path)?;
        Ok(Self::from_region(Arc::new(region)))
    }

    /// Wraps an already shared region.
    pub fn from_region(region: Arc<ByteRegion>) -> Self {
        let format = FileFormat::sniff(&region);
        debug!("Sniffed {} ({} bytes)", format, region.len());
        Self { region, format }
    }

    /// Wraps an in-memory buffer.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self::from_region(Arc::new(ByteRegion::from_vec(data)))
    }

    /// Returns the sniffed format.
    pub fn format(&self) -> FileFormat {
        self.format
    }

    /// Returns the shared region.
    pub fn region(&self) -> &Arc<ByteRegion> {
        &self.region
    }

    /// Returns the bytes of the region.
    pub fn bytes(&self) -> &[u8] {
        &self.region
    }

    /// Parses the region according to its format.
    pub fn parse(&self) -> Result<ParsedBinary<'_>> {
        let data = self.bytes();
        match self.format {
            FileFormat::Thin32 | FileFormat::Thin64 => {
                ThinHeaderView::parse(data).map(ParsedBinary::Thin)
            }
            FileFormat::FatBigEndian => FatContainer::parse(data).map(ParsedBinary::Fat),
            FileFormat::SharedCache => SharedCache::parse(data).map(ParsedBinary::SharedCache),
            FileFormat::Unrecognized => match read_u32_at(data, 0, Endian::Big) {
                Some(magic) => Err(Error::UnrecognizedFormat { magic }),
                None => Err(Error::truncated(4, data.len())),
            },
        }
    }

    /// Parses the region as a thin image.
    pub fn thin(&self) -> Result<ThinHeaderView<'_>> {
        self.require(FileFormat::is_thin, "thin image")?;
        ThinHeaderView::parse(self.bytes())
    }

    /// Parses the region as a fat container.
    pub fn fat(&self) -> Result<FatContainer<'_>> {
        self.require(|f| f == FileFormat::FatBigEndian, "fat container")?;
        FatContainer::parse(self.bytes())
    }

    /// Parses the region as a shared cache.
    pub fn shared_cache(&self) -> Result<SharedCache<'_>> {
        self.require(|f| f == FileFormat::SharedCache, "shared cache")?;
        SharedCache::parse(self.bytes())
    }

    fn require(&self, accept: impl Fn(FileFormat) -> bool, expected: &'static str) -> Result<()> {
        if accept(self.format) {
            Ok(())
        } else {
            Err(Error::NotExpectedContainerKind {
                expected,
                found: self.format,
            })
        }
    }
}

// =============================================================================
// Parsed Binary
// =============================================================================

/// A parsed input: exactly one of the supported container kinds.
#[derive(Debug)]
pub enum ParsedBinary<'a> {
    /// A single image.
    Thin(ThinHeaderView<'a>),
    /// Several images, one per architecture.
    Fat(FatContainer<'a>),
    /// A shared cache of many images.
    SharedCache(SharedCache<'a>),
}

/// A thin image found inside a parsed binary, with a display label.
#[derive(Debug, Clone)]
pub struct ImageRef<'a> {
    /// Architecture name for thin and fat inputs, install name for caches.
    pub label: String,
    /// The image header.
    pub header: ThinHeaderView<'a>,
}

impl<'a> ParsedBinary<'a> {
    /// Returns every thin image in the input.
    ///
    /// Shared cache images whose header cannot be read from this file (for
    /// example images that live in a sub-cache) are skipped.
    pub fn images(&self) -> Vec<ImageRef<'a>> {
        match self {
            ParsedBinary::Thin(header) => vec![ImageRef {
                label: header.arch_name(),
                header: *header,
            }],
            ParsedBinary::Fat(fat) => fat
                .entries()
                .iter()
                .map(|entry| ImageRef {
                    label: entry.header.arch_name(),
                    header: entry.header,
                })
                .collect(),
            ParsedBinary::SharedCache(cache) => cache
                .images()
                .filter_map(|image| match image.header() {
                    Ok(header) => Some(ImageRef {
                        label: image.install_name().unwrap_or("<unnamed>").to_string(),
                        header,
                    }),
                    Err(e) => {
                        debug!("Skipping cache image {}: {}", image.index(), e);
                        None
                    }
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ImageBuilder;

    #[test]
    fn test_sniff_magics() {
        assert_eq!(FileFormat::sniff(&[0xCF, 0xFA, 0xED, 0xFE]), FileFormat::Thin64);
        assert_eq!(FileFormat::sniff(&[0xFE, 0xED, 0xFA, 0xCF]), FileFormat::Thin64);
        assert_eq!(FileFormat::sniff(&[0xCE, 0xFA, 0xED, 0xFE]), FileFormat::Thin32);
        assert_eq!(FileFormat::sniff(&[0xFE, 0xED, 0xFA, 0xCE]), FileFormat::Thin32);
        assert_eq!(FileFormat::sniff(&[0xCA, 0xFE, 0xBA, 0xBE]), FileFormat::FatBigEndian);
        assert_eq!(FileFormat::sniff(b"dyld_v1  arm64e\0"), FileFormat::SharedCache);
    }

    #[test]
    fn test_sniff_fails_closed() {
        assert_eq!(FileFormat::sniff(&[]), FileFormat::Unrecognized);
        assert_eq!(FileFormat::sniff(&[0xCF, 0xFA, 0xED]), FileFormat::Unrecognized);
        assert_eq!(FileFormat::sniff(&[0xCA, 0xFE, 0xBA, 0xBF]), FileFormat::Unrecognized);
        assert_eq!(FileFormat::sniff(b"dyld_v0    i386"), FileFormat::Unrecognized);
        assert_eq!(FileFormat::sniff(b"\x7fELF"), FileFormat::Unrecognized);
    }

    #[test]
    fn test_parse_dispatch() {
        let binary = Binary::from_vec(ImageBuilder::new64().build());
        assert_eq!(binary.format(), FileFormat::Thin64);
        assert!(matches!(binary.parse().unwrap(), ParsedBinary::Thin(_)));
        assert_eq!(binary.parse().unwrap().images().len(), 1);

        let err = Binary::from_vec(b"\x7fELF....".to_vec()).parse().unwrap_err();
        assert!(matches!(err, Error::UnrecognizedFormat { magic: 0x7F454C46 }));

        let err = Binary::from_vec(vec![0xCF]).parse().unwrap_err();
        assert!(matches!(err, Error::TruncatedInput { needed: 4, available: 1 }));
    }

    #[test]
    fn test_wrong_container_kind() {
        let binary = Binary::from_vec(ImageBuilder::new64().build());
        let err = binary.shared_cache().unwrap_err();
        assert!(matches!(
            err,
            Error::NotExpectedContainerKind {
                expected: "shared cache",
                found: FileFormat::Thin64
            }
        ));
        assert!(binary.fat().is_err());
        assert!(binary.thin().is_ok());
    }

    #[test]
    fn test_region_released_after_last_clone() {
        let binary = Binary::from_vec(ImageBuilder::new64().build());
        let weak = Arc::downgrade(binary.region());
        let clone = binary.clone();
        drop(binary);
        assert!(weak.upgrade().is_some());
        drop(clone);
        assert!(weak.upgrade().is_none());
    }
}
