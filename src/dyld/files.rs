//! A shared cache together with its companion local symbols file.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use super::cache::SharedCache;
use super::structs::uuid_to_string;
use crate::error::{Error, Result};
use crate::region::ByteRegion;
use crate::symbols::Symbol;

/// Suffix of development caches; the symbols file drops it.
pub const DEVELOPMENT_SUFFIX: &str = ".development";

/// Suffix of the local symbols file.
pub const SYMBOLS_SUFFIX: &str = ".symbols";

/// Returns the path of the local symbols file for the cache at `path`.
///
/// `dyld_shared_cache_arm64e.development` and `dyld_shared_cache_arm64e`
/// both map to `dyld_shared_cache_arm64e.symbols`.
pub fn symbols_path_for(path: &Path) -> PathBuf {
    let mut name = match path.to_str().and_then(|p| p.strip_suffix(DEVELOPMENT_SUFFIX)) {
        Some(stripped) => OsString::from(stripped),
        None => path.as_os_str().to_os_string(),
    };
    name.push(SYMBOLS_SUFFIX);
    PathBuf::from(name)
}

/// The main cache file and, for newer caches, its `.symbols` file.
///
/// Both regions are shared; views parsed from them borrow this handle.
#[derive(Debug, Clone)]
pub struct CacheFiles {
    main: Arc<ByteRegion>,
    symbols: Option<Arc<ByteRegion>>,
}

impl CacheFiles {
    /// Maps the cache at `path` and its symbols file, if the header names one
    /// and it exists next to the cache.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let main = Arc::new(ByteRegion::open(path)?);

        let cache = SharedCache::parse(&main)?;
        info!(
            "Opened shared cache {} ({}, {} images)",
            path.display(),
            cache.architecture(),
            cache.image_count()
        );

        let symbols = if cache.header().has_symbol_file() {
            let symbols_path = symbols_path_for(path);
            if symbols_path.exists() {
                Some(Arc::new(ByteRegion::open(&symbols_path)?))
            } else {
                info!("No local symbols file at {}", symbols_path.display());
                None
            }
        } else {
            None
        };

        Self::from_regions(main, symbols)
    }

    /// Wraps already mapped regions, checking the symbols file's UUID.
    pub fn from_regions(main: Arc<ByteRegion>, symbols: Option<Arc<ByteRegion>>) -> Result<Self> {
        let files = Self { main, symbols };

        let cache = files.cache()?;
        if let Some(symbols_cache) = files.symbols_cache()? {
            let expected = cache.header().symbol_file_uuid;
            if symbols_cache.uuid() != expected {
                let path = files
                    .symbols
                    .as_ref()
                    .and_then(|region| region.path())
                    .map(Path::to_path_buf)
                    .unwrap_or_default();
                return Err(Error::LocalSymbolsUuidMismatch {
                    path,
                    expected: uuid_to_string(&expected),
                    actual: uuid_to_string(&symbols_cache.uuid()),
                });
            }
            info!(
                "Attached local symbols file ({} bytes)",
                files.symbols.as_ref().map_or(0, |region| region.len())
            );
        }

        Ok(files)
    }

    /// Returns the main cache region.
    pub fn main_region(&self) -> &Arc<ByteRegion> {
        &self.main
    }

    /// Returns the symbols file region, if one is attached.
    pub fn symbols_region(&self) -> Option<&Arc<ByteRegion>> {
        self.symbols.as_ref()
    }

    /// Returns true if a separate symbols file is attached.
    pub fn has_symbols_file(&self) -> bool {
        self.symbols.is_some()
    }

    /// Parses the main cache.
    pub fn cache(&self) -> Result<SharedCache<'_>> {
        SharedCache::parse(&self.main)
    }

    /// Parses the symbols file, if one is attached.
    pub fn symbols_cache(&self) -> Result<Option<SharedCache<'_>>> {
        self.symbols
            .as_deref()
            .map(|region| SharedCache::parse(region))
            .transpose()
    }

    /// Returns the local symbols of the image named `install_name`.
    ///
    /// Without a symbols file, the main cache's own table is used.
    pub fn local_symbols_for(&self, install_name: &str) -> Result<Vec<Symbol>> {
        let cache = self.cache()?;
        match self.symbols_cache()? {
            Some(symbols_cache) => cache.local_symbols_for(install_name, &symbols_cache),
            None => cache.local_symbols_for(install_name, &cache),
        }
    }
}
