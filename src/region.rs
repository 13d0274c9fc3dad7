//! Read-only byte regions backed by a file mapping or an owned buffer.
//!
//! A [`ByteRegion`] is the single source of truth for the length of the
//! input: every offset computed anywhere in the crate is checked against the
//! slice it hands out. Regions are shared through [`Arc`](std::sync::Arc) and
//! the mapping is released when the last reference is dropped.

use std::fmt;
use std::fs::File;
use std::ops::Deref;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tracing::debug;

use crate::error::{Error, Result};

enum Backing {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

/// An immutable, contiguous span of bytes with a known length.
pub struct ByteRegion {
    backing: Backing,
    path: Option<PathBuf>,
}

impl ByteRegion {
    /// Maps the file at `path` read-only.
    ///
    /// Empty files are not mapped (mapping zero bytes fails on some
    /// platforms); they produce an empty owned region instead.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = File::open(&path).map_err(|e| Error::FileOpen {
            path: path.clone(),
            source: e,
        })?;

        let len = file
            .metadata()
            .map_err(|e| Error::FileOpen {
                path: path.clone(),
                source: e,
            })?
            .len();

        let backing = if len == 0 {
            Backing::Owned(Vec::new())
        } else {
            // SAFETY: the mapping is read-only and never handed out as mutable.
            // Concurrent truncation of the file by another process is outside
            // what this crate can defend against.
            let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::MemoryMap {
                path: path.clone(),
                source: e,
            })?;
            Backing::Mapped(mmap)
        };

        debug!("Mapped {} ({} bytes)", path.display(), len);

        Ok(Self {
            backing,
            path: Some(path),
        })
    }

    /// Wraps an in-memory buffer.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            backing: Backing::Owned(data),
            path: None,
        }
    }

    /// Returns the bytes of the region.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        match &self.backing {
            Backing::Mapped(mmap) => mmap,
            Backing::Owned(vec) => vec,
        }
    }

    /// Returns the total length of the region.
    #[inline]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Returns true if the region has no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the path the region was mapped from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns true if the region is backed by a file mapping.
    pub fn is_mapped(&self) -> bool {
        matches!(self.backing, Backing::Mapped(_))
    }
}

impl Deref for ByteRegion {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl AsRef<[u8]> for ByteRegion {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl fmt::Debug for ByteRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteRegion")
            .field("path", &self.path)
            .field("len", &self.len())
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vec() {
        let region = ByteRegion::from_vec(vec![1, 2, 3]);
        assert_eq!(region.len(), 3);
        assert_eq!(&region[..], &[1, 2, 3]);
        assert!(region.path().is_none());
        assert!(!region.is_mapped());
    }

    #[test]
    fn test_open_maps_file() {
        let path = std::env::temp_dir().join(format!("machscope-region-{}", std::process::id()));
        std::fs::write(&path, b"\xcf\xfa\xed\xfe").unwrap();

        let region = ByteRegion::open(&path).unwrap();
        assert_eq!(region.len(), 4);
        assert!(region.is_mapped());
        assert_eq!(region.path(), Some(path.as_path()));
        drop(region);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_open_empty_file() {
        let path = std::env::temp_dir().join(format!("machscope-empty-{}", std::process::id()));
        std::fs::write(&path, b"").unwrap();

        let region = ByteRegion::open(&path).unwrap();
        assert!(region.is_empty());

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_open_missing_file() {
        let err = ByteRegion::open("/nonexistent/machscope/input").unwrap_err();
        assert!(matches!(err, Error::FileOpen { .. }));
    }
}
