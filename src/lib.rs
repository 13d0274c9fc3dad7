//! machscope - Mach-O, fat and dyld shared cache inspection.
//!
//! This library reads executable images from untrusted input without
//! panicking or reading out of bounds. Every view borrows a read-only byte
//! region; nothing is parsed until it is asked for.
//!
//! # Features
//!
//! - Format detection for thin images, fat containers and shared caches
//! - Strict and best-effort load command walks
//! - Structural validation that reports the first violation
//! - Segments, sections and file size inference
//! - Imported and exported symbols with a pluggable walker
//! - Entitlements from the code signature
//! - Shared cache images and cross-file local symbol lookup
//!
//! # Error policy
//!
//! [`ThinHeaderView::load_commands`] and [`ThinHeaderView::validate`] fail
//! on the first structural inconsistency. Discovery helpers (segments,
//! symbols, entitlements, strings) use the lenient walk and stop quietly
//! instead, returning whatever was found before the inconsistency.
//!
//! # Example
//!
//! ```no_run
//! use machscope::Binary;
//!
//! fn main() -> machscope::Result<()> {
//!     let binary = Binary::open("/usr/lib/dyld")?;
//!
//!     for image in binary.parse()?.images() {
//!         image.header.validate()?;
//!         for segment in image.header.segments() {
//!             println!("{} {:#x}", segment.name(), segment.vmaddr);
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dyld;
pub mod error;
pub mod fat;
pub mod format;
pub mod inspect;
pub mod macho;
pub mod region;
pub mod symbols;
pub mod util;

#[cfg(test)]
mod testutil;

// Re-export main types
pub use dyld::{CacheFiles, SharedCache, SharedCacheImage};
pub use error::{Error, Result};
pub use fat::{FatContainer, FatEntry, FatSlice};
pub use format::{Binary, FileFormat, ImageRef, ParsedBinary};
pub use inspect::{inspect, inspect_binary, inspect_with_options, ImageReport, InspectOptions};
pub use macho::{Architecture, LoadCommand, SegmentInfo, ThinHeaderView};
pub use region::ByteRegion;
pub use symbols::{Demangler, ExportedSymbol, ImportedSymbol, Symbol, SymbolWalker};
