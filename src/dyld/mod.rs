//! Dyld shared cache handling.
//!
//! A shared cache packs many system dylibs into one file, described by:
//! - A header with metadata about the cache
//! - Mappings that describe how regions of the file map to virtual memory
//! - An image table giving each dylib's header address and install name
//! - Local symbols, either in the cache itself or in a `.symbols` file
//!
//! [`SharedCache`] reads one file. [`CacheFiles`] pairs a cache with its
//! symbols file and performs cross-file local symbol lookup.

mod cache;
mod files;
mod local_symbols;
mod structs;

pub use cache::*;
pub use files::*;
pub use local_symbols::*;
pub use structs::*;
