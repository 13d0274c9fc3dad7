//! Mach-O image parsing.
//!
//! [`ThinHeaderView`] is the entry point: it borrows an image's bytes and
//! exposes the command walk, structural validation, segments, signature
//! blobs, string sections and linkage helpers as methods.

mod arch;
mod commands;
mod constants;
mod header;
mod info;
mod segments;
mod signature;
mod strings;
mod structs;
mod validate;

pub use arch::*;
pub use commands::*;
pub use constants::*;
pub use header::*;
pub use info::*;
pub use segments::*;
pub use signature::*;
pub use strings::*;
pub use structs::*;
pub use validate::*;
