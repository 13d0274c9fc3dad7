//! Imported and exported symbol enumeration.
//!
//! Traversal is delegated to a [`SymbolWalker`]. The default
//! [`LinkeditWalker`] decodes export tries, bind opcodes and chained-fixup
//! imports itself; callers with their own decoder plug it in through
//! [`ThinHeaderView::imported_symbols_with`] and
//! [`ThinHeaderView::exported_symbols_with`].
//!
//! A symbol whose name cannot be read is kept in the list as a redacted
//! entry, so the list length always matches what the walker reported.

pub mod bind;
pub mod trie;
mod walker;

use std::fmt;
use std::ops::ControlFlow;

use tracing::warn;

use crate::error::Result;
use crate::macho::ThinHeaderView;

pub use walker::*;

/// Placeholder shown for symbols whose name is missing or unreadable.
pub const REDACTED_SYMBOL_NAME: &str = "redacted";

/// Mangling prefixes used by the Swift compiler across language versions.
const SWIFT_SYMBOL_PREFIXES: &[&str] = &[
    "_T0",
    "$S", "_$S",
    "$s", "_$s",
    "$e", "_$e",
    "@__swiftmacro_",
];

// =============================================================================
// Symbol
// =============================================================================

/// A symbol name as reported by a walker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symbol {
    name: Option<String>,
}

impl Symbol {
    /// Creates a symbol; `None` marks a redacted name.
    pub fn new(name: Option<String>) -> Self {
        Self { name }
    }

    /// Creates a redacted symbol.
    pub fn redacted() -> Self {
        Self { name: None }
    }

    /// Returns the name, or [`REDACTED_SYMBOL_NAME`] if it was unreadable.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(REDACTED_SYMBOL_NAME)
    }

    /// Returns the name if it was readable.
    pub fn raw_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns true if the name could not be read.
    pub fn is_redacted(&self) -> bool {
        self.name.is_none()
    }

    /// Returns true if the name carries a Swift mangling prefix.
    pub fn is_swift(&self) -> bool {
        self.name
            .as_deref()
            .is_some_and(|name| SWIFT_SYMBOL_PREFIXES.iter().any(|p| name.starts_with(p)))
    }

    /// Demangles the name on demand. Failure is not an error.
    pub fn demangled(&self, demangler: &dyn Demangler) -> Option<String> {
        demangler.demangle(self.name.as_deref()?)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An imported symbol and the library expected to provide it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedSymbol {
    /// The symbol.
    pub symbol: Symbol,
    /// Install name of the providing library, if the ordinal names one.
    pub library: Option<String>,
    /// Library ordinal; zero and negative values are special lookups.
    pub ordinal: i64,
    /// The import may be missing at runtime.
    pub weak: bool,
}

/// An exported symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedSymbol {
    /// The symbol.
    pub symbol: Symbol,
    /// Comma-separated attributes (`weak-def`, `re-export`, `resolver`,
    /// `thread-local`, `absolute`), if any.
    pub attributes: Option<String>,
    /// Address relative to the image base.
    pub address: u64,
}

// =============================================================================
// Collaborator Traits
// =============================================================================

/// Turns mangled names into readable ones.
pub trait Demangler {
    /// Returns the demangled form, or `None` if `name` is not understood.
    fn demangle(&self, name: &str) -> Option<String>;
}

impl<F> Demangler for F
where
    F: Fn(&str) -> Option<String>,
{
    fn demangle(&self, name: &str) -> Option<String> {
        self(name)
    }
}

/// A demangler that never demangles.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDemangler;

impl Demangler for NoDemangler {
    fn demangle(&self, _name: &str) -> Option<String> {
        None
    }
}

/// Walks an image's imported and exported symbols.
///
/// The image view bounds every read: its bytes run from the header to the
/// end of the mapped image. Returning [`ControlFlow::Break`] from `visit`
/// stops the walk early without error.
pub trait SymbolWalker {
    /// Visits each imported symbol.
    fn walk_imports(
        &self,
        image: &ThinHeaderView<'_>,
        visit: &mut dyn FnMut(ImportedSymbol) -> ControlFlow<()>,
    ) -> Result<()>;

    /// Visits each exported symbol.
    fn walk_exports(
        &self,
        image: &ThinHeaderView<'_>,
        visit: &mut dyn FnMut(ExportedSymbol) -> ControlFlow<()>,
    ) -> Result<()>;
}

// =============================================================================
// Enumeration
// =============================================================================

impl ThinHeaderView<'_> {
    /// Returns imported symbols using the default walker.
    pub fn imported_symbols(&self) -> Vec<ImportedSymbol> {
        self.imported_symbols_with(&LinkeditWalker)
    }

    /// Returns imported symbols using `walker`.
    ///
    /// A walker failure ends the list early; symbols reported before the
    /// failure are kept.
    pub fn imported_symbols_with(&self, walker: &dyn SymbolWalker) -> Vec<ImportedSymbol> {
        let mut symbols = Vec::new();
        let result = walker.walk_imports(self, &mut |symbol| {
            symbols.push(symbol);
            ControlFlow::Continue(())
        });
        if let Err(e) = result {
            warn!("Import walk stopped after {} symbols: {}", symbols.len(), e);
        }
        symbols
    }

    /// Returns exported symbols using the default walker.
    pub fn exported_symbols(&self) -> Vec<ExportedSymbol> {
        self.exported_symbols_with(&LinkeditWalker)
    }

    /// Returns exported symbols using `walker`.
    pub fn exported_symbols_with(&self, walker: &dyn SymbolWalker) -> Vec<ExportedSymbol> {
        let mut symbols = Vec::new();
        let result = walker.walk_exports(self, &mut |symbol| {
            symbols.push(symbol);
            ControlFlow::Continue(())
        });
        if let Err(e) = result {
            warn!("Export walk stopped after {} symbols: {}", symbols.len(), e);
        }
        symbols
    }
}
