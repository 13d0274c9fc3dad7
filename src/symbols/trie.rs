//! Export trie parsing.
//!
//! The export trie is a prefix tree of exported names. Each node holds
//! optional terminal information (flags, address, optional other value)
//! followed by its children edges (label prefix + offset to child node).

use std::collections::HashSet;
use std::ops::ControlFlow;

use crate::error::{Error, Result};
use crate::util::{c_bytes_at, read_uleb128_fast};

// =============================================================================
// Export Flags
// =============================================================================

/// Export symbol kind mask.
pub const EXPORT_SYMBOL_FLAGS_KIND_MASK: u64 = 0x03;

/// Regular export.
pub const EXPORT_SYMBOL_FLAGS_KIND_REGULAR: u64 = 0x00;

/// Thread-local variable.
pub const EXPORT_SYMBOL_FLAGS_KIND_THREAD_LOCAL: u64 = 0x01;

/// Absolute symbol (not relative to any section).
pub const EXPORT_SYMBOL_FLAGS_KIND_ABSOLUTE: u64 = 0x02;

/// Weak definition.
pub const EXPORT_SYMBOL_FLAGS_WEAK_DEFINITION: u64 = 0x04;

/// Re-export from another dylib.
pub const EXPORT_SYMBOL_FLAGS_REEXPORT: u64 = 0x08;

/// Stub and resolver.
pub const EXPORT_SYMBOL_FLAGS_STUB_AND_RESOLVER: u64 = 0x10;

// =============================================================================
// Export Info
// =============================================================================

/// Information about an exported symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportInfo {
    /// Symbol name, or `None` if it is not valid UTF-8
    pub name: Option<String>,
    /// Export flags
    pub flags: u64,
    /// Symbol address (relative to image base)
    pub address: u64,
    /// For re-exports: ordinal of the source dylib
    pub reexport_ordinal: Option<u32>,
    /// For re-exports: imported symbol name (if different)
    pub reexport_name: Option<String>,
    /// For stub+resolver: resolver function address
    pub resolver_address: Option<u64>,
}

impl ExportInfo {
    /// Returns true if this is a re-export.
    #[inline]
    pub fn is_reexport(&self) -> bool {
        (self.flags & EXPORT_SYMBOL_FLAGS_REEXPORT) != 0
    }

    /// Returns true if this is a weak definition.
    #[inline]
    pub fn is_weak(&self) -> bool {
        (self.flags & EXPORT_SYMBOL_FLAGS_WEAK_DEFINITION) != 0
    }

    /// Returns true if this is a stub with resolver.
    #[inline]
    pub fn is_stub_and_resolver(&self) -> bool {
        (self.flags & EXPORT_SYMBOL_FLAGS_STUB_AND_RESOLVER) != 0
    }

    /// Returns the symbol kind.
    #[inline]
    pub fn kind(&self) -> u64 {
        self.flags & EXPORT_SYMBOL_FLAGS_KIND_MASK
    }

    /// Returns a comma-separated attribute list, or `None` for a plain
    /// regular export.
    pub fn attributes(&self) -> Option<String> {
        let mut attrs = Vec::new();
        if self.is_weak() {
            attrs.push("weak-def");
        }
        if self.is_reexport() {
            attrs.push("re-export");
        }
        if self.is_stub_and_resolver() {
            attrs.push("resolver");
        }
        match self.kind() {
            EXPORT_SYMBOL_FLAGS_KIND_THREAD_LOCAL => attrs.push("thread-local"),
            EXPORT_SYMBOL_FLAGS_KIND_ABSOLUTE => attrs.push("absolute"),
            _ => {}
        }
        (!attrs.is_empty()).then(|| attrs.join(","))
    }
}

// =============================================================================
// Export Trie Parser
// =============================================================================

struct Node<'a> {
    terminal: Option<&'a [u8]>,
    children: Vec<(&'a [u8], usize)>,
}

/// Parser for export tries.
pub struct ExportTrieParser<'a> {
    data: &'a [u8],
}

impl<'a> ExportTrieParser<'a> {
    /// Creates a new parser for the given export trie data.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Visits every export in depth-first order until `visit` breaks.
    ///
    /// Each node is visited at most once; a child edge that points back to
    /// an already visited node is reported as a malformed trie.
    pub fn for_each(&self, mut visit: impl FnMut(ExportInfo) -> ControlFlow<()>) -> Result<()> {
        if self.data.is_empty() {
            return Ok(());
        }

        let mut visited = HashSet::new();
        let mut stack: Vec<(usize, Vec<u8>)> = vec![(0, Vec::new())];

        while let Some((offset, prefix)) = stack.pop() {
            if !visited.insert(offset) {
                return Err(Error::InvalidExportTrie { offset });
            }

            let node = self.read_node(offset)?;
            if let Some(terminal) = node.terminal {
                let name = String::from_utf8(prefix.clone()).ok();
                let export = parse_terminal_info(terminal, name, offset)?;
                if visit(export).is_break() {
                    return Ok(());
                }
            }

            for (label, child) in node.children.into_iter().rev() {
                let mut child_prefix = prefix.clone();
                child_prefix.extend_from_slice(label);
                stack.push((child, child_prefix));
            }
        }

        Ok(())
    }

    /// Parses all exports from the trie.
    pub fn parse_all(&self) -> Result<Vec<ExportInfo>> {
        let mut exports = Vec::new();
        self.for_each(|export| {
            exports.push(export);
            ControlFlow::Continue(())
        })?;
        Ok(exports)
    }

    /// Looks up a single symbol by name.
    pub fn lookup(&self, name: &str) -> Result<Option<ExportInfo>> {
        if self.data.is_empty() {
            return Ok(None);
        }

        let mut remaining = name.as_bytes();
        let mut offset = 0usize;
        // Every step consumes at least one byte of the name.
        for _ in 0..=name.len() + 1 {
            let node = self.read_node(offset)?;
            if remaining.is_empty() {
                return match node.terminal {
                    Some(terminal) => {
                        parse_terminal_info(terminal, Some(name.to_string()), offset).map(Some)
                    }
                    None => Ok(None),
                };
            }

            match node
                .children
                .iter()
                .find(|(label, _)| !label.is_empty() && remaining.starts_with(label))
            {
                Some((label, child)) => {
                    remaining = &remaining[label.len()..];
                    offset = *child;
                }
                None => return Ok(None),
            }
        }

        Err(Error::InvalidExportTrie { offset })
    }

    fn read_node(&self, offset: usize) -> Result<Node<'a>> {
        let data = self.data;
        if offset >= data.len() {
            return Err(Error::InvalidExportTrie { offset });
        }

        let (terminal_size, bytes_read) = uleb_at(data, offset)?;
        let start = offset + bytes_read;
        let end = usize::try_from(terminal_size)
            .ok()
            .and_then(|size| start.checked_add(size))
            .filter(|&end| end <= data.len())
            .ok_or(Error::InvalidExportTrie { offset })?;
        let terminal = (terminal_size > 0).then(|| &data[start..end]);

        let mut children = Vec::new();
        let mut cursor = end;
        if let Some(&child_count) = data.get(cursor) {
            cursor += 1;
            for _ in 0..child_count {
                let label =
                    c_bytes_at(data, cursor).ok_or(Error::InvalidExportTrie { offset: cursor })?;
                cursor += label.len() + 1;

                let (child, bytes) = uleb_at(data, cursor)?;
                cursor += bytes;
                let child =
                    usize::try_from(child).map_err(|_| Error::InvalidExportTrie { offset: cursor })?;
                children.push((label, child));
            }
        }

        Ok(Node { terminal, children })
    }
}

fn uleb_at(data: &[u8], offset: usize) -> Result<(u64, usize)> {
    data.get(offset..)
        .and_then(read_uleb128_fast)
        .ok_or(Error::InvalidUleb128 { offset })
}

/// Parses terminal export info.
fn parse_terminal_info(data: &[u8], name: Option<String>, node: usize) -> Result<ExportInfo> {
    let (flags, mut cursor) = uleb_at(data, 0).map_err(|_| Error::InvalidExportTrie { offset: node })?;

    let mut export = ExportInfo {
        name,
        flags,
        address: 0,
        reexport_ordinal: None,
        reexport_name: None,
        resolver_address: None,
    };

    if (flags & EXPORT_SYMBOL_FLAGS_REEXPORT) != 0 {
        // Re-export: ordinal + optional import name
        let (ordinal, bytes) = uleb_at(data, cursor)?;
        cursor += bytes;
        export.reexport_ordinal = Some(ordinal as u32);

        if let Some(import) = c_bytes_at(data, cursor).filter(|b| !b.is_empty()) {
            export.reexport_name = Some(String::from_utf8_lossy(import).into_owned());
        }
    } else {
        let (addr, bytes) = uleb_at(data, cursor)?;
        cursor += bytes;
        export.address = addr;

        if (flags & EXPORT_SYMBOL_FLAGS_STUB_AND_RESOLVER) != 0 {
            let (resolver, _) = uleb_at(data, cursor)?;
            export.resolver_address = Some(resolver);
        }
    }

    Ok(export)
}

/// Builds export tries for tests.
#[cfg(test)]
pub(crate) mod builder {
    /// Writes an unsigned LEB128 value to a buffer.
    pub fn write_uleb128(mut value: u64, out: &mut Vec<u8>) {
        loop {
            let mut byte = (value & 0x7F) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            out.push(byte);
            if value == 0 {
                break;
            }
        }
    }

    /// Encodes a flat trie: a root with one edge per `(name, flags, address)`.
    ///
    /// Child offsets are single-byte ULEBs, so the trie must stay under 128
    /// bytes.
    pub fn flat_trie(exports: &[(&str, u64, u64)]) -> Vec<u8> {
        let mut root = vec![0u8, exports.len() as u8];
        let header_len: usize = 2 + exports.iter().map(|(n, _, _)| n.len() + 2).sum::<usize>();

        let mut children = Vec::new();
        for (name, flags, address) in exports {
            root.extend_from_slice(name.as_bytes());
            root.push(0);
            root.push((header_len + children.len()) as u8);

            let mut terminal = Vec::new();
            write_uleb128(*flags, &mut terminal);
            write_uleb128(*address, &mut terminal);
            children.push(terminal.len() as u8);
            children.extend_from_slice(&terminal);
            children.push(0);
        }
        root.extend_from_slice(&children);
        root
    }
}

#[cfg(test)]
mod tests {
    use super::builder::*;
    use super::*;

    fn names(exports: &[ExportInfo]) -> Vec<&str> {
        exports.iter().filter_map(|e| e.name.as_deref()).collect()
    }

    /// Root -> "_f" -> { "oo" (terminal), "un" (terminal) }
    fn shared_prefix_trie() -> Vec<u8> {
        vec![
            0x00, 0x01, b'_', b'f', 0x00, 0x06, // root
            0x00, 0x02, b'o', b'o', 0x00, 0x11, b'u', b'n', 0x00, 0x16, 0x00, // "_f"
            0x03, 0x00, 0x80, 0x20, 0x00, // "_foo": regular, addr 0x1000
            0x02, 0x04, 0x10, 0x00, // "_fun": weak, addr 0x10
        ]
    }

    #[test]
    fn test_parse_shared_prefix() {
        let trie = shared_prefix_trie();
        let exports = ExportTrieParser::new(&trie).parse_all().unwrap();
        assert_eq!(names(&exports), ["_foo", "_fun"]);
        assert_eq!(exports[0].address, 0x1000);
        assert_eq!(exports[0].attributes(), None);
        assert!(exports[1].is_weak());
        assert_eq!(exports[1].attributes().as_deref(), Some("weak-def"));
    }

    #[test]
    fn test_lookup() {
        let trie = shared_prefix_trie();
        let parser = ExportTrieParser::new(&trie);
        assert_eq!(parser.lookup("_fun").unwrap().unwrap().address, 0x10);
        assert!(parser.lookup("_fu").unwrap().is_none());
        assert!(parser.lookup("_bar").unwrap().is_none());
    }

    #[test]
    fn test_flat_trie_builder() {
        let trie = flat_trie(&[
            ("_a", 0, 0x100),
            ("_b", EXPORT_SYMBOL_FLAGS_KIND_THREAD_LOCAL, 0x200),
            ("_c", EXPORT_SYMBOL_FLAGS_KIND_ABSOLUTE | EXPORT_SYMBOL_FLAGS_WEAK_DEFINITION, 0x7),
        ]);
        let exports = ExportTrieParser::new(&trie).parse_all().unwrap();
        assert_eq!(names(&exports), ["_a", "_b", "_c"]);
        assert_eq!(exports[1].attributes().as_deref(), Some("thread-local"));
        assert_eq!(exports[2].attributes().as_deref(), Some("weak-def,absolute"));
        assert_eq!(exports[2].address, 0x7);
    }

    #[test]
    fn test_early_stop() {
        let trie = shared_prefix_trie();
        let mut seen = 0;
        ExportTrieParser::new(&trie)
            .for_each(|_| {
                seen += 1;
                ControlFlow::Break(())
            })
            .unwrap();
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_reexport_and_resolver() {
        let trie = vec![
            0x00, 0x02, b'_', b'r', 0x00, 0x0B, b'_', b's', 0x00, 0x13, 0x00, // root
            0x06, 0x08, 0x02, b'_', b'x', 0x00, 0x00, 0x00, // "_r": re-export of "_x" from ordinal 2
            0x04, 0x10, 0x20, 0x30, 0x00, // "_s": stub 0x20, resolver 0x30
        ];
        let exports = ExportTrieParser::new(&trie).parse_all().unwrap();
        assert_eq!(exports[0].reexport_ordinal, Some(2));
        assert_eq!(exports[0].reexport_name.as_deref(), Some("_x"));
        assert_eq!(exports[0].attributes().as_deref(), Some("re-export"));
        assert_eq!(exports[1].address, 0x20);
        assert_eq!(exports[1].resolver_address, Some(0x30));
        assert_eq!(exports[1].attributes().as_deref(), Some("resolver"));
    }

    #[test]
    fn test_cycle_is_rejected() {
        // Root has a single edge pointing back at itself.
        let trie = vec![0x00, 0x01, b'a', 0x00, 0x00];
        let err = ExportTrieParser::new(&trie).parse_all().unwrap_err();
        assert!(matches!(err, Error::InvalidExportTrie { offset: 0 }));
        assert_eq!(ExportTrieParser::new(&trie).lookup("aaaa").unwrap(), None);
    }

    #[test]
    fn test_truncated_trie() {
        let trie = vec![0x00, 0x01, b'_', b'a', 0x00, 0x40];
        assert!(matches!(
            ExportTrieParser::new(&trie).parse_all(),
            Err(Error::InvalidExportTrie { offset: 0x40 })
        ));

        let trie = vec![0x05, 0x00];
        assert!(ExportTrieParser::new(&trie).parse_all().is_err());
        assert!(ExportTrieParser::new(&[]).parse_all().unwrap().is_empty());
    }

    #[test]
    fn test_write_uleb128() {
        let mut buf = Vec::new();
        write_uleb128(0, &mut buf);
        assert_eq!(buf, vec![0x00]);

        buf.clear();
        write_uleb128(128, &mut buf);
        assert_eq!(buf, vec![0x80, 0x01]);
    }
}
