//! String literals from `__cstring`, `__oslogstring` and `__ustring`.

use tracing::debug;

use super::header::ThinHeaderView;
use super::segments::SectionInfo;
use crate::util::Endian;

/// Section holding NUL-terminated C string literals.
pub const SECT_CSTRING: &str = "__cstring";
/// Section holding os_log format strings.
pub const SECT_OSLOGSTRING: &str = "__oslogstring";
/// Section holding UTF-16 string literals.
pub const SECT_USTRING: &str = "__ustring";

/// Which string section a literal came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringSource {
    /// `__cstring`
    CString,
    /// `__oslogstring`
    OsLog,
    /// `__ustring`
    Utf16,
}

impl StringSource {
    /// The section name this source is read from.
    pub fn section_name(self) -> &'static str {
        match self {
            StringSource::CString => SECT_CSTRING,
            StringSource::OsLog => SECT_OSLOGSTRING,
            StringSource::Utf16 => SECT_USTRING,
        }
    }
}

/// A string literal and where it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionString {
    /// Section the literal was read from.
    pub source: StringSource,
    /// Virtual address of the literal.
    pub addr: u64,
    /// Decoded text. Invalid sequences are replaced.
    pub value: String,
}

impl ThinHeaderView<'_> {
    /// Returns the literals of every string section, in section order.
    pub fn section_strings(&self) -> Vec<SectionString> {
        let mut out = Vec::new();
        for section in self.sections() {
            let source = match section.name() {
                SECT_CSTRING => StringSource::CString,
                SECT_OSLOGSTRING => StringSource::OsLog,
                SECT_USTRING => StringSource::Utf16,
                _ => continue,
            };

            let Some(bytes) = self.section_data(&section) else {
                debug!(
                    "Section {},{} lies outside the image",
                    section.segment_name(),
                    section.name()
                );
                continue;
            };

            match source {
                StringSource::Utf16 => {
                    out.extend(split_utf16(bytes, self.endian(), section.addr, source))
                }
                _ => out.extend(split_c_strings(bytes, section.addr, source)),
            }
        }
        out
    }

    /// Returns the file contents of `section`, if they lie within the image.
    pub fn section_data(&self, section: &SectionInfo) -> Option<&[u8]> {
        section.file_range().and_then(|range| self.data().get(range))
    }
}

fn split_c_strings(bytes: &[u8], base: u64, source: StringSource) -> Vec<SectionString> {
    let mut out = Vec::new();
    let mut start = 0usize;
    for chunk in bytes.split(|&b| b == 0) {
        if !chunk.is_empty() {
            out.push(SectionString {
                source,
                addr: base + start as u64,
                value: String::from_utf8_lossy(chunk).into_owned(),
            });
        }
        start += chunk.len() + 1;
    }
    out
}

fn split_utf16(bytes: &[u8], endian: Endian, base: u64, source: StringSource) -> Vec<SectionString> {
    let units: Vec<u16> = bytes.chunks_exact(2).map(|pair| endian.u16(pair)).collect();
    let mut out = Vec::new();
    let mut start = 0usize;
    for chunk in units.split(|&u| u == 0) {
        if !chunk.is_empty() {
            out.push(SectionString {
                source,
                addr: base + (start * 2) as u64,
                value: String::from_utf16_lossy(chunk),
            });
        }
        start += chunk.len() + 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macho::{S_CSTRING_LITERALS, S_ZEROFILL};
    use crate::testutil::{ImageBuilder, SectionSpec};

    #[test]
    fn test_c_strings() {
        let strings = b"hello\0\0world\0tail";
        let image = ImageBuilder::new64()
            .segment("__TEXT", (0x1000, 0x1000), (0, 0x1000), 5, &[SectionSpec {
                name: SECT_CSTRING,
                addr: 0x1400,
                size: strings.len() as u64,
                offset: 0x400,
                flags: S_CSTRING_LITERALS,
            }])
            .data_at(0x400, strings)
            .build();
        let view = ThinHeaderView::parse(&image).unwrap();

        let found = view.section_strings();
        let values: Vec<&str> = found.iter().map(|s| s.value.as_str()).collect();
        assert_eq!(values, ["hello", "world", "tail"]);
        assert_eq!(found[0].addr, 0x1400);
        assert_eq!(found[1].addr, 0x1407);
        assert_eq!(found[2].addr, 0x140D);
        assert!(found.iter().all(|s| s.source == StringSource::CString));
    }

    #[test]
    fn test_utf16_strings_big_endian() {
        let mut units = Vec::new();
        for unit in "héllo".encode_utf16().chain([0]).chain("ok".encode_utf16()).chain([0]) {
            units.extend_from_slice(&unit.to_be_bytes());
        }
        let image = ImageBuilder::new64()
            .endian(Endian::Big)
            .segment("__TEXT", (0x1000, 0x1000), (0, 0x1000), 5, &[
                SectionSpec { name: SECT_USTRING, addr: 0x1200, size: units.len() as u64, offset: 0x200, flags: 0 },
                SectionSpec { name: SECT_OSLOGSTRING, addr: 0x1300, size: 3, offset: 0x300, flags: S_CSTRING_LITERALS },
            ])
            .data_at(0x200, &units)
            .data_at(0x300, b"%d\0")
            .build();
        let view = ThinHeaderView::parse(&image).unwrap();

        let found = view.section_strings();
        assert_eq!(found.len(), 3);
        assert_eq!(found[0].value, "héllo");
        assert_eq!(found[1].value, "ok");
        assert_eq!(found[1].addr, 0x120C);
        assert_eq!(found[2].source, StringSource::OsLog);
        assert_eq!(found[2].value, "%d");
    }

    #[test]
    fn test_out_of_bounds_and_zerofill_sections_are_skipped() {
        let image = ImageBuilder::new64()
            .segment("__TEXT", (0x1000, 0x1000), (0, 0x1000), 5, &[
                SectionSpec { name: SECT_CSTRING, addr: 0x1400, size: 0x100, offset: 0x8000, flags: S_CSTRING_LITERALS },
                SectionSpec { name: SECT_OSLOGSTRING, addr: 0x1500, size: 0x10, offset: 0x80, flags: S_ZEROFILL },
            ])
            .build();
        let view = ThinHeaderView::parse(&image).unwrap();
        assert!(view.section_strings().is_empty());
    }
}
