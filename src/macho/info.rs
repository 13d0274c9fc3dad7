//! Identification and linkage helpers built on the lenient command walk.

use std::fmt;

use super::constants::*;
use super::header::ThinHeaderView;
use super::structs::{BuildVersionCommand, DylibCommand, EntryPointCommand, SymtabCommand, UuidCommand};

/// How a dependent library is linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DylibKind {
    /// `LC_LOAD_DYLIB`
    Normal,
    /// `LC_LOAD_WEAK_DYLIB`
    Weak,
    /// `LC_REEXPORT_DYLIB`
    Reexport,
    /// `LC_LOAD_UPWARD_DYLIB`
    Upward,
    /// `LC_LAZY_LOAD_DYLIB`
    Lazy,
}

impl DylibKind {
    fn from_cmd(cmd: u32) -> Option<Self> {
        Some(match cmd {
            LC_LOAD_DYLIB => DylibKind::Normal,
            LC_LOAD_WEAK_DYLIB => DylibKind::Weak,
            LC_REEXPORT_DYLIB => DylibKind::Reexport,
            LC_LOAD_UPWARD_DYLIB => DylibKind::Upward,
            LC_LAZY_LOAD_DYLIB => DylibKind::Lazy,
            _ => return None,
        })
    }
}

impl fmt::Display for DylibKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DylibKind::Normal => "load",
            DylibKind::Weak => "weak",
            DylibKind::Reexport => "reexport",
            DylibKind::Upward => "upward",
            DylibKind::Lazy => "lazy",
        })
    }
}

/// A dependent library named by a dylib load command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedDylib<'a> {
    /// Install name of the library.
    pub path: &'a str,
    /// Link kind.
    pub kind: DylibKind,
    /// Current version, packed as `xxxx.yy.zz`.
    pub current_version: u32,
    /// Compatibility version, packed as `xxxx.yy.zz`.
    pub compatibility_version: u32,
}

/// Platform and version requirements from `LC_BUILD_VERSION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildVersion {
    /// Platform identifier (`PLATFORM_*`).
    pub platform: u32,
    /// Minimum OS version, packed.
    pub minos: u32,
    /// SDK version, packed.
    pub sdk: u32,
}

impl BuildVersion {
    /// Returns the platform name, if known.
    pub fn platform_name(&self) -> Option<&'static str> {
        Some(match self.platform {
            1 => "macOS",
            2 => "iOS",
            3 => "tvOS",
            4 => "watchOS",
            5 => "bridgeOS",
            6 => "macCatalyst",
            7 => "iOS Simulator",
            8 => "tvOS Simulator",
            9 => "watchOS Simulator",
            10 => "DriverKit",
            11 => "visionOS",
            12 => "visionOS Simulator",
            _ => return None,
        })
    }
}

/// Formats a packed `xxxx.yy.zz` version.
pub fn format_version(version: u32) -> String {
    let major = version >> 16;
    let minor = (version >> 8) & 0xFF;
    let patch = version & 0xFF;
    if patch == 0 {
        format!("{}.{}", major, minor)
    } else {
        format!("{}.{}.{}", major, minor, patch)
    }
}

impl<'a> ThinHeaderView<'a> {
    /// Returns the image UUID.
    pub fn uuid(&self) -> Option<[u8; 16]> {
        self.find_command(LC_UUID)?
            .parse::<UuidCommand>()
            .map(|c| c.uuid)
    }

    /// Returns the install name from `LC_ID_DYLIB`.
    pub fn install_name(&self) -> Option<&'a str> {
        self.find_command(LC_ID_DYLIB)?.string_at(8)
    }

    /// Returns the dynamic linker path from `LC_LOAD_DYLINKER`.
    pub fn dylinker(&self) -> Option<&'a str> {
        self.find_command(LC_LOAD_DYLINKER)?.string_at(8)
    }

    /// Returns dependent libraries in command order.
    ///
    /// The position of a library in this list is its one-based library
    /// ordinal minus one.
    pub fn linked_dylibs(&self) -> Vec<LinkedDylib<'a>> {
        self.lenient_load_commands()
            .filter_map(|command| {
                let kind = DylibKind::from_cmd(command.cmd())?;
                let dylib: DylibCommand = command.parse()?;
                Some(LinkedDylib {
                    path: command.string_at(8)?,
                    kind,
                    current_version: dylib.current_version,
                    compatibility_version: dylib.compatibility_version,
                })
            })
            .collect()
    }

    /// Returns the runpath search paths.
    pub fn rpaths(&self) -> Vec<&'a str> {
        self.lenient_load_commands()
            .filter(|c| c.cmd() == LC_RPATH)
            .filter_map(|c| c.string_at(8))
            .collect()
    }

    /// Returns the symbol table command.
    pub fn symtab(&self) -> Option<SymtabCommand> {
        self.find_command(LC_SYMTAB)?.parse()
    }

    /// Returns the build version.
    pub fn build_version(&self) -> Option<BuildVersion> {
        let c: BuildVersionCommand = self.find_command(LC_BUILD_VERSION)?.parse()?;
        Some(BuildVersion {
            platform: c.platform,
            minos: c.minos,
            sdk: c.sdk,
        })
    }

    /// Returns the entry point file offset from `LC_MAIN`.
    pub fn entry_offset(&self) -> Option<u64> {
        self.find_command(LC_MAIN)?
            .parse::<EntryPointCommand>()
            .map(|c| c.entryoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ImageBuilder;
    use crate::util::Endian;

    #[test]
    fn test_linkage_helpers() {
        for endian in [Endian::Little, Endian::Big] {
            let image = ImageBuilder::new64()
                .endian(endian)
                .filetype(MH_DYLIB)
                .dylib(LC_ID_DYLIB, "/usr/lib/libfoo.dylib")
                .dylib(LC_LOAD_DYLIB, "/usr/lib/libSystem.B.dylib")
                .command(LC_UUID, &[0x11; 16])
                .dylib(LC_LOAD_WEAK_DYLIB, "/usr/lib/libweak.dylib")
                .dylib(LC_REEXPORT_DYLIB, "/usr/lib/libre.dylib")
                .dylib(LC_LOAD_UPWARD_DYLIB, "/usr/lib/libup.dylib")
                .path_command(LC_RPATH, "@loader_path/../Frameworks")
                .path_command(LC_RPATH, "@executable_path")
                .build();
            let view = ThinHeaderView::parse(&image).unwrap();

            assert_eq!(view.install_name(), Some("/usr/lib/libfoo.dylib"));
            assert_eq!(view.uuid(), Some([0x11; 16]));
            let linked = view.linked_dylibs();
            let kinds: Vec<DylibKind> = linked.iter().map(|d| d.kind).collect();
            assert_eq!(
                kinds,
                [DylibKind::Normal, DylibKind::Weak, DylibKind::Reexport, DylibKind::Upward]
            );
            assert_eq!(linked[0].path, "/usr/lib/libSystem.B.dylib");
            assert_eq!(linked[0].current_version, 0x0001_0000);
            assert_eq!(view.rpaths(), ["@loader_path/../Frameworks", "@executable_path"]);
        }
    }

    #[test]
    fn test_missing_helpers() {
        let image = ImageBuilder::new64().build();
        let view = ThinHeaderView::parse(&image).unwrap();
        assert!(view.uuid().is_none());
        assert!(view.install_name().is_none());
        assert!(view.linked_dylibs().is_empty());
        assert!(view.symtab().is_none());
        assert!(view.build_version().is_none());
    }

    #[test]
    fn test_build_version_and_entry() {
        let image = ImageBuilder::new64()
            .command_u32s(LC_BUILD_VERSION, &[1, 0x000E_0000, 0x000F_0200, 0])
            .command_u32s(LC_MAIN, &[0x4000, 0, 0, 0])
            .build();
        let view = ThinHeaderView::parse(&image).unwrap();
        let build = view.build_version().unwrap();
        assert_eq!(build.platform_name(), Some("macOS"));
        assert_eq!(format_version(build.minos), "14.0");
        assert_eq!(format_version(build.sdk), "15.2");
        assert_eq!(view.entry_offset(), Some(0x4000));
    }

    #[test]
    fn test_unterminated_path_is_skipped() {
        let builder = ImageBuilder::new64();
        let mut payload = builder.u32_bytes(&[12]);
        payload.extend_from_slice(b"/abc");
        let image = builder.command(LC_RPATH, &payload).build();
        let view = ThinHeaderView::parse(&image).unwrap();
        assert!(view.rpaths().is_empty());
    }
}
