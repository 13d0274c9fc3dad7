//! Structural validation of the load command stream.
//!
//! Validation is fail-fast: it walks the commands with the strict walker and
//! returns the first violation, with the command index and the expected and
//! actual sizes. It never attempts partial recovery.

use tracing::debug;

use super::commands::LoadCommand;
use super::constants::*;
use super::header::ThinHeaderView;
use super::structs::*;
use crate::error::{Error, MalformedReason, Result};

/// How a command kind's size is checked.
enum Expected {
    /// Exactly this many bytes.
    Fixed(usize),
    /// `base + count * element`, with the count read as a u32 at `count_offset`.
    Counted {
        base: usize,
        count_offset: usize,
        element: usize,
    },
    /// At least `min` bytes, with a string whose offset is the u32 at `field`.
    String { min: usize, field: usize },
    /// Not a kind this validator knows.
    Unknown,
}

fn expected_layout(cmd: u32) -> Expected {
    match cmd {
        LC_SYMTAB => Expected::Fixed(SymtabCommand::SIZE),
        LC_DYSYMTAB => Expected::Fixed(DysymtabCommand::SIZE),

        LC_SEGMENT_SPLIT_INFO
        | LC_ATOM_INFO
        | LC_FUNCTION_STARTS
        | LC_DYLD_EXPORTS_TRIE
        | LC_DYLD_CHAINED_FIXUPS
        | LC_FUNCTION_VARIANTS
        | LC_FUNCTION_VARIANT_FIXUPS
        | LC_CODE_SIGNATURE
        | LC_DATA_IN_CODE
        | LC_LINKER_OPTIMIZATION_HINT
        | LC_DYLIB_CODE_SIGN_DRS => Expected::Fixed(LinkeditDataCommand::SIZE),

        LC_ENCRYPTION_INFO => Expected::Fixed(EncryptionInfoCommand::SIZE),
        LC_ENCRYPTION_INFO_64 => Expected::Fixed(EncryptionInfoCommand::SIZE_64),
        LC_DYLD_INFO | LC_DYLD_INFO_ONLY => Expected::Fixed(DyldInfoCommand::SIZE),

        LC_VERSION_MIN_MACOSX
        | LC_VERSION_MIN_IPHONEOS
        | LC_VERSION_MIN_TVOS
        | LC_VERSION_MIN_WATCHOS => Expected::Fixed(VersionMinCommand::SIZE),

        LC_UUID => Expected::Fixed(UuidCommand::SIZE),
        LC_MAIN => Expected::Fixed(EntryPointCommand::SIZE),
        LC_SOURCE_VERSION => Expected::Fixed(SourceVersionCommand::SIZE),

        LC_BUILD_VERSION => Expected::Counted {
            base: BuildVersionCommand::SIZE,
            count_offset: 20,
            element: BuildVersionCommand::TOOL_SIZE,
        },
        LC_SEGMENT => Expected::Counted {
            base: SegmentCommand::SIZE,
            count_offset: 48,
            element: Section::SIZE,
        },
        LC_SEGMENT_64 => Expected::Counted {
            base: SegmentCommand64::SIZE,
            count_offset: 64,
            element: Section64::SIZE,
        },

        LC_ID_DYLIB
        | LC_LOAD_DYLIB
        | LC_LOAD_WEAK_DYLIB
        | LC_REEXPORT_DYLIB
        | LC_LOAD_UPWARD_DYLIB => Expected::String {
            min: DylibCommand::SIZE,
            field: 8,
        },

        LC_RPATH
        | LC_SUB_UMBRELLA
        | LC_SUB_CLIENT
        | LC_SUB_LIBRARY
        | LC_SUB_FRAMEWORK
        | LC_LOAD_DYLINKER
        | LC_ID_DYLINKER
        | LC_DYLD_ENVIRONMENT => Expected::String { min: 12, field: 8 },

        LC_FILESET_ENTRY => Expected::String {
            min: FilesetEntryCommand::SIZE,
            field: 24,
        },

        _ => Expected::Unknown,
    }
}

fn wrong_size(command: &LoadCommand<'_>, expected: u64) -> Error {
    Error::WrongRecordSize {
        index: command.index(),
        cmd: command.cmd(),
        expected,
        actual: command.cmdsize(),
    }
}

/// Checks one command's size and, for string-bearing kinds, its string.
pub fn validate_command(command: &LoadCommand<'_>) -> Result<()> {
    let actual = command.cmdsize() as u64;
    if actual % 4 != 0 {
        return Err(Error::malformed(command.index(), MalformedReason::Misaligned));
    }

    match expected_layout(command.cmd()) {
        Expected::Fixed(size) => {
            if actual != size as u64 {
                return Err(wrong_size(command, size as u64));
            }
        }
        Expected::Counted {
            base,
            count_offset,
            element,
        } => {
            let count = match command.read_u32(count_offset) {
                Some(count) if actual >= base as u64 => count,
                _ => return Err(wrong_size(command, base as u64)),
            };
            let expected = base as u64 + count as u64 * element as u64;
            if actual != expected {
                return Err(wrong_size(command, expected));
            }
        }
        Expected::String { min, field } => {
            if actual < min as u64 {
                return Err(wrong_size(command, min as u64));
            }
            let offset = command
                .read_u32(field)
                .ok_or_else(|| wrong_size(command, min as u64))?;
            if offset >= command.cmdsize() {
                return Err(Error::StringOffsetOverflow {
                    index: command.index(),
                    offset,
                    cmdsize: command.cmdsize(),
                });
            }
            let tail = &command.bytes()[offset as usize..];
            if memchr::memchr(0, tail).is_none() {
                return Err(Error::UnterminatedString {
                    index: command.index(),
                });
            }
        }
        Expected::Unknown => {
            if command.is_required() {
                return Err(Error::UnknownRequiredLoadCommand {
                    index: command.index(),
                    cmd: command.cmd(),
                });
            }
            debug!(
                "Skipping unknown load command {} ({:#x})",
                command.index(),
                command.cmd()
            );
        }
    }

    Ok(())
}

/// Validates the file type and every load command of `view`.
pub fn validate_structure(view: &ThinHeaderView<'_>) -> Result<()> {
    if !view.has_supported_file_type() {
        return Err(Error::UnsupportedFileType(view.filetype()));
    }

    for command in view.load_commands() {
        validate_command(&command?)?;
    }

    // Object files are laid out by their sections, and in-cache images
    // carry offsets into the cache file rather than into this slice.
    if view.is_object() || view.in_dyld_cache() {
        return Ok(());
    }
    let available = view.data().len() as u64;
    for segment in view.segments() {
        if !segment.fits_in(available) {
            return Err(Error::SegmentOutsideFile {
                index: segment.index,
                name: segment.name().to_string(),
                end: segment.file_end().unwrap_or(u64::MAX),
                available,
            });
        }
    }

    Ok(())
}

impl ThinHeaderView<'_> {
    /// Validates the image structure, returning the first violation.
    pub fn validate(&self) -> Result<()> {
        validate_structure(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{ImageBuilder, SectionSpec};
    use crate::util::Endian;

    fn validate(image: &[u8]) -> Result<()> {
        ThinHeaderView::parse(image).unwrap().validate()
    }

    fn well_formed(endian: Endian) -> ImageBuilder {
        ImageBuilder::new64()
            .endian(endian)
            .filetype(MH_DYLIB)
            .segment("__TEXT", (0, 0x4000), (0, 0x4000), 5, &[SectionSpec {
                name: "__text",
                addr: 0x1000,
                size: 0x100,
                offset: 0x1000,
                flags: 0,
            }])
            .dylib(LC_ID_DYLIB, "/usr/lib/libfoo.dylib")
            .dylib(LC_LOAD_DYLIB, "/usr/lib/libSystem.B.dylib")
            .command(LC_UUID, &[0x11; 16])
            .command_u32s(LC_SYMTAB, &[0, 0, 0, 0])
            .command_u32s(LC_BUILD_VERSION, &[1, 0x000E_0000, 0x000E_0000, 1, 3, 0x0300_0000])
            .path_command(LC_RPATH, "@loader_path/../Frameworks")
            .linkedit(LC_CODE_SIGNATURE, 0, 0)
            .command_u32s(LC_DYLD_INFO_ONLY, &[0; 10])
            .command(LC_SOURCE_VERSION, &[0; 8])
            .data_at(0x3FFF, &[0])
    }

    #[test]
    fn test_well_formed_image_passes() {
        for endian in [Endian::Little, Endian::Big] {
            let image = well_formed(endian).build();
            validate(&image).unwrap();
        }
    }

    #[test]
    fn test_well_formed_32_bit_segment() {
        let image = ImageBuilder::new32()
            .segment("__TEXT", (0, 0x1000), (0, 0x1000), 5, &[SectionSpec {
                name: "__text",
                addr: 0x100,
                size: 0x10,
                offset: 0x100,
                flags: 0,
            }])
            .data_at(0xFFF, &[0])
            .build();
        validate(&image).unwrap();
    }

    #[test]
    fn test_wrong_fixed_size() {
        let image = ImageBuilder::new64()
            .command(LC_UUID, &[0; 16])
            .command(LC_UUID, &[0; 8])
            .build();
        let err = validate(&image).unwrap_err();
        assert!(matches!(
            err,
            Error::WrongRecordSize {
                index: 1,
                cmd: LC_UUID,
                expected: 24,
                actual: 16
            }
        ));
    }

    #[test]
    fn test_wrong_linkedit_size() {
        let image = ImageBuilder::new64()
            .command_u32s(LC_FUNCTION_VARIANTS, &[0, 0, 0])
            .build();
        assert!(matches!(
            validate(&image),
            Err(Error::WrongRecordSize { expected: 16, actual: 20, .. })
        ));
    }

    #[test]
    fn test_segment_section_count_mismatch() {
        // Declares one section more than the command holds.
        let mut image = ImageBuilder::new64()
            .segment("__TEXT", (0, 0x1000), (0, 0x1000), 5, &[])
            .build();
        image[32 + 64] = 1;
        assert!(matches!(
            validate(&image),
            Err(Error::WrongRecordSize {
                index: 0,
                cmd: LC_SEGMENT_64,
                expected: 152,
                actual: 72
            })
        ));
    }

    #[test]
    fn test_build_version_tools() {
        let image = ImageBuilder::new64()
            .command_u32s(LC_BUILD_VERSION, &[1, 0, 0, 2, 3, 0])
            .build();
        assert!(matches!(
            validate(&image),
            Err(Error::WrongRecordSize { expected: 40, actual: 32, .. })
        ));
    }

    #[test]
    fn test_string_offset_overflow() {
        let image = ImageBuilder::new64()
            .string_command(LC_LOAD_DYLIB, &[64, 0, 0, 0], "/usr/lib/libz.dylib")
            .build();
        let err = validate(&image).unwrap_err();
        assert!(matches!(
            err,
            Error::StringOffsetOverflow {
                index: 0,
                offset: 64,
                cmdsize: 48
            }
        ));
    }

    #[test]
    fn test_unterminated_string() {
        let builder = ImageBuilder::new64();
        let mut payload = builder.u32_bytes(&[12]);
        payload.extend_from_slice(b"@rpath/x");
        let image = builder.command(LC_RPATH, &payload).build();
        assert!(matches!(
            validate(&image),
            Err(Error::UnterminatedString { index: 0 })
        ));
    }

    #[test]
    fn test_string_command_too_small() {
        let image = ImageBuilder::new64()
            .command_u32s(LC_LOAD_DYLIB, &[8, 0])
            .build();
        assert!(matches!(
            validate(&image),
            Err(Error::WrongRecordSize { expected: 24, actual: 16, .. })
        ));
    }

    #[test]
    fn test_fileset_entry_string() {
        let image = ImageBuilder::new64()
            .filetype(MH_FILESET)
            .string_command(LC_FILESET_ENTRY, &[0, 0, 0, 0, 32, 0], "com.apple.kernel")
            .build();
        validate(&image).unwrap();

        let image = ImageBuilder::new64()
            .filetype(MH_FILESET)
            .string_command(LC_FILESET_ENTRY, &[0, 0, 0, 0, 200, 0], "com.apple.kernel")
            .build();
        assert!(matches!(
            validate(&image),
            Err(Error::StringOffsetOverflow { offset: 200, .. })
        ));
    }

    #[test]
    fn test_unknown_commands() {
        let image = ImageBuilder::new64().command(0x7E, &[0; 8]).build();
        validate(&image).unwrap();

        let image = ImageBuilder::new64()
            .command(0x7E, &[0; 8])
            .command(0x7E | LC_REQ_DYLD, &[0; 8])
            .build();
        assert!(matches!(
            validate(&image),
            Err(Error::UnknownRequiredLoadCommand {
                index: 1,
                cmd: 0x8000_007E
            })
        ));
    }

    #[test]
    fn test_malformed_walk_is_reported() {
        let image = ImageBuilder::new64()
            .command(LC_UUID, &[0; 16])
            .command_with_size(LC_UUID, 4, &[0; 16])
            .build();
        assert!(matches!(
            validate(&image),
            Err(Error::MalformedLoadCommand {
                index: 1,
                reason: MalformedReason::TooSmall
            })
        ));
    }

    #[test]
    fn test_misaligned_command_size() {
        let image = ImageBuilder::new64()
            .command(0x7F, &[0; 5])
            .segment("__TEXT", (0, 0x1000), (0, 0x1000), 5, &[])
            .data_at(0xFFF, &[0])
            .build();
        assert!(matches!(
            validate(&image),
            Err(Error::MalformedLoadCommand {
                index: 0,
                reason: MalformedReason::Misaligned
            })
        ));
    }

    #[test]
    fn test_segment_past_end_of_file() {
        let builder = ImageBuilder::new64()
            .segment("__TEXT", (0x1_0000_0000, 0x10_0000), (0, 0x10_0000), 5, &[]);
        let image = builder.clone().build();
        let err = validate(&image).unwrap_err();
        assert!(matches!(
            &err,
            Error::SegmentOutsideFile { index: 0, end: 0x10_0000, .. }
        ));
        assert!(err.to_string().contains("__TEXT"));

        // Relocatable objects are exempt.
        let object = builder.filetype(MH_OBJECT).build();
        validate(&object).unwrap();
    }

    #[test]
    fn test_segment_offset_overflow() {
        let image = ImageBuilder::new64()
            .segment("__DATA", (0, 0x1000), (u64::MAX - 0x10, 0x1000), 3, &[])
            .build();
        assert!(matches!(
            validate(&image),
            Err(Error::SegmentOutsideFile { end: u64::MAX, .. })
        ));
    }

    #[test]
    fn test_first_violation_wins() {
        let image = ImageBuilder::new64()
            .command(LC_UUID, &[0; 8])
            .command_with_size(LC_UUID, 4, &[0; 16])
            .build();
        assert!(matches!(
            validate(&image),
            Err(Error::WrongRecordSize { index: 0, .. })
        ));
    }

    #[test]
    fn test_unsupported_file_type() {
        let image = ImageBuilder::new64().filetype(MH_CORE).build();
        assert!(matches!(
            validate(&image),
            Err(Error::UnsupportedFileType(MH_CORE))
        ));
    }
}
