//! Per-image inspection reports.
//!
//! A report gathers what the discovery traversals find in one image, plus
//! the strict validation result. Images of a fat container or shared cache
//! are inspected in parallel on the global rayon pool; all views are
//! read-only, so no locking is involved.

use rayon::prelude::*;
use tracing::debug;

use crate::error::Result;
use crate::format::Binary;
use crate::macho::{BuildVersion, FileLayout, SectionString, SegmentInfo, ThinHeaderView};
use crate::symbols::{ExportedSymbol, ImportedSymbol};

/// Options for building reports.
#[derive(Debug, Clone, Default)]
pub struct InspectOptions {
    /// Skip strict structural validation
    pub skip_validation: bool,
    /// Skip import and export enumeration
    pub skip_symbols: bool,
    /// Skip entitlement extraction
    pub skip_entitlements: bool,
    /// Skip section string extraction
    pub skip_strings: bool,
}

impl InspectOptions {
    /// Sets whether validation is skipped.
    pub fn with_skip_validation(mut self, skip: bool) -> Self {
        self.skip_validation = skip;
        self
    }

    /// Sets whether symbol enumeration is skipped.
    pub fn with_skip_symbols(mut self, skip: bool) -> Self {
        self.skip_symbols = skip;
        self
    }

    /// Sets whether entitlement extraction is skipped.
    pub fn with_skip_entitlements(mut self, skip: bool) -> Self {
        self.skip_entitlements = skip;
        self
    }

    /// Sets whether string extraction is skipped.
    pub fn with_skip_strings(mut self, skip: bool) -> Self {
        self.skip_strings = skip;
        self
    }
}

/// Everything found in one image.
#[derive(Debug)]
pub struct ImageReport {
    /// Architecture name for thin and fat inputs, install name for caches
    pub label: String,
    /// Architecture name
    pub arch: String,
    /// Mach-O file type
    pub filetype: u32,
    /// Number of load commands
    pub ncmds: u32,
    /// Image UUID
    pub uuid: Option<[u8; 16]>,
    /// `LC_ID_DYLIB` install name
    pub install_name: Option<String>,
    /// Minimum OS and SDK
    pub build_version: Option<BuildVersion>,
    /// Strict validation result; `None` when skipped
    pub validation: Option<Result<()>>,
    /// Segments in load command order
    pub segments: Vec<SegmentInfo>,
    /// Inferred file size
    pub file_layout: FileLayout,
    /// Paths of linked dylibs
    pub linked_dylibs: Vec<String>,
    /// Imported symbols
    pub imports: Vec<ImportedSymbol>,
    /// Exported symbols
    pub exports: Vec<ExportedSymbol>,
    /// XML entitlements
    pub entitlements: Option<Vec<u8>>,
    /// Strings from string sections
    pub strings: Vec<SectionString>,
}

impl ImageReport {
    /// Returns true if validation ran and passed.
    pub fn is_valid(&self) -> bool {
        matches!(self.validation, Some(Ok(())))
    }
}

/// Builds a report for one image with default options.
pub fn inspect(header: &ThinHeaderView<'_>, label: &str) -> ImageReport {
    inspect_with_options(header, label, &InspectOptions::default())
}

/// Builds a report for one image.
pub fn inspect_with_options(
    header: &ThinHeaderView<'_>,
    label: &str,
    options: &InspectOptions,
) -> ImageReport {
    debug!("Inspecting {} ({} commands)", label, header.ncmds());

    let (imports, exports) = if options.skip_symbols {
        (Vec::new(), Vec::new())
    } else {
        (header.imported_symbols(), header.exported_symbols())
    };

    ImageReport {
        label: label.to_string(),
        arch: header.arch_name(),
        filetype: header.filetype(),
        ncmds: header.ncmds(),
        uuid: header.uuid(),
        install_name: header.install_name().map(str::to_string),
        build_version: header.build_version(),
        validation: (!options.skip_validation).then(|| header.validate()),
        segments: header.segments(),
        file_layout: header.file_layout(),
        linked_dylibs: header
            .linked_dylibs()
            .iter()
            .map(|dylib| dylib.path.to_string())
            .collect(),
        imports,
        exports,
        entitlements: if options.skip_entitlements {
            None
        } else {
            header.entitlements().map(<[u8]>::to_vec)
        },
        strings: if options.skip_strings {
            Vec::new()
        } else {
            header.section_strings()
        },
    }
}

/// Parses `binary` and builds a report for every image it contains.
pub fn inspect_binary(binary: &Binary, options: &InspectOptions) -> Result<Vec<ImageReport>> {
    let parsed = binary.parse()?;
    let images = parsed.images();
    debug!("Inspecting {} images", images.len());

    Ok(images
        .par_iter()
        .map(|image| inspect_with_options(&image.header, &image.label, options))
        .collect())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::Error;
    use crate::macho::*;
    use crate::region::ByteRegion;
    use crate::testutil::{build_fat, CacheBuilder, ImageBuilder};

    fn dylib() -> Vec<u8> {
        ImageBuilder::new64()
            .filetype(MH_DYLIB)
            .dylib(LC_ID_DYLIB, "/usr/lib/libexample.dylib")
            .dylib(LC_LOAD_DYLIB, "/usr/lib/libSystem.B.dylib")
            .command(LC_UUID, &[5; 16])
            .build()
    }

    #[test]
    fn test_report_fields() {
        let data = dylib();
        let header = ThinHeaderView::parse(&data).unwrap();
        let report = inspect(&header, "arm64");

        assert_eq!(report.arch, "arm64");
        assert_eq!(report.filetype, MH_DYLIB);
        assert_eq!(report.ncmds, 3);
        assert_eq!(report.uuid, Some([5; 16]));
        assert_eq!(report.install_name.as_deref(), Some("/usr/lib/libexample.dylib"));
        assert_eq!(report.linked_dylibs, ["/usr/lib/libSystem.B.dylib"]);
        assert!(report.is_valid());
        assert!(report.entitlements.is_none());
    }

    #[test]
    fn test_skip_options() {
        let data = dylib();
        let header = ThinHeaderView::parse(&data).unwrap();
        let options = InspectOptions::default()
            .with_skip_validation(true)
            .with_skip_symbols(true)
            .with_skip_entitlements(true)
            .with_skip_strings(true);
        let report = inspect_with_options(&header, "x", &options);
        assert!(report.validation.is_none());
        assert!(!report.is_valid());
    }

    #[test]
    fn test_validation_failure_is_reported() {
        let data = ImageBuilder::new64().command_with_size(LC_UUID, 16, &[0; 8]).build();
        let header = ThinHeaderView::parse(&data).unwrap();
        let report = inspect(&header, "bad");
        assert!(matches!(
            report.validation,
            Some(Err(Error::WrongRecordSize { index: 0, .. }))
        ));
    }

    #[test]
    fn test_inspect_fat_and_cache() {
        let x86 = ImageBuilder::new64()
            .cpu(CPU_TYPE_X86_64, CPU_SUBTYPE_X86_64_ALL)
            .build();
        let fat = Binary::from_vec(build_fat(&[x86, dylib()]));
        let reports = inspect_binary(&fat, &InspectOptions::default()).unwrap();
        let labels: Vec<_> = reports.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, ["x86_64", "arm64"]);

        let cache = Binary::from_vec(
            CacheBuilder::new("arm64")
                .image("/usr/lib/liba.dylib")
                .image("/usr/lib/libb.dylib")
                .build(),
        );
        let reports = inspect_binary(&cache, &InspectOptions::default()).unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[1].label, "/usr/lib/libb.dylib");
        assert_eq!(reports[1].install_name.as_deref(), Some("/usr/lib/libb.dylib"));
    }

    #[test]
    fn test_concurrent_inspection_of_one_region() {
        let data = ImageBuilder::new64()
            .segment("__TEXT", (0x1_0000_0000, 0x4000), (0, 0x4000), VM_PROT_READ | VM_PROT_EXECUTE, &[])
            .segment("__LINKEDIT", (0x1_0000_4000, 0x4000), (0x4000, 0x100), VM_PROT_READ, &[])
            .data_at(0x40FF, &[0])
            .build();
        let region = Arc::new(ByteRegion::from_vec(data));
        let expected = {
            let header = ThinHeaderView::parse(&region).unwrap();
            inspect(&header, "main").segments
        };

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let region = Arc::clone(&region);
                    scope.spawn(move || {
                        let header = ThinHeaderView::parse(&region).unwrap();
                        let report = inspect(&header, "main");
                        assert!(report.is_valid());
                        report.segments
                    })
                })
                .collect();
            for handle in handles {
                assert_eq!(handle.join().unwrap(), expected);
            }
        });

        assert_eq!(expected.len(), 2);
        assert_eq!(Arc::strong_count(&region), 1);
    }
}
