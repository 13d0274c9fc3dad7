//! machscope - inspect and validate Mach-O images, fat files and shared caches.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use machscope::dyld::uuid_to_string;
use machscope::macho::{format_version, MH_BUNDLE, MH_DYLIB, MH_DYLINKER, MH_EXECUTE, MH_OBJECT};
use machscope::{
    inspect_with_options, Binary, CacheFiles, ImageRef, ImageReport, InspectOptions,
};

/// Inspect and validate Mach-O images, fat files and dyld shared caches.
#[derive(Parser, Debug)]
#[command(name = "machscope")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (0=quiet, 1=warnings, 2=info, 3=debug)
    #[arg(short, long, global = true, default_value = "1")]
    verbosity: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show header and linkage information for every image
    Info {
        /// Select images whose architecture or install name contains this
        #[arg(short, long)]
        filter: Option<String>,

        /// Input file
        path: PathBuf,
    },

    /// Check load command structure; fails if any image is malformed
    Validate {
        /// Select images whose architecture or install name contains this
        #[arg(short, long)]
        filter: Option<String>,

        /// Input file
        path: PathBuf,
    },

    /// List segments and, optionally, their sections
    Segments {
        /// Select images whose architecture or install name contains this
        #[arg(short, long)]
        filter: Option<String>,

        /// Also list sections
        #[arg(short, long)]
        sections: bool,

        /// Input file
        path: PathBuf,
    },

    /// List imported and exported symbols
    Symbols {
        /// Select images whose architecture or install name contains this
        #[arg(short, long)]
        filter: Option<String>,

        /// Only list imports
        #[arg(short, long, conflicts_with = "exports")]
        imports: bool,

        /// Only list exports
        #[arg(short, long)]
        exports: bool,

        /// Input file
        path: PathBuf,
    },

    /// Print embedded entitlements
    Entitlements {
        /// Select images whose architecture or install name contains this
        #[arg(short, long)]
        filter: Option<String>,

        /// Input file
        path: PathBuf,
    },

    /// Print string literals from string sections
    Strings {
        /// Select images whose architecture or install name contains this
        #[arg(short, long)]
        filter: Option<String>,

        /// Show addresses
        #[arg(short = 'A', long)]
        addresses: bool,

        /// Input file
        path: PathBuf,
    },

    /// Inspect every image in a shared cache in parallel
    CacheImages {
        /// Filter images by install name
        #[arg(short, long)]
        filter: Option<String>,

        /// Number of parallel jobs (default: number of CPUs)
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Skip symbol enumeration
        #[arg(long)]
        no_symbols: bool,

        /// Path to the dyld shared cache
        cache: PathBuf,
    },

    /// List the local symbols of one shared cache image
    LocalSymbols {
        /// Path to the dyld shared cache
        cache: PathBuf,

        /// Install name of the image
        image: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbosity);

    match cli.command {
        Commands::Info { filter, path } => cmd_info(path, filter),
        Commands::Validate { filter, path } => cmd_validate(path, filter),
        Commands::Segments {
            filter,
            sections,
            path,
        } => cmd_segments(path, filter, sections),
        Commands::Symbols {
            filter,
            imports,
            exports,
            path,
        } => cmd_symbols(path, filter, !exports, !imports),
        Commands::Entitlements { filter, path } => cmd_entitlements(path, filter),
        Commands::Strings {
            filter,
            addresses,
            path,
        } => cmd_strings(path, filter, addresses),
        Commands::CacheImages {
            filter,
            jobs,
            no_symbols,
            cache,
        } => cmd_cache_images(cache, filter, jobs, no_symbols),
        Commands::LocalSymbols { cache, image } => cmd_local_symbols(cache, image),
    }
}

fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        _ => Level::DEBUG,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .finish();

    tracing::subscriber::set_global_default(subscriber).ok();
}

fn open_binary(path: &Path) -> Result<Binary> {
    let binary =
        Binary::open(path).with_context(|| format!("Failed to open: {}", path.display()))?;
    info!("Opened {} ({})", path.display(), binary.format());
    Ok(binary)
}

/// Runs `f` on every image of `binary` whose label contains `filter`.
fn for_each_image<F>(binary: &Binary, filter: Option<&str>, mut f: F) -> Result<()>
where
    F: FnMut(&ImageRef<'_>) -> Result<()>,
{
    let parsed = binary
        .parse()
        .with_context(|| format!("Failed to parse {} input", binary.format()))?;

    let images: Vec<_> = parsed
        .images()
        .into_iter()
        .filter(|image| filter.map_or(true, |f| image.label.contains(f)))
        .collect();

    if images.is_empty() {
        warn!("No images match the criteria");
        return Ok(());
    }

    let multiple = images.len() > 1;
    for image in &images {
        if multiple {
            println!("{}:", image.label);
        }
        f(image)?;
        if multiple {
            println!();
        }
    }

    Ok(())
}

fn filetype_name(filetype: u32) -> String {
    match filetype {
        MH_OBJECT => "object".to_string(),
        MH_EXECUTE => "executable".to_string(),
        MH_DYLIB => "dylib".to_string(),
        MH_DYLINKER => "dylinker".to_string(),
        MH_BUNDLE => "bundle".to_string(),
        other => format!("{:#x}", other),
    }
}

fn cmd_info(path: PathBuf, filter: Option<String>) -> Result<()> {
    let binary = open_binary(&path)?;
    println!("Format:       {}", binary.format());
    println!("Size:         {}", format_size(binary.bytes().len() as u64));
    println!();

    for_each_image(&binary, filter.as_deref(), |image| {
        let header = &image.header;
        println!("Architecture: {}", header.arch_name());
        println!("File type:    {}", filetype_name(header.filetype()));
        println!("Commands:     {} ({} bytes)", header.ncmds(), header.sizeofcmds());
        if let Some(uuid) = header.uuid() {
            println!("UUID:         {}", uuid_to_string(&uuid));
        }
        if let Some(name) = header.install_name() {
            println!("Install name: {}", name);
        }
        if let Some(build) = header.build_version() {
            println!(
                "Platform:     {} {} (SDK {})",
                build.platform_name().unwrap_or("unknown"),
                format_version(build.minos),
                format_version(build.sdk)
            );
        }

        let layout = header.file_layout();
        println!(
            "File size:    {}{}",
            format_size(layout.size),
            if layout.has_hole { " (with holes)" } else { "" }
        );

        let dylibs = header.linked_dylibs();
        if !dylibs.is_empty() {
            println!("Linked dylibs:");
            for dylib in dylibs {
                println!(
                    "  {} ({}, {})",
                    dylib.path,
                    dylib.kind,
                    format_version(dylib.current_version)
                );
            }
        }
        Ok(())
    })
}

fn cmd_validate(path: PathBuf, filter: Option<String>) -> Result<()> {
    let binary = open_binary(&path)?;
    let mut failures = 0usize;

    for_each_image(&binary, filter.as_deref(), |image| {
        match image.header.validate() {
            Ok(()) => println!("{}: ok", image.label),
            Err(e) => {
                failures += 1;
                println!("{}: {}", image.label, e);
            }
        }
        Ok(())
    })?;

    if failures > 0 {
        bail!("{} image(s) failed validation", failures);
    }
    Ok(())
}

fn cmd_segments(path: PathBuf, filter: Option<String>, sections: bool) -> Result<()> {
    let binary = open_binary(&path)?;

    for_each_image(&binary, filter.as_deref(), |image| {
        let all_sections = if sections {
            image.header.sections()
        } else {
            Vec::new()
        };

        for segment in image.header.segments() {
            let prot = format!(
                "{}{}{}",
                if segment.is_readable() { "r" } else { "-" },
                if segment.is_writable() { "w" } else { "-" },
                if segment.is_executable() { "x" } else { "-" },
            );
            println!(
                "{:<16} {:#018x} - {:#018x} ({:>8}) file {:#010x} ({:>8}) {}",
                segment.name(),
                segment.vmaddr,
                segment.vmaddr.saturating_add(segment.vmsize),
                format_size(segment.vmsize),
                segment.fileoff,
                format_size(segment.filesize),
                prot
            );

            for section in all_sections
                .iter()
                .filter(|s| s.segment_name() == segment.name())
            {
                println!(
                    "  {:<16} {:#018x} ({:>8})",
                    section.name(),
                    section.addr,
                    format_size(section.size)
                );
            }
        }
        Ok(())
    })
}

fn cmd_symbols(path: PathBuf, filter: Option<String>, imports: bool, exports: bool) -> Result<()> {
    let binary = open_binary(&path)?;

    for_each_image(&binary, filter.as_deref(), |image| {
        if imports {
            for import in image.header.imported_symbols() {
                println!(
                    "import  {}{}{}",
                    import.symbol,
                    import
                        .library
                        .as_deref()
                        .map(|lib| format!(" ({})", lib))
                        .unwrap_or_default(),
                    if import.weak { " [weak]" } else { "" }
                );
            }
        }
        if exports {
            for export in image.header.exported_symbols() {
                println!(
                    "export  {:#010x} {}{}",
                    export.address,
                    export.symbol,
                    export
                        .attributes
                        .as_deref()
                        .map(|attrs| format!(" [{}]", attrs))
                        .unwrap_or_default()
                );
            }
        }
        Ok(())
    })
}

fn cmd_entitlements(path: PathBuf, filter: Option<String>) -> Result<()> {
    let binary = open_binary(&path)?;

    for_each_image(&binary, filter.as_deref(), |image| {
        match image.header.entitlements() {
            Some(xml) => println!("{}", String::from_utf8_lossy(xml)),
            None => info!("{}: no entitlements", image.label),
        }
        Ok(())
    })
}

fn cmd_strings(path: PathBuf, filter: Option<String>, addresses: bool) -> Result<()> {
    let binary = open_binary(&path)?;

    for_each_image(&binary, filter.as_deref(), |image| {
        for string in image.header.section_strings() {
            if addresses {
                println!("{:#018x}  {}", string.addr, string.value);
            } else {
                println!("{}", string.value);
            }
        }
        Ok(())
    })
}

fn cmd_cache_images(
    path: PathBuf,
    filter: Option<String>,
    jobs: Option<usize>,
    no_symbols: bool,
) -> Result<()> {
    let start = Instant::now();
    let binary = open_binary(&path)?;
    let cache = binary
        .shared_cache()
        .with_context(|| format!("Not a shared cache: {}", path.display()))?;

    println!("{}", cache.header());

    let images: Vec<_> = cache
        .images()
        .filter(|image| {
            filter.as_deref().map_or(true, |f| {
                image.install_name().is_some_and(|name| name.contains(f))
            })
        })
        .collect();

    if images.is_empty() {
        warn!("No images match the criteria");
        return Ok(());
    }

    // Configure thread pool
    if let Some(n) = jobs {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build_global()
            .ok();
    }

    let progress = ProgressBar::new(images.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
            )
            .context("Invalid progress template")?
            .progress_chars("#>-"),
    );

    let options = InspectOptions::default()
        .with_skip_symbols(no_symbols)
        .with_skip_strings(true);

    let results: Vec<(String, Result<ImageReport, String>)> = images
        .par_iter()
        .map(|image| {
            let name = image.install_name().unwrap_or("<unnamed>").to_string();
            let result = image
                .header()
                .map(|header| inspect_with_options(&header, &name, &options))
                .map_err(|e| e.to_string());
            progress.inc(1);
            (name, result)
        })
        .collect();

    progress.finish_and_clear();

    let mut unreadable = 0usize;
    let mut invalid = 0usize;
    for (name, result) in &results {
        match result {
            Ok(report) => {
                if let Some(Err(e)) = &report.validation {
                    invalid += 1;
                    warn!("{}: {}", name, e);
                }
                println!(
                    "{:<70} {:>3} segments {:>6} imports {:>6} exports",
                    name,
                    report.segments.len(),
                    report.imports.len(),
                    report.exports.len()
                );
            }
            Err(e) => {
                unreadable += 1;
                error!("  {}: {}", name, e);
            }
        }
    }

    info!(
        "Inspected {}/{} images in {:.2}s ({} failed validation)",
        results.len() - unreadable,
        results.len(),
        start.elapsed().as_secs_f64(),
        invalid
    );

    Ok(())
}

fn cmd_local_symbols(path: PathBuf, image: String) -> Result<()> {
    let files = CacheFiles::open(&path)
        .with_context(|| format!("Failed to open cache: {}", path.display()))?;

    let symbols = files
        .local_symbols_for(&image)
        .with_context(|| format!("Failed to read local symbols of {}", image))?;

    if symbols.is_empty() {
        warn!("{} has no local symbols", image);
    }
    for symbol in symbols {
        println!("{}", symbol);
    }

    Ok(())
}

fn format_size(size: u64) -> String {
    if size >= 1024 * 1024 * 1024 {
        format!("{:.1}G", size as f64 / 1024.0 / 1024.0 / 1024.0)
    } else if size >= 1024 * 1024 {
        format!("{:.1}M", size as f64 / 1024.0 / 1024.0)
    } else if size >= 1024 {
        format!("{:.1}K", size as f64 / 1024.0)
    } else {
        format!("{}B", size)
    }
}
