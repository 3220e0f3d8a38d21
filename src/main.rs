//! objcmeta - Objective-C and Swift class metadata extractor.
//!
//! Dump the classes, categories and Swift types of one or more Mach-O files.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use objcmeta::objc::{Endian, PointerWidth};
use objcmeta::{map_file, parse_file, ClassRecord, MachOFile, ParseOptions};

/// Objective-C and Swift class metadata extractor.
#[derive(Parser, Debug)]
#[command(name = "objcmeta")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Dump classes with their superclasses, methods and fields
    Classes {
        /// Architecture to use in universal binaries (e.g., "arm64", "armv7")
        #[arg(short, long)]
        arch: Option<String>,

        /// Skip Swift type descriptors (overrides OBJCMETA_NOSWIFT)
        #[arg(long)]
        no_swift: bool,

        /// Stop after this many classes (overrides OBJCMETA_LIMIT)
        #[arg(short, long)]
        limit: Option<usize>,

        /// Number of parallel jobs (default: number of CPUs)
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Verbosity level (0=quiet, 1=warnings, 2=info, 3=debug)
        #[arg(short, long, default_value = "1")]
        verbosity: u8,

        /// Mach-O files to parse
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// List the section table
    Sections {
        /// Architecture to use in universal binaries
        #[arg(short, long)]
        arch: Option<String>,

        /// Verbosity level (0=quiet, 1=warnings, 2=info, 3=debug)
        #[arg(short, long, default_value = "1")]
        verbosity: u8,

        /// Mach-O file
        file: PathBuf,
    },

    /// Show image information
    Info {
        /// Architecture to use in universal binaries
        #[arg(short, long)]
        arch: Option<String>,

        /// Verbosity level (0=quiet, 1=warnings, 2=info, 3=debug)
        #[arg(short, long, default_value = "1")]
        verbosity: u8,

        /// Mach-O file
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Classes {
            arch,
            no_swift,
            limit,
            jobs,
            verbosity,
            files,
        } => {
            setup_logging(verbosity);
            let mut options = ParseOptions::from_env();
            if no_swift {
                options = options.with_swift(false);
            }
            if let Some(limit) = limit {
                options = options.with_class_limit(limit);
            }
            cmd_classes(files, arch, options, jobs)
        }
        Commands::Sections {
            arch,
            verbosity,
            file,
        } => {
            setup_logging(verbosity);
            cmd_sections(&file, arch)
        }
        Commands::Info {
            arch,
            verbosity,
            file,
        } => {
            setup_logging(verbosity);
            cmd_info(&file, arch)
        }
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

fn print_classes(classes: &[ClassRecord]) {
    for class in classes {
        println!("{}\n", class);
    }
}

fn cmd_classes(
    files: Vec<PathBuf>,
    arch: Option<String>,
    options: ParseOptions,
    jobs: Option<usize>,
) -> Result<()> {
    let start = Instant::now();

    // Single file
    if let [file] = files.as_slice() {
        let classes = parse_file(file, arch.as_deref(), &options)
            .with_context(|| format!("Failed to parse: {}", file.display()))?;
        print_classes(&classes);
        info!(
            "Extracted {} classes in {:.2}s",
            classes.len(),
            start.elapsed().as_secs_f64()
        );
        return Ok(());
    }

    // Setup progress bar
    let progress = ProgressBar::new(files.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
            )?
            .progress_chars("#>-"),
    );

    // Configure thread pool
    if let Some(n) = jobs {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build_global()
            .ok();
    }

    // Parse in parallel; each file is an independent parse
    let results: Vec<_> = files
        .par_iter()
        .map(|file| {
            let result = parse_file(file, arch.as_deref(), &options);
            progress.inc(1);
            (file, result)
        })
        .collect();

    progress.finish_and_clear();

    let mut failed = 0;
    for (file, result) in &results {
        match result {
            Ok(classes) => {
                println!("# {}\n", file.display());
                print_classes(classes);
            }
            Err(e) => {
                failed += 1;
                error!("{}: {}", file.display(), e);
            }
        }
    }

    if failed > 0 {
        warn!("{} files failed to parse", failed);
    }

    info!(
        "Parsed {}/{} files in {:.2}s",
        files.len() - failed,
        files.len(),
        start.elapsed().as_secs_f64()
    );

    if failed == files.len() {
        bail!("No file could be parsed");
    }
    Ok(())
}

fn cmd_sections(file: &Path, arch: Option<String>) -> Result<()> {
    let mmap = map_file(file)?;
    let macho = MachOFile::parse(&mmap, arch.as_deref())
        .with_context(|| format!("Failed to parse: {}", file.display()))?;

    println!(
        "{:<40} {:>18} {:>10} {:>8}",
        "Section", "Address", "Offset", "Size"
    );
    for section in macho.image_sections() {
        println!(
            "{:<40} {:#018x} {:#010x} {:>8}",
            section.name,
            section.vaddr,
            section.paddr,
            format_size(section.size)
        );
    }

    Ok(())
}

fn cmd_info(file: &Path, arch: Option<String>) -> Result<()> {
    let mmap = map_file(file)?;
    let macho = MachOFile::parse(&mmap, arch.as_deref())
        .with_context(|| format!("Failed to parse: {}", file.display()))?;
    let image = macho.to_image();

    let width = match image.pointer_width() {
        PointerWidth::Bits32 => "32-bit",
        PointerWidth::Bits64 => "64-bit",
    };
    let endian = match image.endian() {
        Endian::Little => "little",
        Endian::Big => "big",
    };

    println!("Mach-O Image Information");
    println!("========================");
    println!("Path:         {}", file.display());
    println!("Architecture: {}", macho.arch_name());
    println!("Pointers:     {}", width);
    println!("Endianness:   {}", endian);
    println!("Encrypted:    {}", image.is_encrypted());
    println!("Thumb:        {}", image.is_thumb());
    println!("Base address: {:#x}", image.base_address());
    println!("Size:         {}", format_size(image.size()));
    println!("Segments:     {}", macho.segments().len());
    println!("Sections:     {}", image.sections().len());
    println!("Symbols:      {}", image.symbols().len());
    println!("Relocations:  {}", image.relocation_count());

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
