//! raw2vmdk CLI - Encode raw disk images as VMware VMDK virtual disks.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use raw2vmdk_core::{
    encode_from_reader, encode_raw_image, AdapterType, CompressionLevel, DiskGeometry,
    EncodeOptions, EncodeProgress, EncodeSummary, OutputFormat,
};

/// Encode a RAW disk image as a VMware VMDK virtual disk.
#[derive(Parser)]
#[command(name = "raw2vmdk")]
#[command(version, about, long_about = None)]
struct Cli {
    /// RAW disk image, or - for standard input.
    input: PathBuf,

    /// Output VMDK path.
    output: PathBuf,

    /// Number of cylinders in the input image.
    #[arg(short = 'C', long)]
    cylinders: u32,

    /// Number of heads in the input image.
    #[arg(short = 'H', long, default_value_t = 16)]
    heads: u32,

    /// Number of sectors per track in the input image.
    #[arg(short = 'S', long, default_value_t = 63)]
    sectors: u32,

    /// Disk adapter type.
    #[arg(short = 'A', long, value_enum, default_value = "ide")]
    adapter: AdapterArg,

    /// Size of the input image in bytes (required when reading standard input).
    #[arg(short = 'l', long)]
    length: Option<u64>,

    /// Write a streamOptimized extent instead of monolithicSparse.
    #[arg(short = 's', long)]
    stream: bool,

    /// Compression level for streamOptimized grains.
    #[arg(long, value_enum, default_value = "fast")]
    compression: CompressionArg,

    /// Number of compression threads (0 = auto-detect).
    #[arg(short = 't', long, default_value_t = 0)]
    threads: usize,

    /// Suppress progress output.
    #[arg(short, long)]
    quiet: bool,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

/// Adapter type argument mapping.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum AdapterArg {
    Ide,
    Buslogic,
    Lsilogic,
}

impl From<AdapterArg> for AdapterType {
    fn from(arg: AdapterArg) -> Self {
        match arg {
            AdapterArg::Ide => AdapterType::Ide,
            AdapterArg::Buslogic => AdapterType::Buslogic,
            AdapterArg::Lsilogic => AdapterType::Lsilogic,
        }
    }
}

/// Compression level argument mapping.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CompressionArg {
    /// Fast compression (zlib level 1).
    Fast,
    /// Balanced compression (zlib level 6).
    Balanced,
    /// Maximum compression (zlib level 9).
    Max,
}

impl From<CompressionArg> for CompressionLevel {
    fn from(arg: CompressionArg) -> Self {
        match arg {
            CompressionArg::Fast => CompressionLevel::Fast,
            CompressionArg::Balanced => CompressionLevel::Balanced,
            CompressionArg::Max => CompressionLevel::Max,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let mut geometry = DiskGeometry::new(cli.cylinders, cli.adapter.into());
    geometry.heads = cli.heads;
    geometry.sectors = cli.sectors;

    let format = if cli.stream {
        OutputFormat::StreamOptimized
    } else {
        OutputFormat::MonolithicSparse
    };

    let mut options = EncodeOptions::new(format, geometry);
    options.compression = cli.compression.into();
    options.declared_size = cli.length;
    options.num_threads = cli.threads;

    let from_stdin = cli.input == Path::new("-");

    // Progress bar needs a known total; stdin runs take it from -l.
    let total_bytes = if from_stdin {
        cli.length
    } else {
        cli.length
            .or_else(|| std::fs::metadata(&cli.input).map(|m| m.len()).ok())
    };

    let progress_bar: Option<Arc<Mutex<ProgressBar>>> = match (cli.quiet, total_bytes) {
        (false, Some(total)) => {
            let pb = ProgressBar::new(total);
            let style = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")?
                .progress_chars("#>-");
            pb.set_style(style);
            Some(Arc::new(Mutex::new(pb)))
        }
        _ => None,
    };

    let callback: Option<raw2vmdk_core::ProgressCallback> =
        progress_bar.clone().map(|pb_arc| {
            Box::new(move |progress: EncodeProgress| {
                let pb = pb_arc.lock().unwrap();
                pb.set_position(progress.bytes_processed);
                if progress.total_extents > 1 {
                    pb.set_message(format!(
                        "extent {}/{}",
                        progress.current_extent, progress.total_extents
                    ));
                }
            }) as raw2vmdk_core::ProgressCallback
        });

    let summary = if from_stdin {
        let Some(length) = cli.length else {
            bail!("-l/--length is required when reading standard input");
        };
        let stdin = io::stdin();
        encode_from_reader(stdin.lock(), length, &cli.output, &options, callback)
            .context("encoding from standard input failed")?
    } else {
        encode_raw_image(&cli.input, &cli.output, &options, callback)
            .with_context(|| format!("encoding '{}' failed", cli.input.display()))?
    };

    if let Some(pb_arc) = progress_bar {
        let pb = pb_arc.lock().unwrap();
        pb.finish_with_message("Complete!");
    }

    if !cli.quiet {
        print_summary(&summary);
    }

    Ok(())
}

fn print_summary(summary: &EncodeSummary) {
    println!();
    println!("Created {} disk:", summary.create_type);
    for extent in &summary.extents {
        println!(
            "  {} - {} ({} grains allocated)",
            extent.path.display(),
            format_bytes(extent.written_bytes),
            extent.allocated_grains
        );
    }
    if let Some(descriptor) = &summary.descriptor_path {
        println!("  {} - descriptor", descriptor.display());
    }
    if summary.capacity_bytes > 0 {
        println!(
            "Capacity: {} ({:.1}% stored)",
            format_bytes(summary.capacity_bytes),
            (summary.written_bytes() as f64 / summary.capacity_bytes as f64) * 100.0
        );
    }
}

/// Format bytes as human-readable string.
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
