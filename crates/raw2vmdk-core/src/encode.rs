//! Encoding orchestrator.
//!
//! This module coordinates a full raw-to-VMDK run:
//! 1. Determine the input length and round it up to a sector-aligned capacity
//! 2. Plan the extent layout (single file or split, per the format)
//! 3. Render the descriptor and measure it
//! 4. Drive the selected writer over each extent's slice of the input
//!
//! Multi-extent creation is atomic: when any extent fails, every output file
//! created so far is removed and the whole run reports the error.
//!
//! # Example
//!
//! ```no_run
//! use raw2vmdk_core::encode::{encode_raw_image, EncodeOptions, OutputFormat};
//! use raw2vmdk_core::vmdk::descriptor::{AdapterType, DiskGeometry};
//! use std::path::Path;
//!
//! let geometry = DiskGeometry::new(1024, AdapterType::Ide);
//! let options = EncodeOptions::new(OutputFormat::MonolithicSparse, geometry);
//! encode_raw_image(Path::new("disk.img"), Path::new("disk.vmdk"), &options, None).unwrap();
//! ```

use std::fs::{self, File};
use std::io::{BufWriter, Read};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::pipeline::{CompressionLevel, Pipeline, PipelineConfig};
use crate::source::{GrainReader, RawImageReader};
use crate::split::{plan_extents, ExtentPlan, PlannedExtent};
use crate::vmdk::descriptor::{
    descriptor_sectors, render_descriptor, CreateType, DescriptorExtent, DiskGeometry,
};
use crate::vmdk::geometry::{
    round_up, SparseExtentHeader, GRAIN_SIZE_BYTES, GT_ENTRIES_PER_GT, SECTOR_SIZE,
};
use crate::vmdk::sparse::MonolithicSparseWriter;
use crate::vmdk::stream::StreamVmdkWriter;

/// Progress is reported after this many grains (8 MiB of input).
const PROGRESS_GRAIN_INTERVAL: u64 = 128;

/// The output layout family requested by the caller.
///
/// The split layout is not selected directly; a monolithic request above the
/// single-file ceiling becomes twoGbMaxExtentSparse during planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Random-access sparse extent(s).
    #[default]
    MonolithicSparse,
    /// Append-only compressed extent.
    StreamOptimized,
}

/// Options for an encoding run.
///
/// Explicit configuration threaded through every component; nothing here is
/// process-global.
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    /// Output layout family.
    pub format: OutputFormat,
    /// Compression level for stream-optimized grains.
    pub compression: CompressionLevel,
    /// CHS geometry and adapter for the descriptor.
    pub geometry: DiskGeometry,
    /// Input length override in bytes. Required for non-seekable sources;
    /// for files it may select a prefix of the image.
    pub declared_size: Option<u64>,
    /// Worker threads for grain compression (0 = auto).
    pub num_threads: usize,
}

impl EncodeOptions {
    /// Create options with default compression and threading.
    pub fn new(format: OutputFormat, geometry: DiskGeometry) -> Self {
        Self {
            format,
            compression: CompressionLevel::default(),
            geometry,
            declared_size: None,
            num_threads: 0,
        }
    }
}

/// Phase of the encoding process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodePhase {
    /// Planning extents and rendering the descriptor.
    Planning,
    /// Writing grain data.
    Writing,
    /// Flushing tables, directories, and footers.
    Finalizing,
    /// Run complete.
    Complete,
}

impl std::fmt::Display for EncodePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodePhase::Planning => write!(f, "Planning"),
            EncodePhase::Writing => write!(f, "Writing"),
            EncodePhase::Finalizing => write!(f, "Finalizing"),
            EncodePhase::Complete => write!(f, "Complete"),
        }
    }
}

/// Progress information for an encoding run.
#[derive(Debug, Clone)]
pub struct EncodeProgress {
    /// Current phase.
    pub phase: EncodePhase,
    /// Input bytes consumed so far.
    pub bytes_processed: u64,
    /// Total capacity being encoded.
    pub bytes_total: u64,
    /// Current extent (1-indexed).
    pub current_extent: usize,
    /// Total number of extents.
    pub total_extents: usize,
}

impl EncodeProgress {
    /// Create progress information at the start of a run.
    pub fn new(phase: EncodePhase, bytes_total: u64, total_extents: usize) -> Self {
        Self {
            phase,
            bytes_processed: 0,
            bytes_total,
            current_extent: 0,
            total_extents,
        }
    }

    /// Overall percentage complete.
    pub fn percent_complete(&self) -> f64 {
        if self.bytes_total == 0 {
            return match self.phase {
                EncodePhase::Complete => 100.0,
                _ => 0.0,
            };
        }
        (self.bytes_processed as f64 / self.bytes_total as f64) * 100.0
    }
}

/// Type alias for the progress callback function.
pub type ProgressCallback = Box<dyn Fn(EncodeProgress) + Send>;

/// Result of encoding one extent.
#[derive(Debug, Clone)]
pub struct ExtentSummary {
    /// Path of the extent file.
    pub path: PathBuf,
    /// Virtual capacity of the extent in bytes.
    pub capacity_bytes: u64,
    /// Physical size of the extent file in bytes.
    pub written_bytes: u64,
    /// Non-zero grains stored in the extent.
    pub allocated_grains: u64,
}

/// Result of a whole encoding run.
#[derive(Debug, Clone)]
pub struct EncodeSummary {
    /// createType of the produced disk.
    pub create_type: CreateType,
    /// Total virtual capacity in bytes.
    pub capacity_bytes: u64,
    /// Per-extent results, in order.
    pub extents: Vec<ExtentSummary>,
    /// Standalone descriptor file, for the split layout.
    pub descriptor_path: Option<PathBuf>,
}

impl EncodeSummary {
    /// Total physical bytes written across all extents.
    pub fn written_bytes(&self) -> u64 {
        self.extents.iter().map(|e| e.written_bytes).sum()
    }
}

/// Encode a raw image file into a VMDK disk.
///
/// The capacity is taken from the file size, or from
/// [`EncodeOptions::declared_size`] when set (which must not exceed the file
/// size).
pub fn encode_raw_image(
    input: &Path,
    output: &Path,
    options: &EncodeOptions,
    progress_callback: Option<ProgressCallback>,
) -> Result<EncodeSummary> {
    let reader = RawImageReader::open(input)?;
    let input_len = match options.declared_size {
        Some(declared) if declared > reader.size() => {
            return Err(Error::input(format!(
                "declared length of {} bytes exceeds the {}-byte input image",
                declared,
                reader.size()
            )));
        }
        Some(declared) => declared,
        None => reader.size(),
    };
    info!(path = %input.display(), bytes = input_len, "encoding raw image");
    encode_from_reader(reader.data(), input_len, output, options, progress_callback)
}

/// Encode a raw image from any byte stream of declared length.
///
/// This is the stdin entry point; the stream must deliver exactly
/// `input_len` bytes.
pub fn encode_from_reader<R: Read>(
    input: R,
    input_len: u64,
    output: &Path,
    options: &EncodeOptions,
    progress_callback: Option<ProgressCallback>,
) -> Result<EncodeSummary> {
    let capacity = round_up(input_len, SECTOR_SIZE);
    let stream = options.format == OutputFormat::StreamOptimized;
    let plan = plan_extents(output, capacity, stream);

    let mut created: Vec<PathBuf> = Vec::new();
    let result = run_plan(
        input,
        input_len,
        &plan,
        options,
        &progress_callback,
        &mut created,
    );

    if result.is_err() {
        // Atomic multi-extent creation: no partial output survives a failure.
        for path in &created {
            if let Err(e) = fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "failed to remove partial output");
            }
        }
    }
    result
}

fn run_plan<R: Read>(
    input: R,
    input_len: u64,
    plan: &ExtentPlan,
    options: &EncodeOptions,
    progress_callback: &Option<ProgressCallback>,
    created: &mut Vec<PathBuf>,
) -> Result<EncodeSummary> {
    let report = |progress: EncodeProgress| {
        if let Some(callback) = progress_callback {
            callback(progress);
        }
    };

    let capacity = plan.capacity_bytes();
    let mut progress = EncodeProgress::new(EncodePhase::Planning, capacity, plan.extents.len());
    report(progress.clone());

    let descriptor_extents = plan
        .extents
        .iter()
        .map(|e| DescriptorExtent::new(&e.path, e.size_bytes))
        .collect::<Result<Vec<_>>>()?;
    let descriptor = render_descriptor(plan.create_type, &descriptor_extents, &options.geometry);

    if let Some(descriptor_path) = &plan.descriptor_path {
        fs::write(descriptor_path, &descriptor).map_err(|e| Error::io(e, descriptor_path))?;
        created.push(descriptor_path.clone());
        info!(path = %descriptor_path.display(), "wrote split descriptor");
    }

    let pipeline = Pipeline::new(PipelineConfig::new(options.compression, options.num_threads))?;
    let mut grains = GrainReader::new(input, input_len);

    // Split extents carry no embedded descriptor; the standalone file owns it.
    let embedded = if plan.descriptor_path.is_none() {
        Some(descriptor.as_str())
    } else {
        None
    };

    progress.phase = EncodePhase::Writing;
    let mut extents = Vec::with_capacity(plan.extents.len());
    for (index, extent) in plan.extents.iter().enumerate() {
        progress.current_extent = index + 1;
        report(progress.clone());

        let file = File::create(&extent.path).map_err(|e| Error::io(e, &extent.path))?;
        created.push(extent.path.clone());

        let consumed_before = progress.bytes_processed;
        let summary = match plan.create_type {
            CreateType::StreamOptimized => write_stream_extent(
                file,
                &mut grains,
                extent,
                embedded.unwrap_or_default(),
                &pipeline,
                &mut progress,
                &report,
            )?,
            _ => write_sparse_extent(
                file,
                &mut grains,
                extent,
                embedded,
                &mut progress,
                &report,
            )?,
        };
        progress.bytes_processed = (consumed_before + extent.size_bytes).min(capacity);
        info!(
            path = %summary.path.display(),
            allocated = summary.allocated_grains,
            bytes = summary.written_bytes,
            "extent complete"
        );
        extents.push(summary);
    }

    progress.phase = EncodePhase::Complete;
    progress.bytes_processed = capacity;
    report(progress);

    Ok(EncodeSummary {
        create_type: plan.create_type,
        capacity_bytes: capacity,
        extents,
        descriptor_path: plan.descriptor_path.clone(),
    })
}

fn write_sparse_extent<R: Read>(
    file: File,
    grains: &mut GrainReader<R>,
    extent: &PlannedExtent,
    descriptor: Option<&str>,
    progress: &mut EncodeProgress,
    report: &impl Fn(EncodeProgress),
) -> Result<ExtentSummary> {
    let descriptor_size = descriptor.map(descriptor_sectors).unwrap_or(0);
    let header = SparseExtentHeader::monolithic(extent.size_bytes, descriptor_size);
    let mut writer = MonolithicSparseWriter::new(BufWriter::new(file), header, descriptor)?;

    let num_grains = extent.size_bytes.div_ceil(GRAIN_SIZE_BYTES);
    let mut buf = vec![0u8; GRAIN_SIZE_BYTES as usize];
    for i in 0..num_grains {
        grains.read_grain(&mut buf)?;
        writer.write_grain(&buf)?;
        if (i + 1) % PROGRESS_GRAIN_INTERVAL == 0 {
            progress.bytes_processed = (progress.bytes_processed
                + PROGRESS_GRAIN_INTERVAL * GRAIN_SIZE_BYTES)
                .min(progress.bytes_total);
            report(progress.clone());
        }
    }
    let allocated = writer.allocated_grains();
    progress.phase = EncodePhase::Finalizing;
    report(progress.clone());
    writer.finish()?;
    progress.phase = EncodePhase::Writing;

    let written = fs::metadata(&extent.path)
        .map_err(|e| Error::io(e, &extent.path))?
        .len();
    Ok(ExtentSummary {
        path: extent.path.clone(),
        capacity_bytes: extent.size_bytes,
        written_bytes: written,
        allocated_grains: allocated,
    })
}

fn write_stream_extent<R: Read>(
    file: File,
    grains: &mut GrainReader<R>,
    extent: &PlannedExtent,
    descriptor: &str,
    pipeline: &Pipeline,
    progress: &mut EncodeProgress,
    report: &impl Fn(EncodeProgress),
) -> Result<ExtentSummary> {
    let header =
        SparseExtentHeader::stream_optimized(extent.size_bytes, descriptor_sectors(descriptor));
    let mut writer = StreamVmdkWriter::new(
        BufWriter::new(file),
        header,
        descriptor,
        pipeline.compression_level(),
    )?;

    let num_grains = extent.size_bytes.div_ceil(GRAIN_SIZE_BYTES);
    let mut remaining = num_grains;
    let mut batch = Vec::with_capacity(GT_ENTRIES_PER_GT as usize);
    while remaining > 0 {
        let batch_len = remaining.min(GT_ENTRIES_PER_GT);
        batch.clear();
        for _ in 0..batch_len {
            let mut buf = vec![0u8; GRAIN_SIZE_BYTES as usize];
            grains.read_grain(&mut buf)?;
            batch.push(buf);
        }
        for grain in pipeline.encode_batch(&batch)? {
            writer.append(grain)?;
        }
        remaining -= batch_len;
        progress.bytes_processed = (progress.bytes_processed + batch_len * GRAIN_SIZE_BYTES)
            .min(progress.bytes_total);
        report(progress.clone());
    }

    let allocated = writer.allocated_grains();
    progress.phase = EncodePhase::Finalizing;
    report(progress.clone());
    writer.finish()?;
    progress.phase = EncodePhase::Writing;

    let written = fs::metadata(&extent.path)
        .map_err(|e| Error::io(e, &extent.path))?
        .len();
    Ok(ExtentSummary {
        path: extent.path.clone(),
        capacity_bytes: extent.size_bytes,
        written_bytes: written,
        allocated_grains: allocated,
    })
}
