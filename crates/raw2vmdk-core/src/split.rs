//! Extent planning and splitting.
//!
//! A random-access disk above the single-file ceiling is partitioned into
//! sequentially named extents of at most 2047 MiB, referenced by a standalone
//! descriptor file under the primary output name. Stream-optimized disks are
//! never split.

use std::path::{Path, PathBuf};

use crate::vmdk::descriptor::CreateType;

/// Largest capacity of one extent in the split layout (2047 MiB).
pub const MAX_EXTENT_BYTES: u64 = 2047 * 1024 * 1024;

/// Largest capacity of a single monolithic extent file (4095 MiB).
pub const MAX_MONOLITHIC_BYTES: u64 = 4095 * 1024 * 1024;

/// One planned extent file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedExtent {
    /// Output path of the extent file.
    pub path: PathBuf,
    /// Extent capacity in bytes (sector-aligned).
    pub size_bytes: u64,
}

/// The layout plan for one encoding run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtentPlan {
    /// createType of the resulting disk.
    pub create_type: CreateType,
    /// Extent files in virtual-address order.
    pub extents: Vec<PlannedExtent>,
    /// Standalone descriptor file, present only for the split layout.
    pub descriptor_path: Option<PathBuf>,
}

impl ExtentPlan {
    /// Total planned capacity in bytes.
    pub fn capacity_bytes(&self) -> u64 {
        self.extents.iter().map(|e| e.size_bytes).sum()
    }
}

/// Partition `capacity_bytes` (sector-aligned) into extents under `output`.
///
/// Stream-optimized output is always a single extent. Random-access output
/// stays monolithic up to 4095 MiB; beyond that the disk is split into
/// extents of at most 2047 MiB each, consumed greedily, and the primary
/// output name becomes the descriptor file.
pub fn plan_extents(output: &Path, capacity_bytes: u64, stream_optimized: bool) -> ExtentPlan {
    if stream_optimized {
        return ExtentPlan {
            create_type: CreateType::StreamOptimized,
            extents: vec![PlannedExtent {
                path: output.to_path_buf(),
                size_bytes: capacity_bytes,
            }],
            descriptor_path: None,
        };
    }

    if capacity_bytes <= MAX_MONOLITHIC_BYTES {
        return ExtentPlan {
            create_type: CreateType::MonolithicSparse,
            extents: vec![PlannedExtent {
                path: output.to_path_buf(),
                size_bytes: capacity_bytes,
            }],
            descriptor_path: None,
        };
    }

    let count = capacity_bytes.div_ceil(MAX_EXTENT_BYTES);
    let mut extents = Vec::with_capacity(count as usize);
    let mut remaining = capacity_bytes;
    for i in 1..=count {
        let size = remaining.min(MAX_EXTENT_BYTES);
        extents.push(PlannedExtent {
            path: extent_file_name(output, i as usize),
            size_bytes: size,
        });
        remaining -= size;
    }

    ExtentPlan {
        create_type: CreateType::TwoGbMaxExtentSparse,
        extents,
        descriptor_path: Some(output.to_path_buf()),
    }
}

/// Derive the name of extent `index` (1-based) from the primary output name.
///
/// The `-sNNN` suffix is inserted before the final extension, or appended
/// when there is none: `disk.vmdk` -> `disk-s001.vmdk`, `disk` -> `disk-s001`.
fn extent_file_name(output: &Path, index: usize) -> PathBuf {
    let suffix = format!("-s{:03}", index);
    match (output.file_stem(), output.extension()) {
        (Some(stem), Some(ext)) => {
            let mut name = stem.to_os_string();
            name.push(suffix);
            name.push(".");
            name.push(ext);
            output.with_file_name(name)
        }
        _ => {
            let mut name = output.as_os_str().to_os_string();
            name.push(suffix);
            PathBuf::from(name)
        }
    }
}
