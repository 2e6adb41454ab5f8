//! VMDK extent encoding.
//!
//! This module holds the on-disk format logic: geometry and header layout,
//! grain classification and compression, descriptor rendering, and the two
//! extent writers (random-access monolithic sparse and append-only
//! stream-optimized).

pub mod descriptor;
pub mod geometry;
pub mod grain;
pub mod sparse;
pub mod stream;

pub use descriptor::{
    descriptor_sectors, render_descriptor, AdapterType, CreateType, DescriptorExtent,
    DiskGeometry,
};
pub use geometry::{
    SparseExtentHeader, GD_AT_END, GRAIN_SECTORS, GRAIN_SIZE_BYTES, GT_ENTRIES_PER_GT,
    SECTOR_SIZE, VMDK_MAGIC,
};
pub use grain::{compress_grain, encode_grain, is_zero_grain, EncodedGrain};
pub use sparse::MonolithicSparseWriter;
pub use stream::{GrainMarker, Marker, MarkerType, StreamVmdkWriter};
