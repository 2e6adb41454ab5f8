//! raw2vmdk Core Library
//!
//! This crate encodes raw (flat) disk images into the VMDK virtual-disk
//! container format consumed by virtualization hypervisors.
//!
//! # Overview
//!
//! Three layouts are produced: `monolithicSparse` (a single random-access
//! sparse extent), `streamOptimized` (a single append-only extent with
//! DEFLATE-compressed grains), and `twoGbMaxExtentSparse` (multiple sparse
//! extents plus a standalone descriptor, chosen automatically when the
//! capacity exceeds the single-file ceiling). The main entry point is
//! [`encode_raw_image`]; [`encode_from_reader`] serves non-seekable sources
//! with a declared length.
//!
//! # Modules
//!
//! - [`error`] - Error types and Result alias
//! - [`vmdk`] - Extent geometry, grains, descriptors, and the two writers
//! - [`source`] - Raw-image input (memory-mapped files, grain-sized streams)
//! - [`split`] - Extent planning for the 2 GiB-max split layout
//! - [`pipeline`] - Order-preserving parallel grain compression
//! - [`encode`] - Orchestrator coordinating a full run
//!
//! # Quick Start
//!
//! ```no_run
//! use raw2vmdk_core::{encode_raw_image, EncodeOptions, OutputFormat};
//! use raw2vmdk_core::vmdk::descriptor::{AdapterType, DiskGeometry};
//! use std::path::Path;
//!
//! let geometry = DiskGeometry::new(1024, AdapterType::Ide);
//! let options = EncodeOptions::new(OutputFormat::MonolithicSparse, geometry);
//! encode_raw_image(Path::new("disk.img"), Path::new("disk.vmdk"), &options, None).unwrap();
//! ```

pub mod encode;
pub mod error;
pub mod pipeline;
pub mod source;
pub mod split;
pub mod vmdk;

pub use error::{Error, Result};

// Re-export the main encoding surface for convenience
pub use encode::{
    encode_from_reader, encode_raw_image, EncodeOptions, EncodePhase, EncodeProgress,
    EncodeSummary, ExtentSummary, OutputFormat, ProgressCallback,
};

// Re-export descriptor and pipeline knobs used by callers
pub use pipeline::CompressionLevel;
pub use vmdk::descriptor::{AdapterType, CreateType, DiskGeometry};
