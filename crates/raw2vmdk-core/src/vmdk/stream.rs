//! StreamOptimized VMDK writer.
//!
//! Produces an append-only extent: DEFLATE-compressed grains interleaved with
//! grain-table flush records, followed by the grain directory, a footer copy
//! of the header, and an end-of-stream marker. Offsets are not known until
//! write time, so every payload is preceded by a self-describing marker and
//! the directory is relocated to the end of the stream.

use std::io::Write;

use tracing::debug;

use crate::error::{Error, Result};
use crate::vmdk::geometry::{
    gd_entry_count, num_grain_tables, SparseExtentHeader, GD_AT_END, GRAIN_SECTORS,
    GRAIN_SIZE_BYTES, GT_ENTRIES_PER_GT, GT_SECTORS, SECTOR_SIZE,
};
use crate::vmdk::grain::{compress_grain, is_zero_grain, EncodedGrain};

/// Marker types used in streamOptimized VMDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MarkerType {
    /// End of stream marker (all-zero record).
    EndOfStream = 0,
    /// Grain table marker.
    GrainTable = 1,
    /// Grain directory marker.
    GrainDirectory = 2,
    /// Footer marker.
    Footer = 3,
}

/// A 512-byte metadata marker preceding a grain table, grain directory,
/// footer, or end-of-stream payload.
#[derive(Debug, Clone)]
pub struct Marker {
    /// Sectors occupied by the payload that follows, excluding the marker.
    pub num_sectors: u64,
    /// Marker type.
    pub marker_type: MarkerType,
}

impl Marker {
    /// Creates a new marker.
    pub fn new(marker_type: MarkerType, num_sectors: u64) -> Self {
        Self {
            num_sectors,
            marker_type,
        }
    }

    /// Serializes the marker to 512 bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; SECTOR_SIZE as usize];
        buf[0..8].copy_from_slice(&self.num_sectors.to_le_bytes());
        // size field at offset 8 stays 0 for metadata markers.
        buf[12..16].copy_from_slice(&(self.marker_type as u32).to_le_bytes());
        buf
    }
}

/// The 12-byte prelude before each compressed grain.
#[derive(Debug, Clone)]
pub struct GrainMarker {
    /// Logical block address of the grain, in sectors.
    pub lba: u64,
    /// Size of the compressed grain data in bytes.
    pub size: u32,
}

impl GrainMarker {
    /// Creates a new grain marker.
    pub fn new(lba: u64, size: u32) -> Self {
        Self { lba, size }
    }

    /// Serializes the grain marker to 12 bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; 12];
        buf[0..8].copy_from_slice(&self.lba.to_le_bytes());
        buf[8..12].copy_from_slice(&self.size.to_le_bytes());
        buf
    }
}

/// A writer for creating streamOptimized VMDK extents.
///
/// Grains are appended in virtual-address order. After every 512-grain batch
/// that allocated at least one grain, the grain table is flushed into the
/// stream; `finish` emits the grain directory, footer, and end-of-stream
/// marker. The writer never seeks: the one header field that depends on
/// final layout (the grain directory offset) is patched in the in-memory
/// header and written with the footer.
///
/// # Example
///
/// ```no_run
/// use raw2vmdk_core::vmdk::geometry::SparseExtentHeader;
/// use raw2vmdk_core::vmdk::stream::StreamVmdkWriter;
/// use std::fs::File;
///
/// let capacity = 10 * 1024 * 1024;
/// let header = SparseExtentHeader::stream_optimized(capacity, 1);
/// let file = File::create("output.vmdk").unwrap();
/// let mut writer = StreamVmdkWriter::new(file, header, "# descriptor", 1).unwrap();
///
/// let grain = vec![0xABu8; 64 * 1024];
/// for _ in 0..160 {
///     writer.write_grain(&grain).unwrap();
/// }
/// let _file = writer.finish().unwrap();
/// ```
pub struct StreamVmdkWriter<W: Write> {
    writer: W,
    header: SparseExtentHeader,
    /// Compression level for grain payloads.
    level: u32,
    /// Current position in the stream, in bytes. Always sector-aligned
    /// between grains.
    pos: u64,
    /// Next grain to be appended, in virtual order.
    grain_index: u64,
    /// Total grains covering the extent capacity.
    num_grains: u64,
    /// In-progress grain table for the current 512-grain batch.
    gt: Vec<u32>,
    /// Index of the batch `gt` belongs to.
    gt_index: usize,
    /// Grain directory, one slot per grain table.
    gd: Vec<u32>,
    /// Running count of allocated (non-zero) grains.
    allocated: u64,
}

impl<W: Write> StreamVmdkWriter<W> {
    /// Creates a new writer, emitting the header and embedded descriptor.
    ///
    /// The header must come from [`SparseExtentHeader::stream_optimized`];
    /// the descriptor text must fit the declared descriptor size. Everything
    /// up to the first grain boundary (64 KiB) is zero-padded so the data
    /// region starts on a full grain.
    pub fn new(mut writer: W, header: SparseExtentHeader, descriptor: &str, level: u32) -> Result<Self> {
        if header.gd_offset != GD_AT_END {
            return Err(Error::vmdk(
                "stream writer requires a header with the directory-at-end sentinel",
            ));
        }
        let descriptor_bytes = descriptor.as_bytes();
        if (descriptor_bytes.len() as u64).div_ceil(SECTOR_SIZE) > header.descriptor_size {
            return Err(Error::vmdk(format!(
                "descriptor of {} bytes exceeds the declared {} sectors",
                descriptor_bytes.len(),
                header.descriptor_size
            )));
        }

        writer
            .write_all(&header.to_bytes())
            .map_err(|e| Error::vmdk(format!("failed to write header: {}", e)))?;
        writer
            .write_all(descriptor_bytes)
            .map_err(|e| Error::vmdk(format!("failed to write descriptor: {}", e)))?;

        let pos = SECTOR_SIZE + descriptor_bytes.len() as u64;
        if pos > GRAIN_SIZE_BYTES {
            return Err(Error::vmdk(
                "header and descriptor do not fit the first grain",
            ));
        }
        let padding = vec![0u8; (GRAIN_SIZE_BYTES - pos) as usize];
        writer
            .write_all(&padding)
            .map_err(|e| Error::vmdk(format!("failed to pad header grain: {}", e)))?;

        let capacity_bytes = header.capacity_bytes();
        let num_gts = num_grain_tables(capacity_bytes);

        Ok(Self {
            writer,
            header,
            level,
            pos: GRAIN_SIZE_BYTES,
            grain_index: 0,
            num_grains: capacity_bytes.div_ceil(GRAIN_SIZE_BYTES),
            gt: vec![0u32; GT_ENTRIES_PER_GT as usize],
            gt_index: 0,
            gd: vec![0u32; num_gts as usize],
            allocated: 0,
        })
    }

    /// Appends the next grain in virtual order, classifying and compressing
    /// it as needed.
    pub fn write_grain(&mut self, grain: &[u8]) -> Result<()> {
        if is_zero_grain(grain) {
            self.append(EncodedGrain::Zero)
        } else {
            let compressed = compress_grain(grain, self.level)?;
            self.append(EncodedGrain::Compressed(compressed))
        }
    }

    /// Appends a grain that has already been classified and compressed.
    ///
    /// Grains must arrive in virtual-address order; this is the entry point
    /// for the parallel encoding pipeline.
    pub fn append(&mut self, grain: EncodedGrain) -> Result<()> {
        if self.grain_index >= self.num_grains {
            return Err(Error::vmdk(format!(
                "grain {} written past extent capacity of {} grains",
                self.grain_index, self.num_grains
            )));
        }

        match grain {
            EncodedGrain::Zero => {
                debug!(lba = self.grain_index * GRAIN_SECTORS, "zero grain, skipping");
                self.record_entry(0)?;
            }
            EncodedGrain::Compressed(data) => {
                let lba = self.grain_index * GRAIN_SECTORS;
                let marker = GrainMarker::new(lba, data.len() as u32);
                // The table entry points at the sector holding the marker.
                let grain_sector = (self.pos / SECTOR_SIZE) as u32;
                self.writer
                    .write_all(&marker.to_bytes())
                    .map_err(|e| Error::vmdk(format!("failed to write grain marker: {}", e)))?;
                self.writer
                    .write_all(&data)
                    .map_err(|e| Error::vmdk(format!("failed to write grain data: {}", e)))?;
                self.pos += 12 + data.len() as u64;
                self.pad_to_sector()?;
                self.allocated += 1;
                self.record_entry(grain_sector)?;
            }
        }
        Ok(())
    }

    /// Number of grains appended so far.
    pub fn grains_written(&self) -> u64 {
        self.grain_index
    }

    /// Number of allocated (non-zero) grains so far.
    pub fn allocated_grains(&self) -> u64 {
        self.allocated
    }

    /// Bytes written to the stream so far.
    pub fn bytes_written(&self) -> u64 {
        self.pos
    }

    /// Finishes the extent: flushes the final grain table, then emits the
    /// grain directory, footer, and end-of-stream marker.
    pub fn finish(mut self) -> Result<W> {
        if self.grain_index < self.num_grains {
            return Err(Error::vmdk(format!(
                "extent closed after {} of {} grains",
                self.grain_index, self.num_grains
            )));
        }
        if self.grain_index % GT_ENTRIES_PER_GT != 0 {
            self.flush_grain_table()?;
        }

        // Grain directory, padded to a multiple of 128 entries.
        let num_gts = self.gd.len() as u64;
        let padded_entries = gd_entry_count(num_gts);
        let gd_marker = Marker::new(MarkerType::GrainDirectory, padded_entries * 4 / SECTOR_SIZE);
        self.writer
            .write_all(&gd_marker.to_bytes())
            .map_err(|e| Error::vmdk(format!("failed to write GD marker: {}", e)))?;
        let gd_sector = self.pos / SECTOR_SIZE + 1;
        self.pos += SECTOR_SIZE;

        debug!(sector = gd_sector, entries = padded_entries, "writing grain directory");
        let mut gd_bytes = Vec::with_capacity(padded_entries as usize * 4);
        for &entry in &self.gd {
            gd_bytes.extend_from_slice(&entry.to_le_bytes());
        }
        gd_bytes.resize(padded_entries as usize * 4, 0);
        self.writer
            .write_all(&gd_bytes)
            .map_err(|e| Error::vmdk(format!("failed to write grain directory: {}", e)))?;
        self.pos += gd_bytes.len() as u64;

        // Footer: the header again, now with the directory's real position.
        self.header.gd_offset = gd_sector;
        let footer_marker = Marker::new(MarkerType::Footer, 1);
        self.writer
            .write_all(&footer_marker.to_bytes())
            .map_err(|e| Error::vmdk(format!("failed to write footer marker: {}", e)))?;
        self.writer
            .write_all(&self.header.to_bytes())
            .map_err(|e| Error::vmdk(format!("failed to write footer: {}", e)))?;
        self.pos += 2 * SECTOR_SIZE;

        let eos = Marker::new(MarkerType::EndOfStream, 0);
        self.writer
            .write_all(&eos.to_bytes())
            .map_err(|e| Error::vmdk(format!("failed to write end-of-stream marker: {}", e)))?;
        self.pos += SECTOR_SIZE;

        self.writer
            .flush()
            .map_err(|e| Error::vmdk(format!("failed to flush extent: {}", e)))?;
        Ok(self.writer)
    }

    /// Records a grain table entry and flushes the table when the batch is
    /// complete.
    fn record_entry(&mut self, entry: u32) -> Result<()> {
        let slot = (self.grain_index % GT_ENTRIES_PER_GT) as usize;
        self.gt[slot] = entry;
        self.grain_index += 1;
        if self.grain_index % GT_ENTRIES_PER_GT == 0 {
            self.flush_grain_table()?;
        }
        Ok(())
    }

    /// Flushes the current grain table into the stream, if it allocated
    /// anything. An all-zero batch leaves its directory slot at 0 and writes
    /// no table record.
    fn flush_grain_table(&mut self) -> Result<()> {
        if self.gt.iter().any(|&e| e != 0) {
            let marker = Marker::new(MarkerType::GrainTable, GT_SECTORS);
            self.writer
                .write_all(&marker.to_bytes())
                .map_err(|e| Error::vmdk(format!("failed to write GT marker: {}", e)))?;
            // The directory records the table data's sector, after the marker.
            self.gd[self.gt_index] = (self.pos / SECTOR_SIZE + 1) as u32;
            self.pos += SECTOR_SIZE;

            debug!(table = self.gt_index, "flushing grain table");
            let mut gt_bytes = Vec::with_capacity(self.gt.len() * 4);
            for &entry in &self.gt {
                gt_bytes.extend_from_slice(&entry.to_le_bytes());
            }
            self.writer
                .write_all(&gt_bytes)
                .map_err(|e| Error::vmdk(format!("failed to write grain table: {}", e)))?;
            self.pos += gt_bytes.len() as u64;
        }
        self.gt.fill(0);
        self.gt_index += 1;
        Ok(())
    }

    /// Zero-pads the stream to the next sector boundary.
    fn pad_to_sector(&mut self) -> Result<()> {
        let remainder = self.pos % SECTOR_SIZE;
        if remainder != 0 {
            let padding = vec![0u8; (SECTOR_SIZE - remainder) as usize];
            self.writer
                .write_all(&padding)
                .map_err(|e| Error::vmdk(format!("failed to write padding: {}", e)))?;
            self.pos += padding.len() as u64;
        }
        Ok(())
    }
}
