//! Monolithic sparse VMDK writer.
//!
//! Produces a single random-access sparse extent: header, embedded
//! descriptor, redundant and primary grain directory/table regions, then a
//! data region holding only the non-zero grains. Directory entries are
//! precomputed from geometry alone; the grain tables are built in memory
//! during the data pass and flushed into both reserved table regions at the
//! end.

use std::io::{Seek, SeekFrom, Write};

use tracing::debug;

use crate::error::{Error, Result};
use crate::vmdk::geometry::{
    gt0_offset, num_grain_tables, SparseExtentHeader, GD_AT_END, GRAIN_SECTORS,
    GRAIN_SIZE_BYTES, GT_ENTRIES_PER_GT, GT_SECTORS, SECTOR_SIZE,
};
use crate::vmdk::grain::is_zero_grain;

/// A writer for creating monolithicSparse VMDK extents.
///
/// Construction writes everything whose position is known up front (header,
/// descriptor, both grain directories, the overhead placeholder); grains are
/// then appended in virtual-address order and `finish` flushes the completed
/// grain tables into the regions reserved for them.
///
/// # Example
///
/// ```no_run
/// use raw2vmdk_core::vmdk::geometry::SparseExtentHeader;
/// use raw2vmdk_core::vmdk::sparse::MonolithicSparseWriter;
/// use std::fs::File;
///
/// let capacity = 10 * 1024 * 1024;
/// let header = SparseExtentHeader::monolithic(capacity, 2);
/// let file = File::create("output.vmdk").unwrap();
/// let mut writer = MonolithicSparseWriter::new(file, header, Some("# descriptor")).unwrap();
///
/// let grain = vec![0u8; 64 * 1024];
/// for _ in 0..160 {
///     writer.write_grain(&grain).unwrap();
/// }
/// let _file = writer.finish().unwrap();
/// ```
pub struct MonolithicSparseWriter<W: Write + Seek> {
    writer: W,
    header: SparseExtentHeader,
    /// All grain tables for the extent, concatenated.
    grain_table: Vec<u32>,
    /// Next grain to be appended, in virtual order.
    grain_index: u64,
    /// Total grains covering the extent capacity.
    num_grains: u64,
    /// Sector where the next non-zero grain's data will land.
    data_sector: u64,
    /// Running count of allocated (non-zero) grains.
    allocated: u64,
}

impl<W: Write + Seek> MonolithicSparseWriter<W> {
    /// Creates a new writer, emitting header, descriptor, and directories.
    ///
    /// The header must come from [`SparseExtentHeader::monolithic`]. Pass the
    /// descriptor text when the header declares an embedded descriptor; split
    /// extents pass `None`.
    pub fn new(mut writer: W, header: SparseExtentHeader, descriptor: Option<&str>) -> Result<Self> {
        if header.gd_offset == GD_AT_END {
            return Err(Error::vmdk(
                "monolithic writer requires a random-access header",
            ));
        }
        match (descriptor, header.descriptor_size) {
            (None, 0) => {}
            (Some(_), 0) | (None, 1..) => {
                return Err(Error::vmdk(
                    "descriptor text and declared descriptor size disagree",
                ));
            }
            (Some(text), declared) => {
                if (text.len() as u64).div_ceil(SECTOR_SIZE) > declared {
                    return Err(Error::vmdk(format!(
                        "descriptor of {} bytes exceeds the declared {} sectors",
                        text.len(),
                        declared
                    )));
                }
            }
        }

        writer
            .write_all(&header.to_bytes())
            .map_err(|e| Error::vmdk(format!("failed to write header: {}", e)))?;

        if let Some(text) = descriptor {
            writer
                .write_all(text.as_bytes())
                .map_err(|e| Error::vmdk(format!("failed to write descriptor: {}", e)))?;
            let end = (header.descriptor_offset + header.descriptor_size) * SECTOR_SIZE;
            let padding = end - SECTOR_SIZE - text.len() as u64;
            writer
                .write_all(&vec![0u8; padding as usize])
                .map_err(|e| Error::vmdk(format!("failed to pad descriptor: {}", e)))?;
        }

        let capacity_bytes = header.capacity_bytes();
        let num_gts = num_grain_tables(capacity_bytes);
        let gt0 = gt0_offset(num_gts);

        // Both directories index the same table layout: table i sits gt0 + 4*i
        // sectors past the directory base.
        for base in [header.rgd_offset, header.gd_offset] {
            writer
                .seek(SeekFrom::Start(base * SECTOR_SIZE))
                .map_err(Error::io_simple)?;
            let mut entries = Vec::with_capacity(num_gts as usize * 4);
            for i in 0..num_gts {
                let entry = (base + gt0 + i * GT_SECTORS) as u32;
                entries.extend_from_slice(&entry.to_le_bytes());
            }
            writer
                .write_all(&entries)
                .map_err(|e| Error::vmdk(format!("failed to write grain directory: {}", e)))?;
        }

        // One zero byte ending at the overhead boundary keeps the file at
        // least `overhead` sectors long even when every grain is zero.
        writer
            .seek(SeekFrom::Start(header.overhead * SECTOR_SIZE - 1))
            .map_err(Error::io_simple)?;
        writer
            .write_all(&[0u8])
            .map_err(|e| Error::vmdk(format!("failed to reserve overhead: {}", e)))?;

        debug!(
            capacity_sectors = header.capacity,
            overhead = header.overhead,
            num_gts,
            "monolithic extent initialized"
        );

        let data_sector = header.overhead;
        Ok(Self {
            writer,
            header,
            grain_table: vec![0u32; (num_gts * GT_ENTRIES_PER_GT) as usize],
            grain_index: 0,
            num_grains: capacity_bytes.div_ceil(GRAIN_SIZE_BYTES),
            data_sector,
            allocated: 0,
        })
    }

    /// Appends the next grain in virtual order.
    ///
    /// Zero grains leave their table entry at 0 and write nothing; non-zero
    /// grains are appended to the data region. Tail grains must already be
    /// zero-padded to the full grain size.
    pub fn write_grain(&mut self, grain: &[u8]) -> Result<()> {
        if grain.len() as u64 != GRAIN_SIZE_BYTES {
            return Err(Error::vmdk(format!(
                "grain must be {} bytes, got {}",
                GRAIN_SIZE_BYTES,
                grain.len()
            )));
        }
        if self.grain_index >= self.num_grains {
            return Err(Error::vmdk(format!(
                "grain {} written past extent capacity of {} grains",
                self.grain_index, self.num_grains
            )));
        }

        if is_zero_grain(grain) {
            debug!(grain = self.grain_index, "zero grain, skipping");
        } else {
            self.writer
                .write_all(grain)
                .map_err(|e| Error::vmdk(format!("failed to write grain data: {}", e)))?;
            self.grain_table[self.grain_index as usize] = self.data_sector as u32;
            self.data_sector += GRAIN_SECTORS;
            self.allocated += 1;
        }
        self.grain_index += 1;
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

    /// Final extent length in bytes: overhead plus the allocated grains.
    pub fn extent_bytes(&self) -> u64 {
        self.header.overhead * SECTOR_SIZE + self.allocated * GRAIN_SIZE_BYTES
    }

    /// Finishes the extent, flushing the grain tables into both the
    /// redundant and primary table regions.
    pub fn finish(mut self) -> Result<W> {
        if self.grain_index < self.num_grains {
            return Err(Error::vmdk(format!(
                "extent closed after {} of {} grains",
                self.grain_index, self.num_grains
            )));
        }

        let num_gts = num_grain_tables(self.header.capacity_bytes());
        let gt0 = gt0_offset(num_gts);
        let mut table_bytes = Vec::with_capacity(self.grain_table.len() * 4);
        for &entry in &self.grain_table {
            table_bytes.extend_from_slice(&entry.to_le_bytes());
        }

        debug!(allocated = self.allocated, "flushing grain tables");
        for base in [self.header.rgd_offset, self.header.gd_offset] {
            self.writer
                .seek(SeekFrom::Start((base + gt0) * SECTOR_SIZE))
                .map_err(Error::io_simple)?;
            self.writer
                .write_all(&table_bytes)
                .map_err(|e| Error::vmdk(format!("failed to write grain tables: {}", e)))?;
        }

        self.writer
            .flush()
            .map_err(|e| Error::vmdk(format!("failed to flush extent: {}", e)))?;
        Ok(self.writer)
    }
}
