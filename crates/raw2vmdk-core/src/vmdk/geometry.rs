//! On-disk geometry for sparse VMDK extents.
//!
//! Everything in this module is pure arithmetic: an extent capacity goes in,
//! header field values and derived sizes come out. All offsets are counted in
//! 512-byte sectors unless a name says otherwise.

use crate::error::{Error, Result};

/// VMDK magic number ("KDMV" when read as little-endian bytes on disk).
pub const VMDK_MAGIC: u32 = 0x564D444B;

/// Size of a sector in bytes.
pub const SECTOR_SIZE: u64 = 512;

/// Grain size in sectors (128 sectors = 64 KiB).
pub const GRAIN_SECTORS: u64 = 128;

/// Grain size in bytes.
pub const GRAIN_SIZE_BYTES: u64 = GRAIN_SECTORS * SECTOR_SIZE;

/// Number of grain table entries per grain table.
pub const GT_ENTRIES_PER_GT: u64 = 512;

/// Sectors occupied by one grain table (512 entries x 4 bytes).
pub const GT_SECTORS: u64 = GT_ENTRIES_PER_GT * 4 / SECTOR_SIZE;

/// Grain directory offset value signifying the directory is at end of stream.
pub const GD_AT_END: u64 = 0xFFFF_FFFF_FFFF_FFFF;

/// Header format version for random-access sparse extents.
const MONOLITHIC_VERSION: u32 = 1;

/// Header format version for streamOptimized extents.
const STREAM_VERSION: u32 = 3;

/// Flags for monolithicSparse: valid newline detection + redundant grain table.
const MONOLITHIC_FLAGS: u32 = 0x3;

/// Flags for streamOptimized: valid newline detection + compressed grains + markers.
const STREAM_FLAGS: u32 = 0x30001;

/// Compression algorithm ids.
pub const COMPRESSION_NONE: u16 = 0;
pub const COMPRESSION_DEFLATE: u16 = 1;

/// Round `value` up to the next multiple of `align`.
pub fn round_up(value: u64, align: u64) -> u64 {
    if value % align == 0 {
        value
    } else {
        value + align - value % align
    }
}

/// Number of grains covering `capacity_bytes` of virtual disk.
pub fn num_grains(capacity_bytes: u64) -> u64 {
    capacity_bytes.div_ceil(GRAIN_SIZE_BYTES)
}

/// Number of grain tables covering `capacity_bytes` of virtual disk.
pub fn num_grain_tables(capacity_bytes: u64) -> u64 {
    num_grains(capacity_bytes).div_ceil(GT_ENTRIES_PER_GT)
}

/// Sectors reserved for the grain directory itself, in front of the first
/// grain table (one 4-byte entry per grain table, rounded up to a sector).
pub fn gt0_offset(num_gts: u64) -> u64 {
    (num_gts * 4).div_ceil(SECTOR_SIZE)
}

/// Length of the streamed grain directory array in entries, padded to a
/// multiple of 128.
pub fn gd_entry_count(num_gts: u64) -> u64 {
    GRAIN_SECTORS * num_gts.div_ceil(GRAIN_SECTORS)
}

/// Sparse extent header for VMDK files.
///
/// This is a 512-byte record at the start of every sparse extent. The
/// streamOptimized layout repeats it as the footer once all offsets are known.
/// Fields are serialized explicitly in little-endian order; nothing here
/// depends on host struct layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseExtentHeader {
    /// Magic number (VMDK_MAGIC).
    pub magic: u32,
    /// Format version (1 for monolithicSparse, 3 for streamOptimized).
    pub version: u32,
    /// Flag bitset.
    pub flags: u32,
    /// Extent capacity in sectors.
    pub capacity: u64,
    /// Grain size in sectors.
    pub grain_size: u64,
    /// Descriptor offset in sectors (0 when no descriptor is embedded).
    pub descriptor_offset: u64,
    /// Descriptor size in sectors.
    pub descriptor_size: u64,
    /// Number of grain table entries per grain table.
    pub num_gtes_per_gt: u32,
    /// Redundant grain directory offset (0 for streamOptimized).
    pub rgd_offset: u64,
    /// Grain directory offset, or GD_AT_END for streamOptimized.
    pub gd_offset: u64,
    /// First sector usable for grain data, grain-aligned.
    pub overhead: u64,
    /// Unclean shutdown flag.
    pub unclean_shutdown: u8,
    /// Line-ending detection characters.
    pub newline_chars: [u8; 4],
    /// Compression algorithm (0 = none, 1 = DEFLATE).
    pub compress_algorithm: u16,
}

impl SparseExtentHeader {
    /// Build the header for a random-access monolithicSparse extent.
    ///
    /// `capacity_bytes` must be sector-aligned. `descriptor_sectors` is the
    /// measured, sector-rounded size of the embedded descriptor (0 when the
    /// descriptor lives in a separate file, as in the split layout).
    pub fn monolithic(capacity_bytes: u64, descriptor_sectors: u64) -> Self {
        debug_assert_eq!(capacity_bytes % SECTOR_SIZE, 0);
        let num_gts = num_grain_tables(capacity_bytes);
        let gt0 = gt0_offset(num_gts);
        // Directory plus all grain tables, each table 4 sectors.
        let metadata_sectors = gt0 + num_gts * GT_SECTORS;

        let descriptor_offset = if descriptor_sectors == 0 { 0 } else { 1 };
        // At least one sector stays reserved for the header itself.
        let rgd_offset = (descriptor_offset + descriptor_sectors).max(1);
        let gd_offset = rgd_offset + metadata_sectors;
        let overhead = round_up(gd_offset + metadata_sectors, GRAIN_SECTORS);

        Self {
            magic: VMDK_MAGIC,
            version: MONOLITHIC_VERSION,
            flags: MONOLITHIC_FLAGS,
            capacity: capacity_bytes / SECTOR_SIZE,
            grain_size: GRAIN_SECTORS,
            descriptor_offset,
            descriptor_size: descriptor_sectors,
            num_gtes_per_gt: GT_ENTRIES_PER_GT as u32,
            rgd_offset,
            gd_offset,
            overhead,
            unclean_shutdown: 0,
            newline_chars: [b'\n', b' ', b'\r', b'\n'],
            compress_algorithm: COMPRESSION_NONE,
        }
    }

    /// Build the header for a streamOptimized extent.
    ///
    /// The grain directory offset is left at the at-end sentinel; the writer
    /// patches it once the directory's position is known and emits the result
    /// as the footer.
    pub fn stream_optimized(capacity_bytes: u64, descriptor_sectors: u64) -> Self {
        debug_assert_eq!(capacity_bytes % SECTOR_SIZE, 0);
        Self {
            magic: VMDK_MAGIC,
            version: STREAM_VERSION,
            flags: STREAM_FLAGS,
            capacity: capacity_bytes / SECTOR_SIZE,
            grain_size: GRAIN_SECTORS,
            descriptor_offset: if descriptor_sectors == 0 { 0 } else { 1 },
            descriptor_size: descriptor_sectors,
            num_gtes_per_gt: GT_ENTRIES_PER_GT as u32,
            rgd_offset: 0,
            gd_offset: GD_AT_END,
            // One grain of header + descriptor padding; data starts at the
            // first grain boundary.
            overhead: GRAIN_SECTORS,
            unclean_shutdown: 0,
            newline_chars: [b'\n', b' ', b'\r', b'\n'],
            compress_algorithm: COMPRESSION_DEFLATE,
        }
    }

    /// Extent capacity in bytes.
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity * SECTOR_SIZE
    }

    /// True for the streamOptimized layout.
    pub fn is_stream_optimized(&self) -> bool {
        self.compress_algorithm == COMPRESSION_DEFLATE
    }

    /// Serializes the header to exactly 512 bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; SECTOR_SIZE as usize];

        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..12].copy_from_slice(&self.flags.to_le_bytes());
        buf[12..20].copy_from_slice(&self.capacity.to_le_bytes());
        buf[20..28].copy_from_slice(&self.grain_size.to_le_bytes());
        buf[28..36].copy_from_slice(&self.descriptor_offset.to_le_bytes());
        buf[36..44].copy_from_slice(&self.descriptor_size.to_le_bytes());
        buf[44..48].copy_from_slice(&self.num_gtes_per_gt.to_le_bytes());
        buf[48..56].copy_from_slice(&self.rgd_offset.to_le_bytes());
        buf[56..64].copy_from_slice(&self.gd_offset.to_le_bytes());
        buf[64..72].copy_from_slice(&self.overhead.to_le_bytes());
        buf[72] = self.unclean_shutdown;
        buf[73] = self.newline_chars[0];
        buf[74] = self.newline_chars[1];
        buf[75] = self.newline_chars[2];
        buf[76] = self.newline_chars[3];
        buf[77..79].copy_from_slice(&self.compress_algorithm.to_le_bytes());
        // 79..512 is reserved padding, already zeroed.

        buf
    }

    /// Parse a header from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < SECTOR_SIZE as usize {
            return Err(Error::vmdk("sparse extent header too short"));
        }

        let read_u32 = |off: usize| {
            u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
        };
        let read_u64 = |off: usize| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&data[off..off + 8]);
            u64::from_le_bytes(bytes)
        };

        let magic = read_u32(0);
        if magic != VMDK_MAGIC {
            return Err(Error::vmdk(format!(
                "invalid VMDK magic: expected 0x{:X}, got 0x{:X}",
                VMDK_MAGIC, magic
            )));
        }

        Ok(Self {
            magic,
            version: read_u32(4),
            flags: read_u32(8),
            capacity: read_u64(12),
            grain_size: read_u64(20),
            descriptor_offset: read_u64(28),
            descriptor_size: read_u64(36),
            num_gtes_per_gt: read_u32(44),
            rgd_offset: read_u64(48),
            gd_offset: read_u64(56),
            overhead: read_u64(64),
            unclean_shutdown: data[72],
            newline_chars: [data[73], data[74], data[75], data[76]],
            compress_algorithm: u16::from_le_bytes([data[77], data[78]]),
        })
    }
}
