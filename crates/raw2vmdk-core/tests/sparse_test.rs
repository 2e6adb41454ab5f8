//! Integration tests for the monolithic sparse writer.

use std::io::Cursor;

use raw2vmdk_core::vmdk::descriptor::{
    render_descriptor, AdapterType, CreateType, DescriptorExtent, DiskGeometry,
};
use raw2vmdk_core::vmdk::geometry::{SparseExtentHeader, GRAIN_SIZE_BYTES, SECTOR_SIZE};
use raw2vmdk_core::vmdk::sparse::MonolithicSparseWriter;

const MIB: u64 = 1024 * 1024;
const GRAIN: usize = GRAIN_SIZE_BYTES as usize;

fn test_descriptor(capacity: u64) -> String {
    let extents = vec![DescriptorExtent {
        size_sectors: capacity / SECTOR_SIZE,
        filename: "disk.vmdk".to_string(),
    }];
    render_descriptor(
        CreateType::MonolithicSparse,
        &extents,
        &DiskGeometry::new(1024, AdapterType::Ide),
    )
}

/// Encode `input` (zero-padded to `capacity`) and return the raw extent.
fn encode(capacity: u64, grains: impl Iterator<Item = Vec<u8>>) -> (SparseExtentHeader, Vec<u8>) {
    let descriptor = test_descriptor(capacity);
    let descriptor_sectors =
        raw2vmdk_core::vmdk::descriptor::descriptor_sectors(&descriptor);
    let header = SparseExtentHeader::monolithic(capacity, descriptor_sectors);
    let mut writer =
        MonolithicSparseWriter::new(Cursor::new(Vec::new()), header.clone(), Some(&descriptor))
            .expect("failed to create writer");
    for grain in grains {
        writer.write_grain(&grain).expect("failed to write grain");
    }
    let data = writer.finish().expect("failed to finish").into_inner();
    (header, data)
}

/// Read the grain table entries back out of a written extent.
fn read_grain_table(header: &SparseExtentHeader, data: &[u8], base: u64) -> Vec<u32> {
    let num_gts = (header.capacity * SECTOR_SIZE)
        .div_ceil(GRAIN_SIZE_BYTES)
        .div_ceil(512);
    let gt0 = (num_gts * 4).div_ceil(SECTOR_SIZE);
    let start = ((base + gt0) * SECTOR_SIZE) as usize;
    let count = (num_gts * 512) as usize;
    (0..count)
        .map(|i| {
            let off = start + i * 4;
            u32::from_le_bytes(data[off..off + 4].try_into().unwrap())
        })
        .collect()
}

#[test]
fn test_all_zero_image_is_overhead_only() {
    // 10 MiB of zeros: the extent holds only header, descriptor, and
    // directory metadata; every grain table entry is 0.
    let capacity = 10 * MIB;
    let (header, data) = encode(capacity, (0..160).map(|_| vec![0u8; GRAIN]));

    assert_eq!(data.len() as u64, header.overhead * SECTOR_SIZE);
    for base in [header.rgd_offset, header.gd_offset] {
        let entries = read_grain_table(&header, &data, base);
        assert!(entries.iter().all(|&e| e == 0));
    }
}

#[test]
fn test_single_nonzero_grain() {
    // Only grain 7 holds data: exactly one table entry set, exactly one
    // grain of data after the overhead.
    let capacity = 10 * MIB;
    let (header, data) = encode(
        capacity,
        (0..160).map(|i| {
            if i == 7 {
                vec![0xA5u8; GRAIN]
            } else {
                vec![0u8; GRAIN]
            }
        }),
    );

    assert_eq!(
        data.len() as u64,
        header.overhead * SECTOR_SIZE + GRAIN_SIZE_BYTES
    );

    for base in [header.rgd_offset, header.gd_offset] {
        let entries = read_grain_table(&header, &data, base);
        for (i, &entry) in entries.iter().enumerate() {
            if i == 7 {
                assert_eq!(entry as u64, header.overhead);
            } else {
                assert_eq!(entry, 0, "entry {} should be absent", i);
            }
        }
    }

    let start = (header.overhead * SECTOR_SIZE) as usize;
    assert!(data[start..start + GRAIN].iter().all(|&b| b == 0xA5));
}

#[test]
fn test_directory_entries_index_table_region() {
    let capacity = 100 * MIB; // 1600 grains, 4 grain tables
    let (header, data) = encode(capacity, (0..1600).map(|_| vec![0u8; GRAIN]));

    let num_gts = 4u64;
    let gt0 = 1u64;
    for base in [header.rgd_offset, header.gd_offset] {
        let start = (base * SECTOR_SIZE) as usize;
        for i in 0..num_gts {
            let off = start + (i as usize) * 4;
            let entry = u32::from_le_bytes(data[off..off + 4].try_into().unwrap()) as u64;
            assert_eq!(entry, base + gt0 + i * 4);
        }
    }
}

#[test]
fn test_embedded_descriptor_is_readable() {
    let capacity = 10 * MIB;
    let (header, data) = encode(capacity, (0..160).map(|_| vec![0u8; GRAIN]));

    let start = (header.descriptor_offset * SECTOR_SIZE) as usize;
    let end = start + ((header.descriptor_size * SECTOR_SIZE) as usize);
    let text = String::from_utf8_lossy(&data[start..end]);
    assert!(text.contains("createType=\"monolithicSparse\""));
    assert!(text.contains("RW 20480 SPARSE \"disk.vmdk\""));
}

#[test]
fn test_encoding_is_idempotent() {
    let capacity = 4 * MIB;
    let grains = |seed: u8| {
        (0..64u8).map(move |i| {
            if i % 5 == 0 {
                vec![i ^ seed; GRAIN]
            } else {
                vec![0u8; GRAIN]
            }
        })
    };
    let (_, first) = encode(capacity, grains(0));
    let (_, second) = encode(capacity, grains(0));
    assert_eq!(first, second);
}

#[test]
fn test_header_roundtrips_from_written_extent() {
    let capacity = 10 * MIB;
    let (header, data) = encode(capacity, (0..160).map(|_| vec![0u8; GRAIN]));
    let parsed = SparseExtentHeader::from_bytes(&data[..512]).expect("header should parse");
    assert_eq!(parsed, header);
}
