//! Integration tests for extent splitting and the split descriptor.

use std::path::Path;

use raw2vmdk_core::split::{plan_extents, MAX_EXTENT_BYTES, MAX_MONOLITHIC_BYTES};
use raw2vmdk_core::vmdk::descriptor::{
    render_descriptor, AdapterType, CreateType, DescriptorExtent, DiskGeometry,
};

const MIB: u64 = 1024 * 1024;

#[test]
fn test_ceilings_match_format_limits() {
    assert_eq!(MAX_EXTENT_BYTES, 2047 * MIB);
    assert_eq!(MAX_MONOLITHIC_BYTES, 4095 * MIB);
}

#[test]
fn test_split_plan_consumes_capacity_greedily() {
    let plan = plan_extents(Path::new("disk.vmdk"), 4096 * MIB, false);

    // ceil(4096 / 2047) = 3 extents; the ceiling bounds every extent.
    assert_eq!(plan.create_type, CreateType::TwoGbMaxExtentSparse);
    assert_eq!(plan.extents.len(), 3);
    assert!(plan.extents.iter().all(|e| e.size_bytes <= MAX_EXTENT_BYTES));
    assert_eq!(plan.capacity_bytes(), 4096 * MIB);

    // Greedy assignment: full extents first, remainder last.
    assert_eq!(plan.extents[0].size_bytes, 2047 * MIB);
    assert_eq!(plan.extents[1].size_bytes, 2047 * MIB);
    assert_eq!(plan.extents[2].size_bytes, 2 * MIB);
}

#[test]
fn test_split_descriptor_enumerates_extents_in_order() {
    let plan = plan_extents(Path::new("/out/disk.vmdk"), 4096 * MIB, false);
    let extents: Vec<DescriptorExtent> = plan
        .extents
        .iter()
        .map(|e| DescriptorExtent::new(&e.path, e.size_bytes).unwrap())
        .collect();
    let text = render_descriptor(
        plan.create_type,
        &extents,
        &DiskGeometry::new(8192, AdapterType::Lsilogic),
    );

    assert!(text.contains("createType=\"twoGbMaxExtentSparse\""));
    let line1 = format!("RW {} SPARSE \"disk-s001.vmdk\"", 2047 * MIB / 512);
    let line2 = format!("RW {} SPARSE \"disk-s002.vmdk\"", 2047 * MIB / 512);
    let line3 = format!("RW {} SPARSE \"disk-s003.vmdk\"", 2 * MIB / 512);
    let p1 = text.find(&line1).expect("first extent line");
    let p2 = text.find(&line2).expect("second extent line");
    let p3 = text.find(&line3).expect("third extent line");
    assert!(p1 < p2 && p2 < p3);
}

#[test]
fn test_monolithic_boundary_is_inclusive() {
    let at_limit = plan_extents(Path::new("disk.vmdk"), MAX_MONOLITHIC_BYTES, false);
    assert_eq!(at_limit.create_type, CreateType::MonolithicSparse);
    assert_eq!(at_limit.extents.len(), 1);

    let over_limit = plan_extents(Path::new("disk.vmdk"), MAX_MONOLITHIC_BYTES + 512, false);
    assert_eq!(over_limit.create_type, CreateType::TwoGbMaxExtentSparse);
    assert_eq!(over_limit.extents.len(), 3);
}
