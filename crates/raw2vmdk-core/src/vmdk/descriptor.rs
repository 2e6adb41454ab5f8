//! VMDK descriptor rendering.
//!
//! The descriptor is a small UTF-8 text record naming the disk's extents and
//! geometry. For single-extent layouts it is embedded right after the sparse
//! extent header; for the split layout it becomes a standalone file that
//! enumerates every extent.

use std::fmt::Write;
use std::path::Path;

use crate::error::{Error, Result};
use crate::vmdk::geometry::SECTOR_SIZE;

/// CID written into every descriptor. Fixed so identical inputs produce
/// byte-identical output.
const CID: &str = "fffffffe";

/// Parent CID marking a disk with no parent.
const PARENT_CID: &str = "ffffffff";

/// The createType of a produced disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateType {
    /// Single random-access sparse extent.
    MonolithicSparse,
    /// Single append-only compressed extent.
    StreamOptimized,
    /// Multiple sparse extents of at most 2047 MiB each.
    TwoGbMaxExtentSparse,
}

impl CreateType {
    /// The createType string as it appears in the descriptor.
    pub fn name(&self) -> &'static str {
        match self {
            CreateType::MonolithicSparse => "monolithicSparse",
            CreateType::StreamOptimized => "streamOptimized",
            CreateType::TwoGbMaxExtentSparse => "twoGbMaxExtentSparse",
        }
    }

    /// Access mode for extent lines. Stream-optimized disks are read-only.
    fn access(&self) -> &'static str {
        match self {
            CreateType::StreamOptimized => "RDONLY",
            _ => "RW",
        }
    }
}

impl std::fmt::Display for CreateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Disk adapter type advertised in the descriptor's disk database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdapterType {
    #[default]
    Ide,
    Buslogic,
    Lsilogic,
}

impl AdapterType {
    pub fn name(&self) -> &'static str {
        match self {
            AdapterType::Ide => "ide",
            AdapterType::Buslogic => "buslogic",
            AdapterType::Lsilogic => "lsilogic",
        }
    }
}

/// CHS geometry and adapter type for the descriptor's disk database section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskGeometry {
    pub cylinders: u32,
    pub heads: u32,
    pub sectors: u32,
    pub adapter: AdapterType,
}

impl DiskGeometry {
    /// Geometry with the conventional 16-head, 63-sector layout.
    pub fn new(cylinders: u32, adapter: AdapterType) -> Self {
        Self {
            cylinders,
            heads: 16,
            sectors: 63,
            adapter,
        }
    }
}

/// One extent line of the descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorExtent {
    /// Extent capacity in 512-byte sectors.
    pub size_sectors: u64,
    /// Extent file name, without any directory components.
    pub filename: String,
}

impl DescriptorExtent {
    /// Build an extent line from a path and a byte size (sector-aligned).
    pub fn new(path: &Path, size_bytes: u64) -> Result<Self> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::vmdk(format!("invalid extent path: {}", path.display())))?
            .to_string();
        Ok(Self {
            size_sectors: size_bytes / SECTOR_SIZE,
            filename,
        })
    }
}

/// Render the descriptor text for a disk.
///
/// The template is byte-stable, trailing spaces included.
pub fn render_descriptor(
    create_type: CreateType,
    extents: &[DescriptorExtent],
    geometry: &DiskGeometry,
) -> String {
    let mut out = String::new();

    let _ = write!(
        out,
        "# Disk DescriptorFile\n\
         version=1 \n\
         CID={} \n\
         parentCID={} \n\
         createType=\"{}\" \n\
         \n\
         # Extent description\n",
        CID,
        PARENT_CID,
        create_type.name()
    );

    for extent in extents {
        let _ = writeln!(
            out,
            "{} {} SPARSE \"{}\"",
            create_type.access(),
            extent.size_sectors,
            extent.filename
        );
    }

    let _ = write!(
        out,
        "\n\
         # The Disk Data Base \n\
         #DDB\n\
         \n\
         ddb.adapterType = \"{}\"\n\
         ddb.encoding = \"UTF-8\"\n\
         ddb.geometry.cylinders = \"{}\"\n\
         ddb.geometry.heads = \"{}\"\n\
         ddb.geometry.sectors = \"{}\"\n\
         ddb.toolsVersion = \"8193\"\n\
         ddb.virtualHWVersion = \"7\"\n",
        geometry.adapter.name(),
        geometry.cylinders,
        geometry.heads,
        geometry.sectors
    );

    out
}

/// Sector-rounded size of a rendered descriptor.
///
/// The sparse extent header declares the descriptor's size before the text is
/// written, so the text is rendered first and measured here.
pub fn descriptor_sectors(text: &str) -> u64 {
    (text.len() as u64).div_ceil(SECTOR_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> DiskGeometry {
        DiskGeometry::new(1024, AdapterType::Ide)
    }

    fn one_extent() -> Vec<DescriptorExtent> {
        vec![DescriptorExtent {
            size_sectors: 20480,
            filename: "disk.vmdk".to_string(),
        }]
    }

    #[test]
    fn test_render_contains_required_keys() {
        let text = render_descriptor(CreateType::MonolithicSparse, &one_extent(), &geometry());
        assert!(text.contains("version=1"));
        assert!(text.contains("CID=fffffffe"));
        assert!(text.contains("parentCID=ffffffff"));
        assert!(text.contains("createType=\"monolithicSparse\""));
        assert!(text.contains("ddb.adapterType = \"ide\""));
        assert!(text.contains("ddb.geometry.cylinders = \"1024\""));
        assert!(text.contains("ddb.geometry.heads = \"16\""));
        assert!(text.contains("ddb.geometry.sectors = \"63\""));
    }

    #[test]
    fn test_render_extent_line() {
        let text = render_descriptor(CreateType::MonolithicSparse, &one_extent(), &geometry());
        assert!(text.contains("RW 20480 SPARSE \"disk.vmdk\"\n"));
    }

    #[test]
    fn test_stream_optimized_extents_are_rdonly() {
        let text = render_descriptor(CreateType::StreamOptimized, &one_extent(), &geometry());
        assert!(text.contains("RDONLY 20480 SPARSE \"disk.vmdk\"\n"));
        assert!(text.contains("createType=\"streamOptimized\""));
    }

    #[test]
    fn test_render_multiple_extents_in_order() {
        let extents = vec![
            DescriptorExtent {
                size_sectors: 4192256,
                filename: "disk-s001.vmdk".to_string(),
            },
            DescriptorExtent {
                size_sectors: 4096,
                filename: "disk-s002.vmdk".to_string(),
            },
        ];
        let text = render_descriptor(CreateType::TwoGbMaxExtentSparse, &extents, &geometry());
        let first = text.find("disk-s001.vmdk").unwrap();
        let second = text.find("disk-s002.vmdk").unwrap();
        assert!(first < second);
        assert!(text.contains("RW 4192256 SPARSE \"disk-s001.vmdk\"\n"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let a = render_descriptor(CreateType::MonolithicSparse, &one_extent(), &geometry());
        let b = render_descriptor(CreateType::MonolithicSparse, &one_extent(), &geometry());
        assert_eq!(a, b);
    }

    #[test]
    fn test_descriptor_sectors() {
        assert_eq!(descriptor_sectors(""), 0);
        assert_eq!(descriptor_sectors("x"), 1);
        assert_eq!(descriptor_sectors(&"y".repeat(512)), 1);
        assert_eq!(descriptor_sectors(&"y".repeat(513)), 2);
    }

    #[test]
    fn test_descriptor_extent_uses_basename() {
        let extent =
            DescriptorExtent::new(Path::new("/out/dir/disk.vmdk"), 1024 * 1024).unwrap();
        assert_eq!(extent.filename, "disk.vmdk");
        assert_eq!(extent.size_sectors, 2048);
    }
}
