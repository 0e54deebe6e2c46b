//! Bit-exact on-disk layout of the LP ("logical partition") super-metadata
//! format (spec §3, §4.C.1, §6).

use binrw::binrw;

pub const LP_PARTITION_RESERVED_BYTES: u64 = 4096;
pub const LP_GEOMETRY_SIZE: u64 = 4096;
pub const LP_SECTOR_SIZE: u64 = 512;

pub const GEOMETRY_MAGIC: u32 = 0x616C4467;
pub const HEADER_MAGIC: u32 = 0x414C5030;
pub const CURRENT_MAJOR_VERSION: u16 = 10;
pub const CURRENT_MINOR_VERSION: u16 = 0;

pub const ATTR_NONE: u32 = 0;
pub const ATTR_READONLY: u32 = 1 << 0;
pub const ATTR_SLOT_SUFFIXED: u32 = 1 << 1;
pub const ATTR_UPDATED: u32 = 1 << 2;
pub const ATTR_DISABLED: u32 = 1 << 3;

pub const GROUP_FLAG_SLOT_SUFFIXED: u32 = 1 << 0;
pub const BLOCK_DEVICE_FLAG_SLOT_SUFFIXED: u32 = 1 << 0;
pub const HEADER_FLAG_VIRTUAL_AB_DEVICE: u32 = 1;

pub const TARGET_TYPE_LINEAR: u32 = 0;
pub const TARGET_TYPE_ZERO: u32 = 1;

pub const NAME_FIELD_LEN: usize = 36;

/// Pack a name into a zero-padded 36-byte ASCII field (spec §6: "Name
/// fields are 36-byte ASCII, zero-padded").
pub fn encode_name(name: &str) -> crate::error::Result<[u8; NAME_FIELD_LEN]> {
    let bytes = name.as_bytes();
    if bytes.len() >= NAME_FIELD_LEN {
        return Err(crate::error::Error::InvalidArgument(format!(
            "name '{name}' exceeds {NAME_FIELD_LEN} bytes"
        )));
    }
    let mut out = [0u8; NAME_FIELD_LEN];
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(out)
}

pub fn decode_name(field: &[u8; NAME_FIELD_LEN]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(NAME_FIELD_LEN);
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// The 4096-byte geometry blob's inner struct (spec §3 "Geometry", §4.C.3
/// step 1: checksum computed with this field zeroed).
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryOnDisk {
    pub magic: u32,
    pub struct_size: u32,
    pub checksum: [u8; 32],
    pub metadata_max_size: u32,
    pub metadata_slot_count: u32,
    pub logical_block_size: u32,
}

pub const GEOMETRY_STRUCT_SIZE: u32 = 4 + 4 + 32 + 4 + 4 + 4;

impl GeometryOnDisk {
    pub fn new(metadata_max_size: u32, metadata_slot_count: u32, logical_block_size: u32) -> Self {
        GeometryOnDisk {
            magic: GEOMETRY_MAGIC,
            struct_size: GEOMETRY_STRUCT_SIZE,
            checksum: [0u8; 32],
            metadata_max_size,
            metadata_slot_count,
            logical_block_size,
        }
    }
}

/// One of the four fixed-size table descriptors inside the header (spec
/// §3 "Header + tables").
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableDescriptorOnDisk {
    pub offset: u32,
    pub num_entries: u32,
    pub entry_size: u32,
}

/// The metadata header preceding the four tables (spec §3, §4.C.1/.3).
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderOnDisk {
    pub magic: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub header_size: u32,
    pub header_checksum: [u8; 32],
    pub tables_size: u32,
    pub tables_checksum: [u8; 32],
    pub partitions: TableDescriptorOnDisk,
    pub extents: TableDescriptorOnDisk,
    pub groups: TableDescriptorOnDisk,
    pub block_devices: TableDescriptorOnDisk,
    pub flags: u32,
}

pub const HEADER_STRUCT_SIZE: u32 = 4 + 2 + 2 + 4 + 32 + 4 + 32 + (4 * 3) * 4 + 4;

impl HeaderOnDisk {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tables_size: u32,
        partitions: TableDescriptorOnDisk,
        extents: TableDescriptorOnDisk,
        groups: TableDescriptorOnDisk,
        block_devices: TableDescriptorOnDisk,
        flags: u32,
    ) -> Self {
        HeaderOnDisk {
            magic: HEADER_MAGIC,
            major_version: CURRENT_MAJOR_VERSION,
            minor_version: CURRENT_MINOR_VERSION,
            header_size: HEADER_STRUCT_SIZE,
            header_checksum: [0u8; 32],
            tables_size,
            tables_checksum: [0u8; 32],
            partitions,
            extents,
            groups,
            block_devices,
            flags,
        }
    }
}

#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy)]
pub struct PartitionOnDisk {
    pub name: [u8; NAME_FIELD_LEN],
    pub attributes: u32,
    pub first_extent_index: u32,
    pub num_extents: u32,
    pub group_index: u32,
}

pub const PARTITION_ENTRY_SIZE: u32 = NAME_FIELD_LEN as u32 + 4 + 4 + 4 + 4;

#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy)]
pub struct ExtentOnDisk {
    pub num_sectors: u64,
    pub target_type: u32,
    pub target_data: u64,
    pub target_source: u32,
}

pub const EXTENT_ENTRY_SIZE: u32 = 8 + 4 + 8 + 4;

#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy)]
pub struct GroupOnDisk {
    pub name: [u8; NAME_FIELD_LEN],
    pub flags: u32,
    pub maximum_size: u64,
}

pub const GROUP_ENTRY_SIZE: u32 = NAME_FIELD_LEN as u32 + 4 + 8;

#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy)]
pub struct BlockDeviceOnDisk {
    pub first_logical_sector: u64,
    pub alignment: u32,
    pub alignment_offset: u32,
    pub size: u64,
    pub partition_name: [u8; NAME_FIELD_LEN],
    pub flags: u32,
}

pub const BLOCK_DEVICE_ENTRY_SIZE: u32 = 8 + 4 + 4 + 8 + NAME_FIELD_LEN as u32 + 4;
