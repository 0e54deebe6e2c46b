//! Component C: the LP ("logical partition") super-metadata engine
//! (spec §2, §4.C).

mod builder;
mod format;
mod model;
mod parse;
mod serialize;

pub use builder::MetadataBuilder;
pub use format::{
    decode_name, encode_name, ATTR_DISABLED, ATTR_NONE, ATTR_READONLY, ATTR_SLOT_SUFFIXED, ATTR_UPDATED,
    BLOCK_DEVICE_FLAG_SLOT_SUFFIXED, CURRENT_MAJOR_VERSION, GROUP_FLAG_SLOT_SUFFIXED, HEADER_FLAG_VIRTUAL_AB_DEVICE,
    LP_GEOMETRY_SIZE, LP_PARTITION_RESERVED_BYTES, LP_SECTOR_SIZE, NAME_FIELD_LEN, TARGET_TYPE_LINEAR, TARGET_TYPE_ZERO,
};
pub use model::{
    slot_suffix, BlockDevice, Extent, ExtentTarget, Geometry, Metadata, Partition, PartitionGroup,
};
pub use parse::{parse_geometry, read_backup_metadata, read_metadata};
pub use serialize::{serialize_geometry, serialize_metadata, write_to_image};
