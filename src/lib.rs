//! Sparse image and logical-partition ("super") metadata codec, composer,
//! and stream adapters.
//!
//! Four components, leaves first: [`provider`] (Data Providers), [`sparse`]
//! (the Android sparse image codec), [`lp`] (the LP/"super" metadata
//! engine), and [`composer`] + [`partition`] (the super-image composer and
//! partition read adapter, which depend on both codecs). [`fsprobe`] is a
//! small inline helper, not a component of its own.

mod checksum;
mod composer;
mod error;
mod fsprobe;
mod logger;
mod lp;
mod partition;
mod provider;
mod sparse;

pub use checksum::{sha256, Crc32, Crc32Reader, Crc32Writer};
pub use error::{Error, Result};
pub use fsprobe::{probe_filesystem, FilesystemKind};
pub use logger::Logger;
pub use provider::{FileRegionProvider, MemoryProvider, Provider, ReadSeek, StreamRegionProvider};

pub use composer::build_super;
pub use partition::{open_partition, PartitionStream};

pub use lp::{
    decode_name, encode_name, parse_geometry, read_backup_metadata, read_metadata, serialize_geometry,
    serialize_metadata, slot_suffix, write_to_image, ATTR_DISABLED, ATTR_NONE, ATTR_READONLY, ATTR_SLOT_SUFFIXED,
    ATTR_UPDATED, BLOCK_DEVICE_FLAG_SLOT_SUFFIXED, CURRENT_MAJOR_VERSION, GROUP_FLAG_SLOT_SUFFIXED,
    HEADER_FLAG_VIRTUAL_AB_DEVICE, LP_GEOMETRY_SIZE, LP_PARTITION_RESERVED_BYTES, LP_SECTOR_SIZE, NAME_FIELD_LEN,
    TARGET_TYPE_LINEAR, TARGET_TYPE_ZERO,
};
pub use lp::{BlockDevice, Extent, ExtentTarget, Geometry, Metadata, MetadataBuilder, Partition, PartitionGroup};

pub use sparse::{
    from_image_file, from_raw_file, from_stream, import_auto, length, peek_header, resparse, sparsify, write,
    write_flat, Chunk, ChunkPayload, HoleMode, SparseHeaderInfo, SparseImage, SparseImageStream, SparseStream,
    CHUNK_TYPE_CRC32, CHUNK_TYPE_FILL, CHUNK_TYPE_RAW, CHUNK_TYPE_SKIP, MAX_CHUNK_DATA_SIZE, MAX_FILL_SKIP_CHUNK_SIZE,
    SPARSE_HEADER_MAGIC, SPARSE_HEADER_MAJOR_VERSION,
};

/// Read a metadata image from any primary slot of `stream`, falling back to
/// the backup slot if the primary fails validation (spec §6:
/// `read_from_image(path|stream)`).
pub fn read_from_image<R: std::io::Read + std::io::Seek>(
    stream: &mut R,
    slot: u32,
    logger: &Logger,
) -> Result<Metadata> {
    match read_metadata(stream, slot, logger) {
        Ok(m) => Ok(m),
        Err(_) => read_backup_metadata(stream, slot, logger),
    }
}

/// Start a fresh builder for a new "super" image (spec §6: `builder_new`).
pub fn builder_new(device_size: u64, metadata_max_size: u32, metadata_slot_count: u32) -> Result<MetadataBuilder> {
    MetadataBuilder::new(device_size, metadata_max_size, metadata_slot_count)
}

/// Load a parsed `Metadata` back into an editable builder (spec §6:
/// `builder_from`).
pub fn builder_from(metadata: Metadata) -> MetadataBuilder {
    MetadataBuilder::from_metadata(metadata)
}

/// Export a sparse image as a bit-exact sparse byte slice covering
/// `[start_block, start_block + block_count)` of the logical image (spec
/// §6: `export_stream(start_block, block_count, include_crc)`). The output
/// declares only `block_count` blocks rather than the source's full
/// `total_blocks` — callers that need the slice to keep its original
/// block-address space (leading/trailing Skip chunks) should use
/// `SparseImageStream::new` directly with `full_range: true`.
pub fn export_stream(image: &SparseImage, start_block: u32, block_count: u32, include_crc: bool) -> Result<SparseImageStream> {
    SparseImageStream::new(image, start_block, block_count, false, include_crc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn read_from_image_falls_back_to_backup_slot() {
        let mut builder = builder_new(8 * 1024 * 1024 * 1024, 65536, 2).unwrap();
        builder.add_partition("system", "default", ATTR_NONE).unwrap();
        builder.resize_partition("system", 4096).unwrap();
        let meta = builder.export();

        let mut image = Cursor::new(vec![0u8; 1024 * 1024]);
        write_to_image(&mut image, &meta).unwrap();

        let primary_offset = meta.geometry.primary_metadata_offset(0) as usize;
        image.get_mut()[primary_offset] = 0xFF; // corrupt primary header magic

        image.set_position(0);
        let reparsed = read_from_image(&mut image, 0, &Logger::default()).unwrap();
        assert_eq!(reparsed.partitions.len(), 1);
    }

    #[test]
    fn builder_from_round_trips_through_export() {
        let mut builder = builder_new(16 * 1024 * 1024, 16384, 2).unwrap();
        builder.add_partition("a", "default", ATTR_NONE).unwrap();
        let exported = builder.export();
        let reloaded = builder_from(exported.clone());
        assert_eq!(reloaded.export(), exported);
    }
}
