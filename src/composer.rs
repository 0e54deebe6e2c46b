//! Component D(i): the super-image composer (spec §4.D.1). Combines a
//! finalized LP `Metadata` with a map of partition name to backing data
//! into a single sparse image laid out exactly as a real "super" partition.

use crate::error::{Error, Result};
use crate::lp::{serialize_geometry, serialize_metadata, ExtentTarget, Metadata, LP_PARTITION_RESERVED_BYTES, LP_SECTOR_SIZE};
use crate::logger::Logger;
use crate::provider::Provider;
use crate::sparse::SparseImage;
use std::collections::HashMap;

/// Every offset this function derives from extents or the metadata region
/// must land on a block boundary; this holds for any layout produced by
/// [`crate::lp::MetadataBuilder`] with its default 4096-byte alignment.
fn exact_blocks(bytes: u64, block_size: u64, what: &str) -> Result<u32> {
    if bytes % block_size != 0 {
        return Err(Error::InvalidArgument(format!("{what} offset/length {bytes} is not a multiple of block_size {block_size}")));
    }
    Ok((bytes / block_size) as u32)
}

/// Build a sparse super image from `metadata` plus a map from partition
/// name to its backing data; partitions absent from the map are zero-filled
/// (spec §4.D.1).
pub fn build_super(metadata: &Metadata, partition_data: &HashMap<String, Provider>, logger: &Logger) -> Result<SparseImage> {
    let block_size = metadata.geometry.logical_block_size;
    let device = metadata
        .block_devices
        .first()
        .ok_or_else(|| Error::InvalidArgument("metadata has no block devices".into()))?;
    let device_size = device.size;

    let mut image = SparseImage::new(block_size, device_size)?;

    // Step 1: reserved region.
    image.add_skip(LP_PARTITION_RESERVED_BYTES, None)?;

    // Step 2: primary + backup geometry.
    let geometry_blob = serialize_geometry(&metadata.geometry)?;
    image.add_raw(Provider::from_bytes(geometry_blob.to_vec()), None)?;
    image.add_raw(Provider::from_bytes(geometry_blob.to_vec()), None)?;

    // Step 3: primary metadata slots.
    let metadata_blob = serialize_metadata(metadata)?;
    let mut padded_blob = metadata_blob;
    padded_blob.resize(metadata.geometry.metadata_max_size as usize, 0);
    for _ in 0..metadata.geometry.metadata_slot_count {
        image.add_raw(Provider::from_bytes(padded_blob.clone()), None)?;
    }

    // Step 4: skip forward to first_logical_sector.
    let target_bytes = device.first_logical_sector * LP_SECTOR_SIZE;
    let current_bytes = image.current_block() as u64 * block_size as u64;
    if target_bytes < current_bytes {
        return Err(Error::InvalidArgument(
            "first_logical_sector overlaps the metadata region".into(),
        ));
    }
    if target_bytes > current_bytes {
        image.add_skip(target_bytes - current_bytes, None)?;
    }

    // Step 5: partition payload, ordered by physical placement.
    let mut entries: Vec<(&str, crate::lp::Extent)> = metadata
        .partitions
        .iter()
        .flat_map(|p| {
            p.extents.iter().filter_map(move |e| match e.target {
                ExtentTarget::Linear { target_source: 0, .. } => Some((p.name.as_str(), *e)),
                _ => None,
            })
        })
        .collect();
    entries.sort_by_key(|(_, e)| match e.target {
        ExtentTarget::Linear { target_data, .. } => target_data,
        ExtentTarget::Zero => 0,
    });

    let mut written_for_partition: HashMap<&str, u64> = HashMap::new();
    for (name, extent) in &entries {
        let ExtentTarget::Linear { target_data, .. } = extent.target else {
            unreachable!("filtered to Linear extents above");
        };
        let extent_start_bytes = target_data * LP_SECTOR_SIZE;
        let extent_len_bytes = extent.num_sectors * LP_SECTOR_SIZE;

        let cursor_bytes = image.current_block() as u64 * block_size as u64;
        if extent_start_bytes < cursor_bytes {
            return Err(Error::InvalidArgument(format!(
                "partition '{name}' extent at sector {target_data} overlaps previously placed data"
            )));
        }
        if extent_start_bytes > cursor_bytes {
            image.add_skip(extent_start_bytes - cursor_bytes, None)?;
        }

        let extent_blocks = exact_blocks(extent_len_bytes, block_size as u64, "extent length")?;
        let written = *written_for_partition.get(name).unwrap_or(&0);
        match partition_data.get(*name) {
            Some(provider) => {
                let remaining_in_provider = provider.len().saturating_sub(written);
                let take = remaining_in_provider.min(extent_len_bytes);
                let raw_blocks = if take == 0 { 0 } else { take.div_ceil(block_size as u64) as u32 };
                if take > 0 {
                    let sub = provider.sub_provider(written, take)?;
                    image.add_raw(sub, None)?;
                }
                let fill_blocks = extent_blocks - raw_blocks;
                if fill_blocks > 0 {
                    image.add_fill([0; 4], fill_blocks as u64 * block_size as u64, None)?;
                }
                if take < extent_len_bytes {
                    logger.warn(format!(
                        "partition '{name}' data ({} bytes) is shorter than its extent ({extent_len_bytes} bytes); padding with zero",
                        provider.len()
                    ));
                }
                written_for_partition.insert(name, written + take);
            }
            None => {
                image.add_fill([0; 4], extent_blocks as u64 * block_size as u64, None)?;
            }
        }
    }

    // Step 6: skip forward to the backup metadata region.
    let backup_start = device_size - metadata.geometry.metadata_max_size as u64 * metadata.geometry.metadata_slot_count as u64;
    let cursor_bytes = image.current_block() as u64 * block_size as u64;
    if backup_start < cursor_bytes {
        return Err(Error::InvalidArgument("backup metadata region overlaps partition payload".into()));
    }
    if backup_start > cursor_bytes {
        image.add_skip(backup_start - cursor_bytes, None)?;
    }

    // Step 7: backup metadata slots.
    for _ in 0..metadata.geometry.metadata_slot_count {
        image.add_raw(Provider::from_bytes(padded_blob.clone()), None)?;
    }

    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lp::MetadataBuilder;
    use crate::sparse::{from_stream, write, write_flat};
    use std::io::Cursor;

    fn flatten(image: &crate::sparse::SparseImage) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        write_flat(&mut cursor, image, false).unwrap();
        cursor.into_inner()
    }

    #[test]
    fn build_super_places_partition_data_at_extent_offset() {
        let mut builder = MetadataBuilder::new(16 * 1024 * 1024, 16384, 2).unwrap();
        builder.add_partition("system", "default", 0).unwrap();
        builder.resize_partition("system", 4096).unwrap();
        let meta = builder.export();

        let mut data = HashMap::new();
        data.insert("system".to_string(), Provider::from_bytes(vec![0x42u8; 4096]));

        let image = build_super(&meta, &data, &Logger::default()).unwrap();
        let flat = flatten(&image);

        let extent = &meta.partitions[0].extents[0];
        let ExtentTarget::Linear { target_data, .. } = extent.target else { panic!() };
        let offset = (target_data * LP_SECTOR_SIZE) as usize;
        assert_eq!(&flat[offset..offset + 4096], &[0x42u8; 4096]);
    }

    #[test]
    fn missing_partition_is_zero_filled() {
        let mut builder = MetadataBuilder::new(16 * 1024 * 1024, 16384, 2).unwrap();
        builder.add_partition("vendor", "default", 0).unwrap();
        builder.resize_partition("vendor", 4096).unwrap();
        let meta = builder.export();

        let image = build_super(&meta, &HashMap::new(), &Logger::default()).unwrap();
        let flat = flatten(&image);
        let extent = &meta.partitions[0].extents[0];
        let ExtentTarget::Linear { target_data, .. } = extent.target else { panic!() };
        let offset = (target_data * LP_SECTOR_SIZE) as usize;
        assert_eq!(&flat[offset..offset + 4096], &[0u8; 4096]);
    }

    #[test]
    fn composed_image_parses_as_sparse() {
        let mut builder = MetadataBuilder::new(16 * 1024 * 1024, 16384, 2).unwrap();
        builder.add_partition("system", "default", 0).unwrap();
        builder.resize_partition("system", 4096).unwrap();
        let meta = builder.export();
        let mut data = HashMap::new();
        data.insert("system".to_string(), Provider::from_bytes(vec![1u8; 4096]));

        let image = build_super(&meta, &data, &Logger::default()).unwrap();
        let mut buf = Cursor::new(Vec::new());
        write(&mut buf, &image, false, true).unwrap();
        buf.set_position(0);
        let reparsed = from_stream(&mut buf, true, &Logger::default()).unwrap();
        assert_eq!(reparsed.total_blocks, image.total_blocks);
    }
}
