//! LP metadata parsing (spec §4.C.1).

use super::format::*;
use super::model::*;
use crate::error::{Error, Result};
use crate::logger::Logger;
use binrw::BinReaderExt;
use std::io::{Cursor, Read, Seek, SeekFrom};

/// Reads until `buf` is full or the stream is exhausted, returning the
/// number of bytes actually read so a short read can be reported as
/// `Error::TruncatedInput` instead of a generic I/O error.
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

/// `read_fully`, but turns a short read into `Error::TruncatedInput`.
fn read_exact_checked<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    let got = read_fully(reader, buf)?;
    if got < buf.len() {
        return Err(Error::TruncatedInput { expected: buf.len() as u64, got: got as u64 });
    }
    Ok(())
}

/// Read and verify a metadata image for one slot (spec §4.C.1
/// `read_metadata(stream, slot_number) -> Metadata`).
///
/// Geometry is tried at the primary offset (4096), then the backup offset
/// (8192), then the legacy offset (0) — the single swallow-and-retry point
/// the error-propagation policy allows (spec §7).
pub fn read_metadata<R: Read + Seek>(reader: &mut R, slot: u32, logger: &Logger) -> Result<Metadata> {
    let geometry = parse_geometry(reader, logger)?;
    if slot >= geometry.metadata_slot_count {
        return Err(Error::InvalidArgument(format!(
            "slot {slot} >= metadata_slot_count {}",
            geometry.metadata_slot_count
        )));
    }
    let primary_offset = geometry.primary_metadata_offset(slot);
    read_metadata_at(reader, &geometry, primary_offset)
}

/// Read a metadata image from its backup slot location, bypassing the
/// primary — useful when a caller already knows the primary is damaged.
pub fn read_backup_metadata<R: Read + Seek>(reader: &mut R, slot: u32, logger: &Logger) -> Result<Metadata> {
    let geometry = parse_geometry(reader, logger)?;
    let backup_offset = geometry.backup_metadata_offset(slot);
    read_metadata_at(reader, &geometry, backup_offset)
}

pub fn parse_geometry<R: Read + Seek>(reader: &mut R, logger: &Logger) -> Result<Geometry> {
    let offsets = [
        LP_PARTITION_RESERVED_BYTES,
        LP_PARTITION_RESERVED_BYTES + LP_GEOMETRY_SIZE,
        0u64,
    ];
    for offset in offsets {
        match try_parse_geometry_at(reader, offset) {
            Ok(g) => return Ok(g),
            Err(e) => logger.warn(format!("lp: geometry at offset {offset} failed validation: {e}")),
        }
    }
    Err(Error::BadGeometry)
}

fn try_parse_geometry_at<R: Read + Seek>(reader: &mut R, offset: u64) -> Result<Geometry> {
    reader.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; LP_GEOMETRY_SIZE as usize];
    read_exact_checked(reader, &mut buf)?;

    let geom: GeometryOnDisk = Cursor::new(&buf[..GEOMETRY_STRUCT_SIZE as usize]).read_le()?;
    if geom.magic != GEOMETRY_MAGIC {
        return Err(Error::BadMagic { what: "lp geometry", found: geom.magic as u64 });
    }
    let struct_size = geom.struct_size as usize;
    if !(GEOMETRY_STRUCT_SIZE as usize..=buf.len()).contains(&struct_size) {
        return Err(Error::BadHeader("geometry struct_size out of range".into()));
    }

    let mut check_buf = buf[..struct_size].to_vec();
    check_buf[8..40].fill(0); // checksum field: after magic(4)+struct_size(4)
    let computed = crate::checksum::sha256(&check_buf);
    if computed != geom.checksum {
        return Err(Error::BadChecksum { what: "lp geometry" });
    }

    Ok(Geometry {
        metadata_max_size: geom.metadata_max_size,
        metadata_slot_count: geom.metadata_slot_count,
        logical_block_size: geom.logical_block_size,
    })
}

fn read_metadata_at<R: Read + Seek>(reader: &mut R, geometry: &Geometry, offset: u64) -> Result<Metadata> {
    reader.seek(SeekFrom::Start(offset))?;

    let mut prefix = [0u8; 12];
    read_exact_checked(reader, &mut prefix)?;
    let declared_header_size = u32::from_le_bytes(prefix[8..12].try_into().unwrap());
    if declared_header_size < HEADER_STRUCT_SIZE {
        return Err(Error::BadHeader(format!(
            "header_size {declared_header_size} smaller than minimum {HEADER_STRUCT_SIZE}"
        )));
    }

    let mut header_buf = vec![0u8; declared_header_size as usize];
    header_buf[..12].copy_from_slice(&prefix);
    read_exact_checked(reader, &mut header_buf[12..])?;

    let header: HeaderOnDisk = Cursor::new(&header_buf[..HEADER_STRUCT_SIZE as usize]).read_le()?;
    if header.magic != HEADER_MAGIC {
        return Err(Error::BadMagic { what: "lp header", found: header.magic as u64 });
    }
    if header.major_version > CURRENT_MAJOR_VERSION {
        return Err(Error::UnsupportedVersion(header.major_version));
    }

    let mut header_check_buf = header_buf.clone();
    header_check_buf[12..44].fill(0); // header_checksum field
    let computed_header_hash = crate::checksum::sha256(&header_check_buf);
    if computed_header_hash != header.header_checksum {
        return Err(Error::BadChecksum { what: "lp header" });
    }

    let mut tables_buf = vec![0u8; header.tables_size as usize];
    read_exact_checked(reader, &mut tables_buf)?;
    let computed_tables_hash = crate::checksum::sha256(&tables_buf);
    if computed_tables_hash != header.tables_checksum {
        return Err(Error::BadChecksum { what: "lp tables" });
    }

    let partitions_raw: Vec<PartitionOnDisk> = read_table(&tables_buf, &header.partitions, PARTITION_ENTRY_SIZE)?;
    let extents_raw: Vec<ExtentOnDisk> = read_table(&tables_buf, &header.extents, EXTENT_ENTRY_SIZE)?;
    let groups_raw: Vec<GroupOnDisk> = read_table(&tables_buf, &header.groups, GROUP_ENTRY_SIZE)?;
    let block_devices_raw: Vec<BlockDeviceOnDisk> =
        read_table(&tables_buf, &header.block_devices, BLOCK_DEVICE_ENTRY_SIZE)?;

    let extents: Vec<Extent> = extents_raw
        .iter()
        .map(|e| {
            if e.target_type == TARGET_TYPE_ZERO {
                Extent::zero(e.num_sectors)
            } else {
                Extent::linear(e.num_sectors, e.target_data, e.target_source)
            }
        })
        .collect();

    let partitions = partitions_raw
        .iter()
        .map(|p| {
            let start = p.first_extent_index as usize;
            let end = start + p.num_extents as usize;
            if end > extents.len() {
                return Err(Error::TruncatedMetadata { expected: end as u64, got: extents.len() as u64 });
            }
            Ok(Partition {
                name: decode_name(&p.name),
                attributes: p.attributes,
                group_index: p.group_index,
                extents: extents[start..end].to_vec(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let groups = groups_raw
        .iter()
        .map(|g| PartitionGroup { name: decode_name(&g.name), flags: g.flags, maximum_size: g.maximum_size })
        .collect();

    let block_devices = block_devices_raw
        .iter()
        .map(|b| BlockDevice {
            first_logical_sector: b.first_logical_sector,
            alignment: b.alignment,
            alignment_offset: b.alignment_offset,
            size: b.size,
            partition_name: decode_name(&b.partition_name),
            flags: b.flags,
        })
        .collect();

    Ok(Metadata { geometry: *geometry, partitions, groups, block_devices, header_flags: header.flags })
}

fn read_table<T>(buf: &[u8], desc: &TableDescriptorOnDisk, our_size: u32) -> Result<Vec<T>>
where
    T: binrw::BinRead,
    for<'a> T::Args<'a>: Default,
{
    if desc.num_entries == 0 {
        return Ok(Vec::new());
    }
    if desc.entry_size < our_size {
        return Err(Error::BadHeader(format!(
            "table entry_size {} smaller than minimum {our_size}",
            desc.entry_size
        )));
    }
    let start = desc.offset as usize;
    let mut out = Vec::with_capacity(desc.num_entries as usize);
    for i in 0..desc.num_entries as usize {
        let entry_start = start + i * desc.entry_size as usize;
        let entry_end = entry_start + our_size as usize;
        if entry_end > buf.len() {
            return Err(Error::TruncatedMetadata { expected: entry_end as u64, got: buf.len() as u64 });
        }
        let entry: T = Cursor::new(&buf[entry_start..entry_end]).read_le()?;
        out.push(entry);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lp::builder::MetadataBuilder;
    use crate::lp::serialize::write_to_image;

    #[test]
    fn scenario_s2_slot_offset_math() {
        let geometry = Geometry { metadata_max_size: 65536, metadata_slot_count: 2, logical_block_size: 4096 };
        assert_eq!(geometry.primary_metadata_offset(1), 4096 + 8192 + 65536);
        assert_eq!(geometry.backup_metadata_offset(0), 4096 + 8192 + 65536 * 2);
    }

    #[test]
    fn round_trip_empty_metadata() {
        let builder = MetadataBuilder::new(8 * 1024 * 1024 * 1024, 65536, 2).unwrap();
        let metadata = builder.export();

        let mut image = Cursor::new(vec![0u8; 1024 * 1024]);
        write_to_image(&mut image, &metadata).unwrap();
        image.set_position(0);

        let reparsed = read_metadata(&mut image, 0, &Logger::default()).unwrap();
        assert_eq!(reparsed.partitions.len(), 0);
        assert_eq!(reparsed.groups.len(), 1);
        assert_eq!(reparsed.groups[0].name, "default");
    }

    #[test]
    fn geometry_falls_back_to_backup_when_primary_corrupt() {
        let builder = MetadataBuilder::new(8 * 1024 * 1024 * 1024, 65536, 2).unwrap();
        let metadata = builder.export();
        let mut image = Cursor::new(vec![0u8; 1024 * 1024]);
        write_to_image(&mut image, &metadata).unwrap();

        let bytes = image.get_mut();
        bytes[LP_PARTITION_RESERVED_BYTES as usize] = 0; // corrupt primary geometry magic

        image.set_position(0);
        let geometry = parse_geometry(&mut image, &Logger::default()).unwrap();
        assert_eq!(geometry.metadata_slot_count, 2);
    }
}
