//! LP metadata authoring (spec §4.C.2): add/remove partitions and groups,
//! resize partitions and groups, reorder, resize the block device, compact
//! the extent layout, and export a `Metadata` ready for serialization.

use super::format::*;
use super::model::*;
use crate::error::{Error, Result};
use crate::logger::Logger;

fn align_up(value: u64, align: u64) -> u64 {
    if align <= 1 {
        value
    } else {
        value.div_ceil(align) * align
    }
}

/// Smallest sector `>= start` satisfying `(sector - alignment_offset) %
/// alignment == 0` (spec §4.C.2 "Free-region map").
fn align_sector(start: u64, alignment_sectors: u64, alignment_offset_sectors: u64) -> u64 {
    if alignment_sectors <= 1 {
        return start;
    }
    let shifted = start as i128 - alignment_offset_sectors as i128;
    let rem = shifted.rem_euclid(alignment_sectors as i128) as u64;
    if rem == 0 {
        start
    } else {
        start + (alignment_sectors - rem)
    }
}

struct FreeRegion {
    start_sector: u64,
    end_sector: u64,
}

/// Mutable builder state mirroring `Metadata` (spec §4.C.2 "State").
#[derive(Debug, Clone)]
pub struct MetadataBuilder {
    geometry: Geometry,
    partitions: Vec<Partition>,
    groups: Vec<PartitionGroup>,
    block_devices: Vec<BlockDevice>,
    header_flags: u32,
    logger: Logger,
}

impl MetadataBuilder {
    /// Initialize geometry, a "default" group, and a "super" block device
    /// sized to leave room for the metadata region (spec §4.C.2 `new`).
    pub fn new(device_size: u64, metadata_max_size: u32, metadata_slot_count: u32) -> Result<Self> {
        if metadata_max_size == 0 || metadata_slot_count == 0 {
            return Err(Error::InvalidArgument(
                "metadata_max_size and metadata_slot_count must be non-zero".into(),
            ));
        }
        let geometry = Geometry {
            metadata_max_size,
            metadata_slot_count,
            logical_block_size: 4096,
        };
        let metadata_region =
            LP_PARTITION_RESERVED_BYTES + (LP_GEOMETRY_SIZE + metadata_max_size as u64 * metadata_slot_count as u64) * 2;
        let first_logical_sector = align_up(metadata_region, 4096) / LP_SECTOR_SIZE;
        if first_logical_sector * LP_SECTOR_SIZE > device_size {
            return Err(Error::DeviceTooSmall {
                requested: device_size,
                minimum: first_logical_sector * LP_SECTOR_SIZE,
            });
        }
        Ok(MetadataBuilder {
            geometry,
            partitions: Vec::new(),
            groups: vec![PartitionGroup { name: "default".into(), flags: 0, maximum_size: 0 }],
            block_devices: vec![BlockDevice {
                first_logical_sector,
                alignment: 4096,
                alignment_offset: 0,
                size: device_size,
                partition_name: "super".into(),
                flags: 0,
            }],
            header_flags: 0,
            logger: Logger::default(),
        })
    }

    /// Load a parsed `Metadata` back into an editable builder (spec §4.C.2
    /// `from_metadata`).
    pub fn from_metadata(meta: Metadata) -> Self {
        MetadataBuilder {
            geometry: meta.geometry,
            partitions: meta.partitions,
            groups: meta.groups,
            block_devices: meta.block_devices,
            header_flags: meta.header_flags,
            logger: Logger::default(),
        }
    }

    /// Attach a logger for allocation-fallback diagnostics (spec §9).
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn groups(&self) -> &[PartitionGroup] {
        &self.groups
    }

    pub fn block_devices(&self) -> &[BlockDevice] {
        &self.block_devices
    }

    fn find_partition(&self, name: &str) -> Result<usize> {
        self.partitions
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| Error::UnknownPartition(name.to_string()))
    }

    fn find_group(&self, name: &str) -> Result<usize> {
        self.groups
            .iter()
            .position(|g| g.name == name)
            .ok_or_else(|| Error::UnknownGroup(name.to_string()))
    }

    /// Add a partition in `group` (spec §4.C.2 `add_partition`).
    pub fn add_partition(&mut self, name: &str, group: &str, attributes: u32) -> Result<()> {
        if self.partitions.iter().any(|p| p.name == name) {
            return Err(Error::DuplicatePartition(name.to_string()));
        }
        let group_index = self.find_group(group)?;
        self.partitions.push(Partition {
            name: name.to_string(),
            attributes,
            group_index: group_index as u32,
            extents: Vec::new(),
        });
        Ok(())
    }

    /// Remove a partition by name; a no-op if it doesn't exist, matching
    /// the source's tolerant delete (spec §4.C.2 `remove_partition`).
    pub fn remove_partition(&mut self, name: &str) {
        self.partitions.retain(|p| p.name != name);
    }

    /// Add a partition group (spec §4.C.2 `add_group`). A duplicate name
    /// is rejected at the argument level; the format has no dedicated
    /// error kind for it.
    pub fn add_group(&mut self, name: &str, maximum_size: u64) -> Result<()> {
        if self.groups.iter().any(|g| g.name == name) {
            return Err(Error::InvalidArgument(format!("group '{name}' already exists")));
        }
        self.groups.push(PartitionGroup { name: name.to_string(), flags: 0, maximum_size });
        Ok(())
    }

    /// Remove a group; fails if it is "default" or still has partitions
    /// (spec §4.C.2 `remove_group`).
    pub fn remove_group(&mut self, name: &str) -> Result<()> {
        if name == "default" {
            return Err(Error::InvalidArgument("cannot remove the default group".into()));
        }
        let idx = self.find_group(name)?;
        if self.partitions.iter().any(|p| p.group_index == idx as u32) {
            return Err(Error::InvalidArgument(format!("group '{name}' still has partitions")));
        }
        self.groups.remove(idx);
        for p in &mut self.partitions {
            if p.group_index as usize > idx {
                p.group_index -= 1;
            }
        }
        Ok(())
    }

    fn group_usage(&self, group_index: u32) -> u64 {
        self.partitions
            .iter()
            .filter(|p| p.group_index == group_index)
            .map(Partition::size_bytes)
            .sum()
    }

    /// Change a group's cap; fails if the group's current usage would
    /// exceed it (spec §4.C.2 `resize_group`).
    pub fn resize_group(&mut self, name: &str, maximum_size: u64) -> Result<()> {
        let idx = self.find_group(name)?;
        if maximum_size != 0 {
            let usage = self.group_usage(idx as u32);
            if usage > maximum_size {
                return Err(Error::GroupOverflow { group: name.to_string(), requested: usage, max: maximum_size });
            }
        }
        self.groups[idx].maximum_size = maximum_size;
        Ok(())
    }

    /// Free sectors on block device `device_index`, within
    /// `[first_logical_sector, size/sector)`, sorted ascending (spec
    /// §4.C.2 "Free-region map").
    fn free_regions(&self, device_index: usize) -> Vec<FreeRegion> {
        let device = &self.block_devices[device_index];
        let dev_start = device.first_logical_sector;
        let dev_end = device.size / LP_SECTOR_SIZE;

        let mut occupied: Vec<(u64, u64)> = self
            .partitions
            .iter()
            .flat_map(|p| p.extents.iter())
            .filter_map(|e| match e.target {
                ExtentTarget::Linear { target_data, target_source } if target_source as usize == device_index => {
                    Some((target_data, target_data + e.num_sectors))
                }
                _ => None,
            })
            .collect();
        occupied.sort_unstable();

        let mut free = Vec::new();
        let mut cursor = dev_start;
        for (start, end) in occupied {
            let start = start.max(dev_start);
            let end = end.min(dev_end);
            if start > cursor {
                free.push(FreeRegion { start_sector: cursor, end_sector: start });
            }
            cursor = cursor.max(end);
        }
        if cursor < dev_end {
            free.push(FreeRegion { start_sector: cursor, end_sector: dev_end });
        }
        free
    }

    /// Allocate `needed_sectors` worth of Linear extents from
    /// `device_index`'s free regions, respecting its alignment (spec
    /// §4.C.2 "Allocation policy").
    fn allocate_extents(&self, device_index: usize, needed_sectors: u64) -> Result<Vec<Extent>> {
        let device = &self.block_devices[device_index];
        let alignment_sectors = (device.alignment as u64 / LP_SECTOR_SIZE).max(1);
        let alignment_offset_sectors = device.alignment_offset as u64 / LP_SECTOR_SIZE;

        let mut remaining = needed_sectors;
        let mut extents = Vec::new();
        for region in self.free_regions(device_index) {
            if remaining == 0 {
                break;
            }
            let start = align_sector(region.start_sector, alignment_sectors, alignment_offset_sectors);
            if start >= region.end_sector {
                self.logger.warn(format!(
                    "lp builder: free region [{}, {}) too small after alignment, skipping",
                    region.start_sector, region.end_sector
                ));
                continue;
            }
            let available = region.end_sector - start;
            let take = available.min(remaining);
            extents.push(Extent::linear(take, start, device_index as u32));
            remaining -= take;
        }
        if remaining > 0 {
            return Err(Error::DiskFull {
                requested_sectors: needed_sectors,
                available_sectors: needed_sectors - remaining,
            });
        }
        Ok(extents)
    }

    /// Keep whole extents from the front until the running total reaches
    /// `requested_sectors`, splitting the extent that crosses the boundary
    /// (spec §4.C.2 "If shrinking").
    fn shrink_partition(&mut self, idx: usize, requested_sectors: u64) {
        let mut kept = Vec::new();
        let mut running = 0u64;
        for e in &self.partitions[idx].extents {
            if running >= requested_sectors {
                break;
            }
            let remaining_needed = requested_sectors - running;
            if e.num_sectors <= remaining_needed {
                kept.push(*e);
                running += e.num_sectors;
            } else {
                let mut trimmed = *e;
                trimmed.num_sectors = remaining_needed;
                kept.push(trimmed);
                running += remaining_needed;
                break;
            }
        }
        self.partitions[idx].extents = kept;
    }

    /// Grow or shrink a partition to exactly `requested_size_bytes` (spec
    /// §4.C.2 `resize_partition`).
    pub fn resize_partition(&mut self, name: &str, requested_size_bytes: u64) -> Result<()> {
        if requested_size_bytes % LP_SECTOR_SIZE != 0 {
            return Err(Error::InvalidArgument(format!(
                "requested size {requested_size_bytes} is not a multiple of the sector size"
            )));
        }
        let idx = self.find_partition(name)?;
        let requested_sectors = requested_size_bytes / LP_SECTOR_SIZE;
        let current_sectors: u64 = self.partitions[idx].extents.iter().map(|e| e.num_sectors).sum();

        if requested_sectors < current_sectors {
            self.shrink_partition(idx, requested_sectors);
            return Ok(());
        }
        if requested_sectors == current_sectors {
            return Ok(());
        }

        let deficit_sectors = requested_sectors - current_sectors;
        let group_index = self.partitions[idx].group_index;
        let group = &self.groups[group_index as usize];
        if group.maximum_size != 0 {
            let usage = self.group_usage(group_index);
            let new_usage = usage + deficit_sectors * LP_SECTOR_SIZE;
            if new_usage > group.maximum_size {
                return Err(Error::GroupOverflow {
                    group: group.name.clone(),
                    requested: new_usage,
                    max: group.maximum_size,
                });
            }
        }
        let new_extents = self.allocate_extents(0, deficit_sectors)?;
        self.partitions[idx].extents.extend(new_extents);
        Ok(())
    }

    /// Permute the partition list to match `names`; partitions not
    /// mentioned are dropped, names that don't match an existing
    /// partition are ignored (spec §4.C.2 `reorder_partitions`).
    pub fn reorder_partitions(&mut self, names: &[String]) {
        let mut reordered = Vec::with_capacity(names.len());
        for name in names {
            if let Some(pos) = self.partitions.iter().position(|p| &p.name == name) {
                reordered.push(self.partitions.remove(pos));
            }
        }
        self.partitions = reordered;
    }

    /// Grow or shrink the "super" block device; fails if shrinking would
    /// leave an existing Linear extent unreachable (spec §4.C.2
    /// `resize_block_device`).
    pub fn resize_block_device(&mut self, new_size: u64) -> Result<()> {
        let min_end_sector = self
            .partitions
            .iter()
            .flat_map(|p| p.extents.iter())
            .filter_map(|e| match e.target {
                ExtentTarget::Linear { target_data, .. } => Some(target_data + e.num_sectors),
                ExtentTarget::Zero => None,
            })
            .max()
            .unwrap_or(self.block_devices[0].first_logical_sector);
        let minimum = min_end_sector * LP_SECTOR_SIZE;
        if new_size < minimum {
            return Err(Error::DeviceTooSmall { requested: new_size, minimum });
        }
        self.block_devices[0].size = new_size;
        Ok(())
    }

    /// Reallocate every Linear extent bottom-up from
    /// `first_logical_sector`, preserving each partition's total size,
    /// extent count, and extent order (spec §4.C.2 `compact_partitions`).
    pub fn compact_partitions(&mut self) -> Result<()> {
        let device = self.block_devices[0].clone();
        let alignment_sectors = (device.alignment as u64 / LP_SECTOR_SIZE).max(1);
        let alignment_offset_sectors = device.alignment_offset as u64 / LP_SECTOR_SIZE;
        let end_sector = device.size / LP_SECTOR_SIZE;

        let mut cursor = device.first_logical_sector;
        for partition in &mut self.partitions {
            for extent in &mut partition.extents {
                if let ExtentTarget::Linear { target_source, .. } = extent.target {
                    let start = align_sector(cursor, alignment_sectors, alignment_offset_sectors);
                    extent.target = ExtentTarget::Linear { target_data: start, target_source };
                    cursor = start + extent.num_sectors;
                }
            }
        }
        if cursor > end_sector {
            return Err(Error::DeviceTooSmall { requested: device.size, minimum: cursor * LP_SECTOR_SIZE });
        }
        Ok(())
    }

    pub fn set_header_flags(&mut self, flags: u32) {
        self.header_flags = flags;
    }

    /// Produce the denormalized `Metadata` this builder currently
    /// describes (spec §4.C.2 `export`).
    pub fn export(&self) -> Metadata {
        Metadata {
            geometry: self.geometry,
            partitions: self.partitions.clone(),
            groups: self.groups.clone(),
            block_devices: self.block_devices.clone(),
            header_flags: self.header_flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> MetadataBuilder {
        MetadataBuilder::new(8 * 1024 * 1024 * 1024, 65536, 2).unwrap()
    }

    #[test]
    fn scenario_s3_grow_with_alignment() {
        // metadata_max_size/slot_count chosen so the metadata region is
        // exactly 1 MiB (2048 sectors), matching spec §8 scenario S3.
        let mut b = MetadataBuilder::new(8 * 1024 * 1024 * 1024, 259072, 2).unwrap();
        assert_eq!(b.block_devices()[0].first_logical_sector, 2048);
        b.add_partition("system", "default", ATTR_READONLY).unwrap();
        b.resize_partition("system", 1024 * 1024 * 1024).unwrap();
        let system = b.partitions().iter().find(|p| p.name == "system").unwrap();
        assert_eq!(system.extents.len(), 1);
        assert_eq!(system.extents[0].num_sectors, 2097152);
        assert!(matches!(system.extents[0].target, ExtentTarget::Linear { target_data: 2048, .. }));

        b.add_partition("system_ext", "default", ATTR_NONE).unwrap();
        b.resize_partition("system_ext", 128 * 512).unwrap();

        b.resize_partition("system", 1024 * 1024 * 1024 + 64 * 1024).unwrap();
        let system = b.partitions().iter().find(|p| p.name == "system").unwrap();
        let total: u64 = system.extents.iter().map(|e| e.num_sectors).sum();
        assert_eq!(total, 2097152 + 128);
        assert_eq!(system.extents.len(), 2);
        let grown = system.extents[1];
        assert_eq!(grown.num_sectors, 128);
        if let ExtentTarget::Linear { target_data, .. } = grown.target {
            assert!(target_data >= 2099328);
            assert_eq!(target_data % 8, 0);
        } else {
            panic!("expected linear extent");
        }
    }

    #[test]
    fn duplicate_partition_rejected() {
        let mut b = builder();
        b.add_partition("system", "default", ATTR_NONE).unwrap();
        assert!(matches!(b.add_partition("system", "default", ATTR_NONE), Err(Error::DuplicatePartition(_))));
    }

    #[test]
    fn unknown_group_rejected() {
        let mut b = builder();
        assert!(matches!(b.add_partition("system", "nope", ATTR_NONE), Err(Error::UnknownGroup(_))));
    }

    #[test]
    fn group_overflow_on_grow() {
        let mut b = builder();
        b.add_group("small", 8 * 1024 * 1024).unwrap();
        b.add_partition("a", "small", ATTR_NONE).unwrap();
        assert!(matches!(
            b.resize_partition("a", 16 * 1024 * 1024),
            Err(Error::GroupOverflow { .. })
        ));
    }

    #[test]
    fn disk_full_when_device_exhausted() {
        let mut b = MetadataBuilder::new(4 * 1024 * 1024 + 2048 * 512, 65536, 2).unwrap();
        b.add_partition("a", "default", ATTR_NONE).unwrap();
        assert!(matches!(b.resize_partition("a", 16 * 1024 * 1024 * 1024), Err(Error::DiskFull { .. })));
    }

    #[test]
    fn shrink_splits_crossing_extent() {
        let mut b = builder();
        b.add_partition("a", "default", ATTR_NONE).unwrap();
        b.resize_partition("a", 4 * 1024 * 1024).unwrap();
        b.resize_partition("a", 1 * 1024 * 1024).unwrap();
        let a = b.partitions().iter().find(|p| p.name == "a").unwrap();
        let total: u64 = a.extents.iter().map(|e| e.num_sectors).sum();
        assert_eq!(total * 512, 1024 * 1024);
    }

    #[test]
    fn reorder_drops_unmentioned_and_ignores_unknown() {
        let mut b = builder();
        b.add_partition("a", "default", ATTR_NONE).unwrap();
        b.add_partition("b", "default", ATTR_NONE).unwrap();
        b.add_partition("c", "default", ATTR_NONE).unwrap();
        b.reorder_partitions(&["c".to_string(), "missing".to_string(), "a".to_string()]);
        let names: Vec<&str> = b.partitions().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a"]);
    }

    #[test]
    fn resize_block_device_rejects_too_small() {
        let mut b = builder();
        b.add_partition("a", "default", ATTR_NONE).unwrap();
        b.resize_partition("a", 1024 * 1024 * 1024).unwrap();
        assert!(matches!(b.resize_block_device(1024), Err(Error::DeviceTooSmall { .. })));
    }

    #[test]
    fn compact_preserves_sizes_and_extent_count() {
        let mut b = builder();
        b.add_partition("a", "default", ATTR_NONE).unwrap();
        b.add_partition("b", "default", ATTR_NONE).unwrap();
        b.resize_partition("a", 4 * 1024 * 1024).unwrap();
        b.resize_partition("b", 4 * 1024 * 1024).unwrap();
        b.resize_partition("a", 8 * 1024 * 1024).unwrap();

        let before_a_extents = b.partitions()[0].extents.len();
        let before_b_size = b.partitions()[1].size_bytes();
        b.compact_partitions().unwrap();
        assert_eq!(b.partitions()[0].extents.len(), before_a_extents);
        assert_eq!(b.partitions()[1].size_bytes(), before_b_size);
        assert_eq!(b.partitions()[0].size_bytes(), 8 * 1024 * 1024);
    }

    #[test]
    fn remove_group_forbidden_for_default_and_in_use() {
        let mut b = builder();
        assert!(matches!(b.remove_group("default"), Err(Error::InvalidArgument(_))));
        b.add_group("g", 0).unwrap();
        b.add_partition("a", "g", ATTR_NONE).unwrap();
        assert!(matches!(b.remove_group("g"), Err(Error::InvalidArgument(_))));
        b.remove_partition("a");
        assert!(b.remove_group("g").is_ok());
    }
}
