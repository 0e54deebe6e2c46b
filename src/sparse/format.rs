//! Bit-exact on-disk layout of the sparse image format (spec §4.B.1, §6).
//!
//! All structs are little-endian packed with no padding, read/written
//! field-by-field via `binrw` the way the teacher crate's `ext4_h.rs`
//! derives `BinRead`/`BinWrite` for its superblock and inode structs.

use binrw::binrw;

pub const SPARSE_HEADER_MAGIC: u32 = 0xED26FF3A;
pub const SPARSE_HEADER_MAJOR_VERSION: u16 = 1;
pub const SPARSE_HEADER_SIZE: u16 = 28;
pub const SPARSE_CHUNK_HEADER_SIZE: u16 = 12;

pub const CHUNK_TYPE_RAW: u16 = 0xCAC1;
pub const CHUNK_TYPE_FILL: u16 = 0xCAC2;
pub const CHUNK_TYPE_SKIP: u16 = 0xCAC3;
pub const CHUNK_TYPE_CRC32: u16 = 0xCAC4;

/// Largest payload a single authored chunk may carry before the builder
/// splits it into multiple consecutive chunks (spec §4.B.3).
pub const MAX_CHUNK_DATA_SIZE: u64 = 64 * 1024 * 1024;
/// Per-chunk cap on `chunk_size` (in blocks) for Fill/Skip chunks.
pub const MAX_FILL_SKIP_CHUNK_SIZE: u32 = 0x00FF_FFFF;

/// The 28-byte sparse file header.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SparseHeader {
    pub magic: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub file_header_size: u16,
    pub chunk_header_size: u16,
    pub block_size: u32,
    pub total_blocks: u32,
    pub total_chunks: u32,
    pub image_checksum: u32,
}

impl SparseHeader {
    pub fn new(block_size: u32, total_blocks: u32, total_chunks: u32, image_checksum: u32) -> Self {
        SparseHeader {
            magic: SPARSE_HEADER_MAGIC,
            major_version: SPARSE_HEADER_MAJOR_VERSION,
            minor_version: 0,
            file_header_size: SPARSE_HEADER_SIZE,
            chunk_header_size: SPARSE_CHUNK_HEADER_SIZE,
            block_size,
            total_blocks,
            total_chunks,
            image_checksum,
        }
    }
}

/// The 12-byte chunk header preceding every chunk's payload.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub chunk_type: u16,
    pub reserved: u16,
    pub chunk_size: u32,
    pub total_size: u32,
}

impl ChunkHeader {
    pub fn new(chunk_type: u16, chunk_size: u32, total_size: u32) -> Self {
        ChunkHeader { chunk_type, reserved: 0, chunk_size, total_size }
    }
}
