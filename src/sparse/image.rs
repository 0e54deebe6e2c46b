//! In-memory authored/parsed representation of a sparse image (spec §3,
//! §4.B.3): the `SparseImage` builder plus the chunk list invariants.

use super::format::{MAX_CHUNK_DATA_SIZE, MAX_FILL_SKIP_CHUNK_SIZE};
use crate::error::{Error, Result};
use crate::provider::Provider;

/// The payload carried by one non-CRC chunk.
#[derive(Debug, Clone)]
pub enum ChunkPayload {
    Raw(Provider),
    Fill([u8; 4]),
    Skip,
}

/// One authored or parsed chunk, covering `[start_block, start_block +
/// chunk_size)` of the logical image.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub start_block: u32,
    pub chunk_size: u32,
    pub payload: ChunkPayload,
}

impl Chunk {
    pub fn end_block(&self) -> u32 {
        self.start_block + self.chunk_size
    }
}

/// An authored or parsed sparse image: a block size, a declared total
/// block count, and an ascending, non-overlapping list of chunks (spec §3
/// invariants). CRC chunks are not stored here — they're a serialization
/// detail synthesized from the chunk list at write time (spec §4.B.4).
#[derive(Debug, Clone)]
pub struct SparseImage {
    pub block_size: u32,
    pub total_blocks: u32,
    pub(crate) chunks: Vec<Chunk>,
}

impl SparseImage {
    /// Construct an empty builder. `total_blocks = ceil(total_bytes /
    /// block_size)` (spec §4.B.3).
    pub fn new(block_size: u32, total_bytes: u64) -> Result<Self> {
        validate_block_size(block_size)?;
        let total_blocks = total_bytes.div_ceil(block_size as u64);
        let total_blocks: u32 = total_blocks
            .try_into()
            .map_err(|_| Error::InvalidArgument("total_bytes too large for block_size".into()))?;
        Ok(SparseImage { block_size, total_blocks, chunks: Vec::new() })
    }

    pub(crate) fn from_parts(block_size: u32, total_blocks: u32, chunks: Vec<Chunk>) -> Self {
        SparseImage { block_size, total_blocks, chunks }
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Fill gaps between chunks with synthesized Skip chunks and, if the
    /// authored chunks don't cover the full declared `total_blocks`,
    /// append a trailing Skip — or raise the returned total if authored
    /// chunks overshoot it (spec §4.B.4, §9: "serialization must never
    /// truncate authored data; it may raise total_blocks to match").
    pub(crate) fn materialize(&self) -> (u32, Vec<Chunk>) {
        let mut out = Vec::with_capacity(self.chunks.len() + 2);
        let mut cursor: u32 = 0;
        for c in &self.chunks {
            if c.start_block > cursor {
                out.push(Chunk {
                    start_block: cursor,
                    chunk_size: c.start_block - cursor,
                    payload: ChunkPayload::Skip,
                });
            }
            out.push(c.clone());
            cursor = c.end_block();
        }
        let total_blocks = if cursor > self.total_blocks {
            cursor
        } else {
            if cursor < self.total_blocks {
                out.push(Chunk {
                    start_block: cursor,
                    chunk_size: self.total_blocks - cursor,
                    payload: ChunkPayload::Skip,
                });
            }
            self.total_blocks
        };
        (total_blocks, out)
    }

    /// Max end-block of any inserted chunk; 0 if none (spec §4.B.3).
    pub fn current_block(&self) -> u32 {
        self.chunks.iter().map(Chunk::end_block).max().unwrap_or(0)
    }

    fn check_overlap(&self, start_block: u32, chunk_size: u32) -> Result<()> {
        let end_block = start_block + chunk_size;
        for c in &self.chunks {
            if start_block < c.end_block() && c.start_block < end_block {
                return Err(Error::Overlap { at_block: start_block as u64 });
            }
        }
        Ok(())
    }

    fn insert_sorted(&mut self, chunk: Chunk) {
        let pos = self
            .chunks
            .partition_point(|c| c.start_block < chunk.start_block);
        self.chunks.insert(pos, chunk);
    }

    /// Add a Raw chunk backed by `provider`, splitting into multiple
    /// consecutive chunks if the payload exceeds `MAX_CHUNK_DATA_SIZE`
    /// (spec §4.B.3).
    pub fn add_raw(&mut self, provider: Provider, at_block: Option<u32>) -> Result<()> {
        let start_block = at_block.unwrap_or_else(|| self.current_block());
        let total_len = provider.len();
        if total_len == 0 {
            return Ok(());
        }
        let block_size = self.block_size as u64;
        let max_blocks_per_chunk = (MAX_CHUNK_DATA_SIZE / block_size).max(1);

        let mut offset = 0u64;
        let mut block_cursor = start_block;
        while offset < total_len {
            let remaining = total_len - offset;
            let remaining_blocks = remaining.div_ceil(block_size);
            let this_blocks = remaining_blocks.min(max_blocks_per_chunk);
            let this_len = (this_blocks * block_size).min(remaining);
            let chunk_size: u32 = this_blocks
                .try_into()
                .map_err(|_| Error::InvalidArgument("chunk too large".into()))?;
            self.check_overlap(block_cursor, chunk_size)?;
            let sub = provider.sub_provider(offset, this_len)?;
            self.insert_sorted(Chunk {
                start_block: block_cursor,
                chunk_size,
                payload: ChunkPayload::Raw(sub),
            });
            block_cursor += chunk_size;
            offset += this_len;
        }
        Ok(())
    }

    /// Add a Fill chunk of `size_bytes`, repeating `value` every 4 bytes.
    /// `size_bytes` must be a multiple of `block_size`. Split across
    /// multiple chunks if it exceeds either size cap (spec §4.B.3).
    pub fn add_fill(&mut self, value: [u8; 4], size_bytes: u64, at_block: Option<u32>) -> Result<()> {
        let start_block = at_block.unwrap_or_else(|| self.current_block());
        self.add_homogeneous(size_bytes, start_block, |chunk_size| Chunk {
            start_block: 0,
            chunk_size,
            payload: ChunkPayload::Fill(value),
        })
    }

    /// Add a Skip ("don't care") chunk of `size_bytes`.
    pub fn add_skip(&mut self, size_bytes: u64, at_block: Option<u32>) -> Result<()> {
        let start_block = at_block.unwrap_or_else(|| self.current_block());
        self.add_homogeneous(size_bytes, start_block, |chunk_size| Chunk {
            start_block: 0,
            chunk_size,
            payload: ChunkPayload::Skip,
        })
    }

    fn add_homogeneous(
        &mut self,
        size_bytes: u64,
        start_block: u32,
        make: impl Fn(u32) -> Chunk,
    ) -> Result<()> {
        let block_size = self.block_size as u64;
        if size_bytes % block_size != 0 {
            return Err(Error::InvalidArgument(format!(
                "size_bytes {size_bytes} is not a multiple of block_size {block_size}"
            )));
        }
        let total_blocks = size_bytes / block_size;
        let cap = (MAX_CHUNK_DATA_SIZE / block_size).min(MAX_FILL_SKIP_CHUNK_SIZE as u64).max(1);
        let mut remaining = total_blocks;
        let mut cursor = start_block;
        while remaining > 0 {
            let this_blocks = remaining.min(cap);
            let chunk_size: u32 = this_blocks
                .try_into()
                .map_err(|_| Error::InvalidArgument("chunk too large".into()))?;
            self.check_overlap(cursor, chunk_size)?;
            let mut chunk = make(chunk_size);
            chunk.start_block = cursor;
            self.insert_sorted(chunk);
            cursor += chunk_size;
            remaining -= this_blocks;
        }
        Ok(())
    }
}

pub(crate) fn validate_block_size(block_size: u32) -> Result<()> {
    if block_size == 0 || block_size % 4 != 0 {
        return Err(Error::BadHeader(format!(
            "block_size must be a non-zero multiple of 4, got {block_size}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_computes_total_blocks() {
        let img = SparseImage::new(4096, 12288).unwrap();
        assert_eq!(img.total_blocks, 3);
        assert_eq!(img.current_block(), 0);
    }

    #[test]
    fn rejects_bad_block_size() {
        assert!(SparseImage::new(0, 100).is_err());
        assert!(SparseImage::new(5, 100).is_err());
        assert!(SparseImage::new(4, 100).is_ok());
    }

    #[test]
    fn add_raw_fill_skip_append_in_order() {
        let mut img = SparseImage::new(4096, 12288).unwrap();
        img.add_raw(Provider::from_bytes(vec![1u8; 4096]), None).unwrap();
        img.add_fill([0xEF, 0xBE, 0xAD, 0xDE], 4096, None).unwrap();
        img.add_skip(4096, None).unwrap();
        assert_eq!(img.chunks().len(), 3);
        assert_eq!(img.current_block(), 3);
    }

    #[test]
    fn overlap_is_rejected() {
        let mut img = SparseImage::new(4096, 8192).unwrap();
        img.add_raw(Provider::from_bytes(vec![0u8; 4096]), Some(0)).unwrap();
        let err = img.add_skip(4096, Some(0));
        assert!(matches!(err, Err(Error::Overlap { .. })));
    }

    #[test]
    fn fill_size_must_be_block_multiple() {
        let mut img = SparseImage::new(4096, 8192).unwrap();
        assert!(img.add_fill([0; 4], 100, None).is_err());
    }

    #[test]
    fn large_raw_chunk_is_split() {
        let mut img = SparseImage::new(4096, 200 * 1024 * 1024).unwrap();
        let data = vec![0xAAu8; 100 * 1024 * 1024];
        img.add_raw(Provider::from_bytes(data), None).unwrap();
        assert!(img.chunks().len() > 1);
        let total: u32 = img.chunks().iter().map(|c| c.chunk_size).sum();
        assert_eq!(total as u64, 100 * 1024 * 1024 / 4096);
    }
}
