//! Splitting a sparse image into size-bounded pieces (spec §4.B.5).

use super::format::{SPARSE_CHUNK_HEADER_SIZE, SPARSE_HEADER_SIZE};
use super::image::{Chunk, ChunkPayload, SparseImage};
use crate::error::{Error, Result};
use crate::logger::Logger;
use std::collections::VecDeque;

const HEADER_OVERHEAD: u64 = SPARSE_HEADER_SIZE as u64;
const TRAILING_SKIP_OVERHEAD: u64 = SPARSE_CHUNK_HEADER_SIZE as u64;
const CRC_CHUNK_OVERHEAD: u64 = SPARSE_CHUNK_HEADER_SIZE as u64 + 4;
const GAP_HEADER_OVERHEAD: u64 = SPARSE_CHUNK_HEADER_SIZE as u64;

/// Split `image` into pieces each serializing to at most `max_bytes`, such
/// that their flat images concatenate (by block coverage) to the original.
/// Every piece declares the same `total_blocks` and fills the blocks it
/// doesn't carry with Skip chunks (spec §4.B.5).
///
/// The split point within an oversized entry is picked by the heuristic
/// described in spec §9 ("do not split unless the remaining space exceeds
/// `file_limit / 8`") — this avoids emitting tiny tail fragments, but it is
/// a heuristic, not a correctness requirement: any split that respects
/// `max_bytes` and reconstructs the same flat image is conformant.
pub fn resparse(image: &SparseImage, max_bytes: u64, logger: &Logger) -> Result<Vec<SparseImage>> {
    let overhead = HEADER_OVERHEAD + TRAILING_SKIP_OVERHEAD + CRC_CHUNK_OVERHEAD;
    if max_bytes <= overhead {
        return Err(Error::CannotSplit(format!(
            "max_bytes {max_bytes} does not exceed per-piece overhead {overhead}"
        )));
    }
    let file_limit = max_bytes - overhead;

    let (total_blocks, materialized) = image.materialize();
    let block_size = image.block_size as u64;

    let mut entries: VecDeque<Chunk> = materialized
        .into_iter()
        .filter(|c| !matches!(c.payload, ChunkPayload::Skip))
        .collect();

    if entries.is_empty() {
        let mut piece = SparseImage::new(image.block_size, total_blocks as u64 * block_size)?;
        if total_blocks > 0 {
            piece.add_skip(total_blocks as u64 * block_size, Some(0))?;
        }
        return Ok(vec![piece]);
    }

    let mut pieces: Vec<Vec<Chunk>> = Vec::new();
    let mut current: Vec<Chunk> = Vec::new();
    let mut accumulated: u64 = 0;
    let mut last_end_block: Option<u32> = None;

    while let Some(entry) = entries.pop_front() {
        let gap_overhead = match last_end_block {
            Some(end) if end != entry.start_block => GAP_HEADER_OVERHEAD,
            _ => 0,
        };
        let entry_size = entry_byte_cost(&entry, block_size);
        let needed = accumulated + gap_overhead + entry_size;

        if needed <= file_limit {
            last_end_block = Some(entry.end_block());
            accumulated = needed;
            current.push(entry);
            continue;
        }

        let available = file_limit.saturating_sub(accumulated + gap_overhead + TRAILING_SKIP_OVERHEAD);
        let can_split = matches!(entry.payload, ChunkPayload::Raw(_))
            && (current.is_empty() || available > file_limit / 8);

        if can_split {
            let blocks_to_take = (available / block_size) as u32;
            if blocks_to_take == 0 {
                if current.is_empty() {
                    return Err(Error::CannotSplit(
                        "single entry cannot be split to fit max_bytes".into(),
                    ));
                }
                logger.warn("resparse: closing piece early to make room for the next entry");
                entries.push_front(entry);
                pieces.push(std::mem::take(&mut current));
                accumulated = 0;
                last_end_block = None;
                continue;
            }
            let ChunkPayload::Raw(provider) = &entry.payload else {
                unreachable!("can_split requires a Raw payload");
            };
            let take_len = blocks_to_take as u64 * block_size;
            let head_provider = provider.sub_provider(0, take_len)?;
            let remaining_blocks = entry.chunk_size - blocks_to_take;
            if remaining_blocks > 0 {
                let tail_provider = provider.sub_provider(take_len, provider.len() - take_len)?;
                entries.push_front(Chunk {
                    start_block: entry.start_block + blocks_to_take,
                    chunk_size: remaining_blocks,
                    payload: ChunkPayload::Raw(tail_provider),
                });
            }
            current.push(Chunk {
                start_block: entry.start_block,
                chunk_size: blocks_to_take,
                payload: ChunkPayload::Raw(head_provider),
            });
            pieces.push(std::mem::take(&mut current));
            accumulated = 0;
            last_end_block = None;
            continue;
        }

        if current.is_empty() {
            return Err(Error::CannotSplit(
                "single entry exceeds max_bytes and cannot be split".into(),
            ));
        }
        entries.push_front(entry);
        pieces.push(std::mem::take(&mut current));
        accumulated = 0;
        last_end_block = None;
    }

    if !current.is_empty() {
        pieces.push(current);
    }

    pieces
        .into_iter()
        .map(|chunks| build_piece(image.block_size, total_blocks, chunks))
        .collect()
}

/// Byte cost of one data entry as it would appear serialized (spec §4.B.5:
/// "Raw: `12 + chunk_size*block_size`; Fill: `16`").
fn entry_byte_cost(entry: &Chunk, block_size: u64) -> u64 {
    match &entry.payload {
        ChunkPayload::Raw(_) => SPARSE_CHUNK_HEADER_SIZE as u64 + entry.chunk_size as u64 * block_size,
        ChunkPayload::Fill(_) => SPARSE_CHUNK_HEADER_SIZE as u64 + 4,
        ChunkPayload::Skip => 0,
    }
}

fn build_piece(block_size: u32, total_blocks: u32, chunks: Vec<Chunk>) -> Result<SparseImage> {
    let mut piece = SparseImage::new(block_size, total_blocks as u64 * block_size as u64)?;
    for chunk in chunks {
        match chunk.payload {
            ChunkPayload::Raw(provider) => piece.add_raw(provider, Some(chunk.start_block))?,
            ChunkPayload::Fill(value) => {
                piece.add_fill(value, chunk.chunk_size as u64 * block_size as u64, Some(chunk.start_block))?
            }
            ChunkPayload::Skip => {}
        }
    }
    Ok(piece)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Provider;

    #[test]
    fn rejects_max_bytes_below_overhead() {
        let image = SparseImage::new(4096, 4096).unwrap();
        let err = resparse(&image, 10, &Logger::default());
        assert!(matches!(err, Err(Error::CannotSplit(_))));
    }

    #[test]
    fn empty_image_produces_single_skip_piece() {
        let image = SparseImage::new(4096, 3 * 4096).unwrap();
        let pieces = resparse(&image, 1_000_000, &Logger::default()).unwrap();
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].total_blocks, 3);
    }

    #[test]
    fn small_image_fits_in_one_piece() {
        let mut image = SparseImage::new(4096, 3 * 4096).unwrap();
        image.add_raw(Provider::from_bytes(vec![1u8; 4096]), Some(0)).unwrap();
        image.add_fill([2, 2, 2, 2], 4096, Some(1)).unwrap();
        let pieces = resparse(&image, 1_000_000, &Logger::default()).unwrap();
        assert_eq!(pieces.len(), 1);
    }

    #[test]
    fn scenario_s4_hundred_mib_raw_splits_into_three_pieces_of_40_mib() {
        let block_size: u32 = 4096;
        let total_bytes = 100 * 1024 * 1024u64;
        let mut image = SparseImage::new(block_size, total_bytes).unwrap();
        image
            .add_raw(Provider::from_bytes(vec![0x5Au8; total_bytes as usize]), Some(0))
            .unwrap();

        let max_file_size = 40 * 1024 * 1024u64;
        let pieces = resparse(&image, max_file_size, &Logger::default()).unwrap();

        assert_eq!(pieces.len(), 3);
        for piece in &pieces {
            assert_eq!(piece.total_blocks, (total_bytes / block_size as u64) as u32);
            let len = super::super::serialize::length(piece, true, true);
            assert!(len <= max_file_size, "piece length {len} exceeds {max_file_size}");
        }

        let mut reconstructed = Vec::new();
        for piece in &pieces {
            let flat = super::super::serialize::flatten_to_vec(piece).unwrap();
            if reconstructed.is_empty() {
                reconstructed = flat;
            } else {
                for (i, byte) in flat.iter().enumerate() {
                    if *byte != 0 {
                        reconstructed[i] = *byte;
                    }
                }
            }
        }
        assert_eq!(reconstructed, vec![0x5Au8; total_bytes as usize]);
    }
}
