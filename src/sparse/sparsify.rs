//! Classify a raw image into coalesced Raw/Fill/Skip runs (spec §4.B.7).

use super::image::SparseImage;
use crate::error::Result;
use crate::provider::Provider;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// How to represent an all-zero block run. `Hole` emits a Skip chunk
/// ("don't care"); `Normal` emits an explicit Fill(0) chunk so the region
/// is not left as a hole in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoleMode {
    Hole,
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Zero,
    Fill([u8; 4]),
    Raw,
}

fn classify(block: &[u8]) -> BlockKind {
    if block.iter().all(|&b| b == 0) {
        return BlockKind::Zero;
    }
    if block.len() % 4 == 0 {
        let first: [u8; 4] = block[0..4].try_into().unwrap();
        if block.chunks_exact(4).all(|w| w == first) {
            return BlockKind::Fill(first);
        }
    }
    BlockKind::Raw
}

pub fn sparsify<R: Read + Seek>(
    reader: &mut R,
    path: Option<&Path>,
    block_size: u32,
    hole_mode: HoleMode,
) -> Result<SparseImage> {
    let total_len = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(0))?;
    let mut image = SparseImage::new(block_size, total_len)?;

    let bs = block_size as usize;
    let mut block_buf = vec![0u8; bs];
    let mut offset = 0u64;
    let mut run_start_offset = 0u64;
    let mut run_kind: Option<BlockKind> = None;
    let mut run_blocks: u64 = 0;

    loop {
        reader.seek(SeekFrom::Start(offset))?;
        let n = read_exact_or_zero(reader, &mut block_buf)?;
        if n == 0 {
            break;
        }
        if n < bs {
            for b in &mut block_buf[n..] {
                *b = 0;
            }
        }
        let kind = classify(&block_buf);
        match run_kind {
            Some(k) if k == kind => {
                run_blocks += 1;
            }
            Some(k) => {
                flush_run(reader, path, &mut image, bs, hole_mode, k, run_start_offset, run_blocks)?;
                run_kind = Some(kind);
                run_start_offset = offset;
                run_blocks = 1;
            }
            None => {
                run_kind = Some(kind);
                run_start_offset = offset;
                run_blocks = 1;
            }
        }
        offset += bs as u64;
        if offset >= total_len {
            break;
        }
    }
    if let Some(k) = run_kind {
        flush_run(reader, path, &mut image, bs, hole_mode, k, run_start_offset, run_blocks)?;
    }

    Ok(image)
}

#[allow(clippy::too_many_arguments)]
fn flush_run<R: Read + Seek>(
    reader: &mut R,
    path: Option<&Path>,
    image: &mut SparseImage,
    bs: usize,
    hole_mode: HoleMode,
    kind: BlockKind,
    start_offset: u64,
    blocks: u64,
) -> Result<()> {
    if blocks == 0 {
        return Ok(());
    }
    let len = blocks * bs as u64;
    match kind {
        BlockKind::Zero => match hole_mode {
            HoleMode::Hole => image.add_skip(len, None)?,
            HoleMode::Normal => image.add_fill([0; 4], len, None)?,
        },
        BlockKind::Fill(value) => image.add_fill(value, len, None)?,
        BlockKind::Raw => {
            let provider = match path {
                Some(p) => Provider::from_file_region(p, start_offset, len),
                None => {
                    let mut buf = vec![0u8; len as usize];
                    reader.seek(SeekFrom::Start(start_offset))?;
                    read_exact_or_zero(reader, &mut buf)?;
                    Provider::from_bytes(buf)
                }
            };
            image.add_raw(provider, None)?;
        }
    }
    Ok(())
}

/// Like `read_exact` but treats a short final read as success, returning
/// the number of bytes actually read (0 at true EOF).
fn read_exact_or_zero<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        let n = reader.read(&mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparse::serialize::flatten_to_vec;
    use std::io::Cursor;

    #[test]
    fn sparsify_then_flatten_round_trips() {
        let block_size = 16u32;
        let mut raw = Vec::new();
        raw.extend(std::iter::repeat_n(0u8, 16)); // zero block
        raw.extend(std::iter::repeat_n(0xAB, 16)); // fill block
        raw.extend((0..16u8).collect::<Vec<_>>()); // raw block
        raw.extend(std::iter::repeat_n(0u8, 5)); // partial trailing block

        let mut cursor = Cursor::new(raw.clone());
        let image = sparsify(&mut cursor, None, block_size, HoleMode::Hole).unwrap();
        let flat = flatten_to_vec(&image).unwrap();

        let mut expected = raw.clone();
        expected.resize(64, 0);
        assert_eq!(flat, expected);
    }
}
