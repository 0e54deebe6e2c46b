//! Sparse and flat serialization (spec §4.B.4).

use super::format::*;
use super::image::{Chunk, ChunkPayload, SparseImage};
use crate::checksum::Crc32;
use crate::error::Result;
use binrw::BinWriterExt;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Cursor, Seek, SeekFrom, Write};

/// Emit `image` as a bit-exact sparse container (spec §4.B.4 "Sparse
/// output"). When `include_crc` is set, a trailing CRC32 chunk is written
/// and the header's `image_checksum` field is patched in place afterwards.
/// When `gzip` is set the whole output is wrapped in a gzip stream (spec:
/// "optional gzip wrapper") — gzip's own compressed stream isn't seekable,
/// so the body is built in memory first and the compressed bytes are
/// copied to `sink` afterwards.
pub fn write<W: Write + Seek>(
    sink: &mut W,
    image: &SparseImage,
    gzip: bool,
    include_crc: bool,
) -> Result<()> {
    if gzip {
        let mut body = Cursor::new(Vec::new());
        write_sparse_body(&mut body, image, include_crc)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&body.into_inner())?;
        let compressed = encoder.finish()?;
        sink.write_all(&compressed)?;
        Ok(())
    } else {
        write_sparse_body(sink, image, include_crc)
    }
}

fn write_sparse_body<W: Write + Seek>(
    sink: &mut W,
    image: &SparseImage,
    include_crc: bool,
) -> Result<()> {
    let (total_blocks, chunks) = image.materialize();
    let total_chunks = chunks.len() as u32 + if include_crc { 1 } else { 0 };

    let header_pos = sink.stream_position()?;
    let header = SparseHeader::new(image.block_size, total_blocks, total_chunks, 0);
    sink.write_le(&header)?;

    let mut crc = Crc32::new();
    for chunk in &chunks {
        write_chunk(sink, image.block_size, chunk, include_crc, &mut crc)?;
    }

    let final_crc = crc.finalize();
    if include_crc {
        let crc_header = ChunkHeader::new(CHUNK_TYPE_CRC32, 0, SPARSE_CHUNK_HEADER_SIZE as u32 + 4);
        sink.write_le(&crc_header)?;
        sink.write_all(&final_crc.to_le_bytes())?;
    }

    if include_crc {
        let end_pos = sink.stream_position()?;
        sink.seek(SeekFrom::Start(header_pos))?;
        let patched = SparseHeader::new(image.block_size, total_blocks, total_chunks, final_crc);
        sink.write_le(&patched)?;
        sink.seek(SeekFrom::Start(end_pos))?;
    }

    Ok(())
}

fn write_chunk<W: Write>(
    sink: &mut W,
    block_size: u32,
    chunk: &Chunk,
    include_crc: bool,
    crc: &mut Crc32,
) -> Result<()> {
    let payload_len = chunk.chunk_size as u64 * block_size as u64;
    match &chunk.payload {
        ChunkPayload::Raw(provider) => {
            let header = ChunkHeader::new(
                CHUNK_TYPE_RAW,
                chunk.chunk_size,
                SPARSE_CHUNK_HEADER_SIZE as u32 + payload_len as u32,
            );
            sink.write_le(&header)?;
            let mut remaining = payload_len;
            let mut offset = 0u64;
            let mut buf = vec![0u8; (payload_len.min(1024 * 1024)).max(1) as usize];
            while remaining > 0 {
                let take = remaining.min(buf.len() as u64) as usize;
                provider.read_exact_zero_padded(offset, &mut buf[..take])?;
                sink.write_all(&buf[..take])?;
                if include_crc {
                    crc.update(&buf[..take]);
                }
                offset += take as u64;
                remaining -= take as u64;
            }
        }
        ChunkPayload::Fill(value) => {
            let header = ChunkHeader::new(CHUNK_TYPE_FILL, chunk.chunk_size, SPARSE_CHUNK_HEADER_SIZE as u32 + 4);
            sink.write_le(&header)?;
            sink.write_all(value)?;
            if include_crc {
                crc.update_fill(*value, payload_len);
            }
        }
        ChunkPayload::Skip => {
            let header = ChunkHeader::new(CHUNK_TYPE_SKIP, chunk.chunk_size, SPARSE_CHUNK_HEADER_SIZE as u32);
            sink.write_le(&header)?;
            if include_crc {
                crc.update_zeros(payload_len);
            }
        }
    }
    Ok(())
}

/// Emit `image` as a flat (fully expanded) raw image (spec §4.B.4 "Flat
/// output"). When `sparse_mode` is true, Skip regions are produced by
/// seeking past them instead of writing zero bytes, leaving a hole in a
/// sparse-file-aware destination.
pub fn write_flat<W: Write + Seek>(sink: &mut W, image: &SparseImage, sparse_mode: bool) -> Result<()> {
    let (total_blocks, chunks) = image.materialize();
    let block_size = image.block_size as u64;

    for chunk in &chunks {
        let payload_len = chunk.chunk_size as u64 * block_size;
        match &chunk.payload {
            ChunkPayload::Raw(provider) => {
                let mut remaining = payload_len;
                let mut offset = 0u64;
                let mut buf = vec![0u8; (payload_len.min(1024 * 1024)).max(1) as usize];
                while remaining > 0 {
                    let take = remaining.min(buf.len() as u64) as usize;
                    provider.read_exact_zero_padded(offset, &mut buf[..take])?;
                    sink.write_all(&buf[..take])?;
                    offset += take as u64;
                    remaining -= take as u64;
                }
            }
            ChunkPayload::Fill(value) => {
                write_repeated(sink, *value, payload_len)?;
            }
            ChunkPayload::Skip => {
                if sparse_mode {
                    sink.seek(SeekFrom::Current(payload_len as i64))?;
                } else {
                    write_repeated(sink, [0; 4], payload_len)?;
                }
            }
        }
    }

    let final_len = total_blocks as u64 * block_size;
    let current = sink.stream_position()?;
    if current < final_len {
        if sparse_mode {
            sink.seek(SeekFrom::Start(final_len - 1))?;
            sink.write_all(&[0])?;
        } else {
            write_repeated(sink, [0; 4], final_len - current)?;
        }
    }
    Ok(())
}

fn write_repeated<W: Write>(sink: &mut W, pattern: [u8; 4], len: u64) -> Result<()> {
    const CHUNK_LEN: usize = 1024 * 1024;
    let chunk: Vec<u8> = pattern.iter().copied().cycle().take(CHUNK_LEN).collect();
    let mut remaining = len;
    while remaining > 0 {
        let take = remaining.min(chunk.len() as u64) as usize;
        sink.write_all(&chunk[..take])?;
        remaining -= take as u64;
    }
    Ok(())
}

/// Materialize the full flat image into memory. A convenience used by
/// tests and by small images; not intended for multi-gigabyte images.
pub(crate) fn flatten_to_vec(image: &SparseImage) -> Result<Vec<u8>> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    write_flat(&mut cursor, image, false)?;
    Ok(cursor.into_inner())
}

/// The byte length of `image` when serialized in the requested mode
/// (spec §6: `length(sparse, include_crc)`), without actually writing it.
pub fn length(image: &SparseImage, sparse: bool, include_crc: bool) -> u64 {
    let (total_blocks, chunks) = image.materialize();
    let block_size = image.block_size as u64;
    if !sparse {
        return total_blocks as u64 * block_size;
    }
    let mut len = SPARSE_HEADER_SIZE as u64;
    for chunk in &chunks {
        len += SPARSE_CHUNK_HEADER_SIZE as u64;
        match &chunk.payload {
            ChunkPayload::Raw(_) => len += chunk.chunk_size as u64 * block_size,
            ChunkPayload::Fill(_) => len += 4,
            ChunkPayload::Skip => {}
        }
    }
    if include_crc {
        len += SPARSE_CHUNK_HEADER_SIZE as u64 + 4;
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::Logger;
    use crate::provider::Provider;
    use crate::sparse::parse::from_stream;
    use std::io::Cursor;

    #[test]
    fn scenario_s1_tiny_sparse_round_trip() {
        let mut image = SparseImage::new(4096, 12288).unwrap();
        image.add_raw(Provider::from_bytes(vec![0x01u8; 4096]), None).unwrap();
        image.add_fill([0xEF, 0xBE, 0xAD, 0xDE], 4096, None).unwrap();
        image.add_skip(4096, None).unwrap();

        let mut buf = Cursor::new(Vec::new());
        write(&mut buf, &image, false, true).unwrap();
        let bytes = buf.into_inner();

        assert_eq!(&bytes[0..4], &[0x3A, 0xFF, 0x26, 0xED]);
        let total_chunks = u32::from_le_bytes(bytes[16..20].try_into().unwrap());
        assert_eq!(total_chunks, 4);

        let first_header = &bytes[28..40];
        assert_eq!(first_header, &[0xC1, 0xCA, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x00]);
        assert_eq!(&bytes[40..40 + 4096], &vec![0x01u8; 4096][..]);

        let second_start = 40 + 4096;
        let second_header = &bytes[second_start..second_start + 12];
        assert_eq!(second_header, &[0xC2, 0xCA, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00]);
        assert_eq!(&bytes[second_start + 12..second_start + 16], &[0xEF, 0xBE, 0xAD, 0xDE]);

        let third_start = second_start + 16;
        let third_header = &bytes[third_start..third_start + 12];
        assert_eq!(third_header, &[0xC3, 0xCA, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x0C, 0x00, 0x00, 0x00]);

        let fourth_start = third_start + 12;
        let fourth_header = &bytes[fourth_start..fourth_start + 12];
        assert_eq!(fourth_header, &[0xC4, 0xCA, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00]);

        let mut expected_flat = vec![0x01u8; 4096];
        expected_flat.extend(std::iter::repeat_n([0xEF, 0xBE, 0xAD, 0xDE], 1024).flatten());
        expected_flat.extend(std::iter::repeat_n(0u8, 4096));
        let mut crc = Crc32::new();
        crc.update(&expected_flat);
        let expected_crc = crc.finalize();
        let stored_crc = u32::from_le_bytes(bytes[fourth_start + 12..fourth_start + 16].try_into().unwrap());
        assert_eq!(stored_crc, expected_crc);
    }

    #[test]
    fn round_trip_parse_serialize_parse() {
        let mut image = SparseImage::new(4096, 3 * 4096).unwrap();
        image.add_raw(Provider::from_bytes(vec![7u8; 4096]), None).unwrap();
        image.add_fill([1, 2, 3, 4], 4096, None).unwrap();
        image.add_skip(4096, None).unwrap();

        let mut buf = Cursor::new(Vec::new());
        write(&mut buf, &image, false, true).unwrap();
        buf.set_position(0);
        let reparsed = from_stream(&mut buf, true, &Logger::default()).unwrap();

        assert_eq!(reparsed.block_size, image.block_size);
        assert_eq!(reparsed.total_blocks, image.total_blocks);
        assert_eq!(reparsed.chunks().len(), 3);
    }

    #[test]
    fn flat_output_matches_virtual_image() {
        let mut image = SparseImage::new(8, 32).unwrap();
        image.add_raw(Provider::from_bytes(vec![9u8; 8]), Some(0)).unwrap();
        image.add_fill([1, 1, 1, 1], 8, Some(2)).unwrap();

        let flat = flatten_to_vec(&image).unwrap();
        assert_eq!(flat.len(), 32);
        assert_eq!(&flat[0..8], &[9u8; 8]);
        assert_eq!(&flat[8..16], &[0u8; 8]);
        assert_eq!(&flat[16..24], &[1u8; 8]);
        assert_eq!(&flat[24..32], &[0u8; 8]);
    }

    #[test]
    fn total_blocks_raised_when_authored_chunks_overshoot() {
        let mut image = SparseImage::new(4, 8).unwrap(); // total_blocks = 2
        image.add_raw(Provider::from_bytes(vec![1u8; 4 * 5]), Some(0)).unwrap(); // 5 blocks
        let (total_blocks, chunks) = image.materialize();
        assert_eq!(total_blocks, 5);
        assert_eq!(chunks.len(), 1);
    }
}
