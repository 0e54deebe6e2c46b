//! Sparse image parsing (spec §4.B.2).

use super::format::*;
use super::image::{validate_block_size, Chunk, ChunkPayload, SparseImage};
use crate::checksum::Crc32;
use crate::error::{Error, Result};
use crate::logger::Logger;
use crate::provider::Provider;
use binrw::BinReaderExt;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::Path;

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

/// The subset of the sparse header useful without parsing the whole image,
/// returned by `peek_header`.
#[derive(Debug, Clone, Copy)]
pub struct SparseHeaderInfo {
    pub block_size: u32,
    pub total_blocks: u32,
    pub total_chunks: u32,
    pub image_checksum: u32,
}

/// Read just the file header and report its fields without walking any
/// chunks (spec §6: `peek_header(path)`).
pub fn peek_header(path: &Path) -> Result<SparseHeaderInfo> {
    let mut file = std::fs::File::open(path).map_err(|e| Error::IoPath(path.to_path_buf(), e))?;
    let header: SparseHeader = file.read_le().map_err(map_binrw_err(path))?;
    validate_header(&header)?;
    Ok(SparseHeaderInfo {
        block_size: header.block_size,
        total_blocks: header.total_blocks,
        total_chunks: header.total_chunks,
        image_checksum: header.image_checksum,
    })
}

fn map_binrw_err(path: &Path) -> impl Fn(binrw::Error) -> Error + '_ {
    move |e| match e {
        binrw::Error::Io(io) => Error::IoPath(path.to_path_buf(), io),
        other => Error::BadHeader(other.to_string()),
    }
}

fn validate_header(header: &SparseHeader) -> Result<()> {
    if header.magic != SPARSE_HEADER_MAGIC {
        return Err(Error::BadMagic { what: "sparse header", found: header.magic as u64 });
    }
    if header.major_version != SPARSE_HEADER_MAJOR_VERSION {
        return Err(Error::BadHeader(format!(
            "unsupported major_version {}",
            header.major_version
        )));
    }
    validate_block_size(header.block_size)?;
    if (header.file_header_size as u16) < SPARSE_HEADER_SIZE {
        return Err(Error::BadHeader(format!(
            "file_header_size {} smaller than minimum {}",
            header.file_header_size, SPARSE_HEADER_SIZE
        )));
    }
    Ok(())
}

fn skip(reader: &mut impl Seek, n: u64) -> Result<()> {
    if n > 0 {
        reader.seek(SeekFrom::Current(n as i64))?;
    }
    Ok(())
}

/// Parse a sparse image from an in-memory/seekable stream with no backing
/// path. Raw chunks become in-memory providers (spec §6: `from_stream`).
pub fn from_stream<R: Read + Seek>(reader: &mut R, validate_crc: bool, logger: &Logger) -> Result<SparseImage> {
    parse_core(reader, validate_crc, None, logger)
}

/// Parse a sparse image from a file on disk, attaching zero-copy
/// file-region providers to Raw chunks (spec §6: `from_image_file`).
pub fn from_image_file(path: &Path, validate_crc: bool, logger: &Logger) -> Result<SparseImage> {
    let mut file = std::fs::File::open(path).map_err(|e| Error::IoPath(path.to_path_buf(), e))?;
    parse_core(&mut file, validate_crc, Some(path), logger)
}

fn parse_core<R: Read + Seek>(
    reader: &mut R,
    validate_crc: bool,
    path: Option<&Path>,
    logger: &Logger,
) -> Result<SparseImage> {
    let mut header_buf = [0u8; SPARSE_HEADER_SIZE as usize];
    read_exact_checked(reader, &mut header_buf)?;
    let header: SparseHeader = Cursor::new(&header_buf).read_le()?;
    validate_header(&header)?;

    skip(reader, header.file_header_size as u64 - SPARSE_HEADER_SIZE as u64)?;

    let mut chunks: Vec<Chunk> = Vec::with_capacity(header.total_chunks as usize);
    let mut crc = Crc32::new();
    let mut declared_crc: Option<u32> = None;
    let mut cursor_block: u32 = 0;

    for _ in 0..header.total_chunks {
        let mut chunk_header_buf = [0u8; SPARSE_CHUNK_HEADER_SIZE as usize];
        read_exact_checked(reader, &mut chunk_header_buf)?;
        let chunk_header: ChunkHeader = Cursor::new(&chunk_header_buf).read_le()?;
        skip(
            reader,
            header.chunk_header_size as u64 - SPARSE_CHUNK_HEADER_SIZE as u64,
        )?;
        if (chunk_header.total_size as u64) < header.chunk_header_size as u64 {
            return Err(Error::BadHeader(
                "chunk total_size smaller than chunk_header_size".into(),
            ));
        }
        let payload_size = chunk_header.total_size as u64 - header.chunk_header_size as u64;
        let expected = chunk_header.chunk_size as u64 * header.block_size as u64;

        match chunk_header.chunk_type {
            CHUNK_TYPE_RAW => {
                if payload_size != expected {
                    return Err(Error::BadHeader(format!(
                        "raw chunk payload_size {payload_size} != chunk_size*block_size {expected}"
                    )));
                }
                let abs_offset = reader.stream_position()?;
                let provider = if validate_crc || path.is_none() {
                    let mut buf = vec![0u8; payload_size as usize];
                    read_exact_checked(reader, &mut buf)?;
                    if validate_crc {
                        crc.update(&buf);
                    }
                    match path {
                        Some(p) => Provider::from_file_region(p, abs_offset, payload_size),
                        None => Provider::from_bytes(buf),
                    }
                } else {
                    skip(reader, payload_size)?;
                    Provider::from_file_region(path.unwrap(), abs_offset, payload_size)
                };
                chunks.push(Chunk {
                    start_block: cursor_block,
                    chunk_size: chunk_header.chunk_size,
                    payload: ChunkPayload::Raw(provider),
                });
                cursor_block += chunk_header.chunk_size;
            }
            CHUNK_TYPE_FILL => {
                if payload_size < 4 {
                    return Err(Error::BadHeader("fill chunk payload shorter than 4 bytes".into()));
                }
                let mut value = [0u8; 4];
                read_exact_checked(reader, &mut value)?;
                skip(reader, payload_size - 4)?;
                if validate_crc {
                    crc.update_fill(value, expected);
                }
                chunks.push(Chunk {
                    start_block: cursor_block,
                    chunk_size: chunk_header.chunk_size,
                    payload: ChunkPayload::Fill(value),
                });
                cursor_block += chunk_header.chunk_size;
            }
            CHUNK_TYPE_SKIP => {
                if payload_size != 0 {
                    skip(reader, payload_size)?;
                }
                if validate_crc {
                    crc.update_zeros(expected);
                }
                chunks.push(Chunk {
                    start_block: cursor_block,
                    chunk_size: chunk_header.chunk_size,
                    payload: ChunkPayload::Skip,
                });
                cursor_block += chunk_header.chunk_size;
            }
            CHUNK_TYPE_CRC32 => {
                if payload_size < 4 {
                    // spec §9: a CRC32 chunk with payload_size < 4 is skipped silently.
                    logger.warn(format!(
                        "sparse: skipping CRC32 chunk with undersized payload ({payload_size} bytes)"
                    ));
                    skip(reader, payload_size)?;
                    continue;
                }
                let mut value = [0u8; 4];
                read_exact_checked(reader, &mut value)?;
                skip(reader, payload_size - 4)?;
                declared_crc = Some(u32::from_le_bytes(value));
            }
            other => return Err(Error::UnknownChunk(other)),
        }
    }

    if let Some(declared) = declared_crc {
        if validate_crc {
            let computed = crc.finalize();
            if computed != declared {
                return Err(Error::BadChecksum { what: "sparse image CRC32" });
            }
        }
        // else: informational only (spec §4.B.2, §9).
    }

    let summed: u64 = chunks.iter().map(|c| c.chunk_size as u64).sum();
    let declared_total = header.total_blocks as u64;
    if summed > declared_total {
        return Err(Error::BlockCountMismatch { declared: declared_total, summed });
    }
    if summed < declared_total {
        chunks.push(Chunk {
            start_block: cursor_block,
            chunk_size: (declared_total - summed) as u32,
            payload: ChunkPayload::Skip,
        });
    }

    Ok(SparseImage::from_parts(header.block_size, header.total_blocks, chunks))
}

/// Read a raw (non-sparse) file and classify its content block-by-block
/// into coalesced Raw/Fill/Skip runs (spec §4.B.7).
pub fn from_raw_file(path: &Path, block_size: u32) -> Result<SparseImage> {
    validate_block_size(block_size)?;
    let mut file = std::fs::File::open(path).map_err(|e| Error::IoPath(path.to_path_buf(), e))?;
    super::sparsify::sparsify(&mut file, Some(path), block_size, super::sparsify::HoleMode::Hole)
}

/// Detect whether `path` is a sparse image (by magic) and parse it either
/// as sparse or as a raw image using `fallback_block_size` when it is not
/// (spec §6: `import_auto`). The fallback block size is a parameter this
/// spec leaves unspecified in detail; 4096 matches the format's typical
/// logical block size and is documented as the default in `SPEC_FULL.md`.
pub fn import_auto(path: &Path, fallback_block_size: u32, logger: &Logger) -> Result<SparseImage> {
    match peek_header(path) {
        Ok(_) => from_image_file(path, true, logger),
        Err(Error::BadMagic { .. }) => from_raw_file(path, fallback_block_size),
        Err(e) => Err(e),
    }
}
