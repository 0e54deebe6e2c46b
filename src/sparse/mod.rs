//! Component B: the Android sparse image format (spec §2, §4.B).

mod format;
mod image;
mod parse;
mod resparse;
mod serialize;
mod sparsify;
mod stream;

pub use format::{
    ChunkHeader, SparseHeader, CHUNK_TYPE_CRC32, CHUNK_TYPE_FILL, CHUNK_TYPE_RAW, CHUNK_TYPE_SKIP,
    MAX_CHUNK_DATA_SIZE, MAX_FILL_SKIP_CHUNK_SIZE, SPARSE_CHUNK_HEADER_SIZE, SPARSE_HEADER_MAGIC,
    SPARSE_HEADER_MAJOR_VERSION, SPARSE_HEADER_SIZE,
};
pub use image::{Chunk, ChunkPayload, SparseImage};
pub use parse::{from_image_file, from_raw_file, from_stream, import_auto, peek_header, SparseHeaderInfo};
pub use resparse::resparse;
pub use serialize::{length, write, write_flat};
pub use sparsify::{sparsify, HoleMode};
pub use stream::{SparseImageStream, SparseStream};
