//! Error kinds for the sparse and LP-metadata codecs (spec §7).

use std::fmt;
use std::path::PathBuf;

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure mode named in the format specification. Each variant
/// carries just enough context to print something actionable; callers
/// that need structured matching should match on the variant itself.
#[derive(Debug)]
pub enum Error {
    /// Header or geometry magic did not match the expected constant.
    BadMagic { what: &'static str, found: u64 },
    /// A header parsed but failed a structural check (version, sizes,
    /// block size not a multiple of 4, etc).
    BadHeader(String),
    /// A SHA-256 or CRC32 checksum did not match the stored value.
    BadChecksum { what: &'static str },
    /// The stream ended before the expected number of bytes were read.
    TruncatedInput { expected: u64, got: u64 },
    /// A sparse chunk header carried an unrecognized `chunk_type`.
    UnknownChunk(u16),
    /// Sum of chunk_size across non-CRC chunks didn't match total_blocks.
    BlockCountMismatch { declared: u64, summed: u64 },
    /// Authoring a chunk would overlap an already-inserted chunk.
    Overlap { at_block: u64 },
    /// Resparse cannot fit data within the requested max file size.
    CannotSplit(String),
    /// None of the three geometry offsets (primary, backup, legacy) validated.
    BadGeometry,
    /// LP metadata header/tables ended before the declared size was read.
    TruncatedMetadata { expected: u64, got: u64 },
    /// Serialized LP metadata (header + tables) exceeds metadata_max_size.
    MetadataTooLarge { size: u64, max: u64 },
    /// add_partition on a name that already exists.
    DuplicatePartition(String),
    /// A partition referenced a group that does not exist.
    UnknownGroup(String),
    /// An operation referenced a partition that does not exist.
    UnknownPartition(String),
    /// resize_partition / add_partition could not find enough aligned
    /// free sectors on the block device.
    DiskFull { requested_sectors: u64, available_sectors: u64 },
    /// A partition grow would exceed its group's maximum_size.
    GroupOverflow { group: String, requested: u64, max: u64 },
    /// resize_block_device to a size too small to cover existing extents.
    DeviceTooSmall { requested: u64, minimum: u64 },
    /// An offset/length argument was out of range for the target.
    InvalidArgument(String),
    /// Unsupported LP metadata major version (> 10).
    UnsupportedVersion(u16),
    /// Underlying I/O failure from a provider, sink, or backing file.
    Io(std::io::Error),
    /// I/O failure tied to a specific file path, for nicer messages.
    IoPath(PathBuf, std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadMagic { what, found } => {
                write!(f, "bad magic for {what}: found 0x{found:X}")
            }
            Error::BadHeader(msg) => write!(f, "bad header: {msg}"),
            Error::BadChecksum { what } => write!(f, "checksum mismatch for {what}"),
            Error::TruncatedInput { expected, got } => {
                write!(f, "truncated input: expected {expected} bytes, got {got}")
            }
            Error::UnknownChunk(ty) => write!(f, "unknown sparse chunk type 0x{ty:04X}"),
            Error::BlockCountMismatch { declared, summed } => write!(
                f,
                "block count mismatch: header declares {declared}, chunks sum to {summed}"
            ),
            Error::Overlap { at_block } => {
                write!(f, "authored chunk overlaps existing chunk at block {at_block}")
            }
            Error::CannotSplit(msg) => write!(f, "cannot resparse: {msg}"),
            Error::BadGeometry => write!(f, "no valid LP geometry found at primary, backup, or legacy offset"),
            Error::TruncatedMetadata { expected, got } => write!(
                f,
                "truncated LP metadata: expected {expected} bytes, got {got}"
            ),
            Error::MetadataTooLarge { size, max } => write!(
                f,
                "serialized metadata is {size} bytes, exceeds metadata_max_size {max}"
            ),
            Error::DuplicatePartition(name) => write!(f, "partition '{name}' already exists"),
            Error::UnknownGroup(name) => write!(f, "unknown partition group '{name}'"),
            Error::UnknownPartition(name) => write!(f, "unknown partition '{name}'"),
            Error::DiskFull { requested_sectors, available_sectors } => write!(
                f,
                "disk full: requested {requested_sectors} sectors, only {available_sectors} available"
            ),
            Error::GroupOverflow { group, requested, max } => write!(
                f,
                "group '{group}' overflow: requested {requested} bytes exceeds maximum_size {max}"
            ),
            Error::DeviceTooSmall { requested, minimum } => write!(
                f,
                "device size {requested} is smaller than required minimum {minimum}"
            ),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Error::UnsupportedVersion(v) => write!(f, "unsupported metadata major version {v}"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::IoPath(path, e) => write!(f, "I/O error on {}: {e}", path.display()),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::IoPath(_, e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<binrw::Error> for Error {
    fn from(e: binrw::Error) -> Self {
        match e {
            binrw::Error::Io(e) => Error::Io(e),
            other => Error::BadHeader(other.to_string()),
        }
    }
}
