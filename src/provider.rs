//! Data Providers (spec §4.A): a uniform random-access byte source
//! consumed by sparse Raw chunks and by the partition read adapter.
//!
//! The source format's implementation uses runtime polymorphism for this;
//! per spec §9 DESIGN NOTES, this crate instead uses a closed sum type
//! (`Provider`) behind the three operations `len`/`read_at`/`sub_provider`,
//! the way the teacher crate keeps its on-disk structs as a small closed
//! set rather than reaching for `dyn Any`-style polymorphism.

use crate::error::{Error, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Anything seekable and readable that a stream-region provider can wrap.
/// Boxed behind `Arc<Mutex<..>>` since providers are borrow-like and may be
/// aliased by multiple chunks (spec §3: "Providers are borrow-like").
pub trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

/// A byte slice owned by an `Arc` so that `sub_provider` can alias the same
/// backing bytes without copying (spec §9: "SubSlice over Memory must keep
/// its byte buffer alive").
#[derive(Clone)]
pub struct MemoryProvider {
    data: Arc<[u8]>,
    offset: u64,
    len: u64,
}

impl MemoryProvider {
    pub fn new(data: Vec<u8>) -> Self {
        let len = data.len() as u64;
        MemoryProvider { data: Arc::from(data), offset: 0, len }
    }

    pub fn from_arc(data: Arc<[u8]>) -> Self {
        let len = data.len() as u64;
        MemoryProvider { data, offset: 0, len }
    }

    fn read_at(&self, in_offset: u64, buf: &mut [u8]) -> Result<usize> {
        if in_offset >= self.len {
            return Ok(0);
        }
        let start = (self.offset + in_offset) as usize;
        let avail = (self.len - in_offset) as usize;
        let n = buf.len().min(avail);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    fn sub_provider(&self, off: u64, len: u64) -> Result<MemoryProvider> {
        if off + len > self.len {
            return Err(Error::InvalidArgument(format!(
                "sub_provider range [{off}, {}) exceeds provider length {}",
                off + len,
                self.len
            )));
        }
        Ok(MemoryProvider {
            data: self.data.clone(),
            offset: self.offset + off,
            len,
        })
    }
}

impl std::fmt::Debug for MemoryProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryProvider")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}

/// A region of a file on disk, identified by path rather than an open
/// handle: "the path is the lifetime anchor, not a file handle" (spec §5).
/// Each `read_at` opens a fresh handle and seeks to the right place, so
/// concurrent reads from aliased sub-providers never race on a shared
/// cursor (spec §4.A, §5).
#[derive(Clone)]
pub struct FileRegionProvider {
    path: Arc<PathBuf>,
    base_offset: u64,
    len: u64,
}

impl FileRegionProvider {
    pub fn new(path: impl Into<PathBuf>, base_offset: u64, len: u64) -> Self {
        FileRegionProvider {
            path: Arc::new(path.into()),
            base_offset,
            len,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_at(&self, in_offset: u64, buf: &mut [u8]) -> Result<usize> {
        if in_offset >= self.len {
            return Ok(0);
        }
        let mut file = File::open(&*self.path).map_err(|e| Error::IoPath((*self.path).clone(), e))?;
        file.seek(SeekFrom::Start(self.base_offset + in_offset))
            .map_err(|e| Error::IoPath((*self.path).clone(), e))?;
        let avail = (self.len - in_offset) as usize;
        let n = buf.len().min(avail);
        let mut read_total = 0;
        while read_total < n {
            let r = file
                .read(&mut buf[read_total..n])
                .map_err(|e| Error::IoPath((*self.path).clone(), e))?;
            if r == 0 {
                break;
            }
            read_total += r;
        }
        Ok(read_total)
    }

    fn sub_provider(&self, off: u64, len: u64) -> Result<FileRegionProvider> {
        if off + len > self.len {
            return Err(Error::InvalidArgument(format!(
                "sub_provider range [{off}, {}) exceeds provider length {}",
                off + len,
                self.len
            )));
        }
        Ok(FileRegionProvider {
            path: self.path.clone(),
            base_offset: self.base_offset + off,
            len,
        })
    }
}

impl std::fmt::Debug for FileRegionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileRegionProvider")
            .field("path", &self.path)
            .field("base_offset", &self.base_offset)
            .field("len", &self.len)
            .finish()
    }
}

/// A region of a caller-owned seekable stream. The `leave_open` flag
/// documents intent only (Rust's ownership model means we never close a
/// handle we don't own); it exists so callers can tell at a glance whether
/// this provider is meant to outlive the stream it was built from.
#[derive(Clone)]
pub struct StreamRegionProvider {
    stream: Arc<Mutex<dyn ReadSeek>>,
    base_offset: u64,
    len: u64,
    leave_open: bool,
}

impl StreamRegionProvider {
    pub fn new(stream: Arc<Mutex<dyn ReadSeek>>, base_offset: u64, len: u64, leave_open: bool) -> Self {
        StreamRegionProvider { stream, base_offset, len, leave_open }
    }

    pub fn leaves_stream_open(&self) -> bool {
        self.leave_open
    }

    fn read_at(&self, in_offset: u64, buf: &mut [u8]) -> Result<usize> {
        if in_offset >= self.len {
            return Ok(0);
        }
        let mut guard = self.stream.lock().expect("provider stream mutex poisoned");
        guard.seek(SeekFrom::Start(self.base_offset + in_offset))?;
        let avail = (self.len - in_offset) as usize;
        let n = buf.len().min(avail);
        let mut read_total = 0;
        while read_total < n {
            let r = guard.read(&mut buf[read_total..n])?;
            if r == 0 {
                break;
            }
            read_total += r;
        }
        Ok(read_total)
    }

    fn sub_provider(&self, off: u64, len: u64) -> Result<StreamRegionProvider> {
        if off + len > self.len {
            return Err(Error::InvalidArgument(format!(
                "sub_provider range [{off}, {}) exceeds provider length {}",
                off + len,
                self.len
            )));
        }
        Ok(StreamRegionProvider {
            stream: self.stream.clone(),
            base_offset: self.base_offset + off,
            len,
            leave_open: self.leave_open,
        })
    }
}

impl std::fmt::Debug for StreamRegionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRegionProvider")
            .field("base_offset", &self.base_offset)
            .field("len", &self.len)
            .field("leave_open", &self.leave_open)
            .finish()
    }
}

/// The closed set of data-provider variants (spec §4.A, §9).
#[derive(Debug, Clone)]
pub enum Provider {
    Memory(MemoryProvider),
    FileRegion(FileRegionProvider),
    StreamRegion(StreamRegionProvider),
}

impl Provider {
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Provider::Memory(MemoryProvider::new(data))
    }

    pub fn from_file_region(path: impl Into<PathBuf>, base_offset: u64, len: u64) -> Self {
        Provider::FileRegion(FileRegionProvider::new(path, base_offset, len))
    }

    pub fn from_stream_region(
        stream: Arc<Mutex<dyn ReadSeek>>,
        base_offset: u64,
        len: u64,
        leave_open: bool,
    ) -> Self {
        Provider::StreamRegion(StreamRegionProvider::new(stream, base_offset, len, leave_open))
    }

    pub fn len(&self) -> u64 {
        match self {
            Provider::Memory(p) => p.len,
            Provider::FileRegion(p) => p.len,
            Provider::StreamRegion(p) => p.len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy up to `buf.len()` bytes starting at `in_offset`. Returns the
    /// number of bytes actually copied; 0 at/after end is not an error
    /// (spec §4.A: "a short read at EOF is not an error").
    pub fn read_at(&self, in_offset: u64, buf: &mut [u8]) -> Result<usize> {
        match self {
            Provider::Memory(p) => p.read_at(in_offset, buf),
            Provider::FileRegion(p) => p.read_at(in_offset, buf),
            Provider::StreamRegion(p) => p.read_at(in_offset, buf),
        }
    }

    /// Read exactly `buf.len()` bytes, zero-filling any remainder past the
    /// provider's advertised length. Convenience used by chunk payload
    /// writers that must always emit a full `chunk_size * block_size`.
    pub fn read_exact_zero_padded(&self, in_offset: u64, buf: &mut [u8]) -> Result<()> {
        let n = self.read_at(in_offset, buf)?;
        for b in &mut buf[n..] {
            *b = 0;
        }
        Ok(())
    }

    pub fn sub_provider(&self, off: u64, len: u64) -> Result<Provider> {
        match self {
            Provider::Memory(p) => Ok(Provider::Memory(p.sub_provider(off, len)?)),
            Provider::FileRegion(p) => Ok(Provider::FileRegion(p.sub_provider(off, len)?)),
            Provider::StreamRegion(p) => Ok(Provider::StreamRegion(p.sub_provider(off, len)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_provider_reads_and_subslices() {
        let p = Provider::from_bytes((0..16u8).collect());
        let mut buf = [0u8; 4];
        assert_eq!(p.read_at(4, &mut buf).unwrap(), 4);
        assert_eq!(buf, [4, 5, 6, 7]);

        let sub = p.sub_provider(8, 4).unwrap();
        assert_eq!(sub.len(), 4);
        let mut buf2 = [0u8; 4];
        assert_eq!(sub.read_at(0, &mut buf2).unwrap(), 4);
        assert_eq!(buf2, [8, 9, 10, 11]);
    }

    #[test]
    fn memory_provider_short_read_at_eof_is_not_error() {
        let p = Provider::from_bytes(vec![1, 2, 3]);
        let mut buf = [0u8; 8];
        let n = p.read_at(1, &mut buf).unwrap();
        assert_eq!(n, 2);
        assert_eq!(&buf[..2], &[2, 3]);
    }

    #[test]
    fn sub_provider_out_of_range_is_invalid_argument() {
        let p = Provider::from_bytes(vec![1, 2, 3]);
        assert!(matches!(
            p.sub_provider(2, 5),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn file_region_provider_reads_without_shared_cursor() {
        let dir = std::env::temp_dir();
        let path = dir.join("android_image_format_test_file_region.bin");
        std::fs::write(&path, (0..64u8).collect::<Vec<_>>()).unwrap();
        let p = Provider::from_file_region(&path, 10, 20);
        let mut a = [0u8; 4];
        let mut b = [0u8; 4];
        // interleaved reads from the same provider must not interfere
        assert_eq!(p.read_at(5, &mut a).unwrap(), 4);
        assert_eq!(p.read_at(0, &mut b).unwrap(), 4);
        assert_eq!(a, [15, 16, 17, 18]);
        assert_eq!(b, [10, 11, 12, 13]);
        let _ = std::fs::remove_file(&path);
    }
}
