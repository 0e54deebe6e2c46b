//! Inline filesystem-type probe (spec §6). Deliberately shallow: this is
//! the one inline helper the crate keeps for a quick guess at what lives
//! inside a partition image, not a filesystem parser (spec §1: "filesystem
//! contents inside partitions" is out of scope beyond this helper).

use std::io::{Read, Seek, SeekFrom};

/// The filesystems this probe recognizes by superblock signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilesystemKind {
    Unknown,
    SquashFs,
    Erofs,
    Ext,
    F2fs,
    Fat,
}

fn u16le(buf: &[u8], at: usize) -> Option<u16> {
    buf.get(at..at + 2).map(|s| u16::from_le_bytes(s.try_into().unwrap()))
}

fn u32le(buf: &[u8], at: usize) -> Option<u32> {
    buf.get(at..at + 4).map(|s| u32::from_le_bytes(s.try_into().unwrap()))
}

fn u64le(buf: &[u8], at: usize) -> Option<u64> {
    buf.get(at..at + 8).map(|s| u64::from_le_bytes(s.try_into().unwrap()))
}

/// Read up to 4096 bytes starting at `offset` and match known superblock
/// signatures, returning `(kind, size_bytes)`. Never fails: any I/O error
/// or unrecognized signature yields `(Unknown, 0)`.
pub fn probe_filesystem<R: Read + Seek>(reader: &mut R, offset: u64) -> (FilesystemKind, u64) {
    let mut buf = vec![0u8; 4096];
    let n = match reader.seek(SeekFrom::Start(offset)).and_then(|_| read_best_effort(reader, &mut buf)) {
        Ok(n) => n,
        Err(_) => return (FilesystemKind::Unknown, 0),
    };
    let buf = &buf[..n];

    if u32le(buf, 0) == Some(0x7371_7368) {
        if let Some(bytes_used) = u64le(buf, 40) {
            return (FilesystemKind::SquashFs, bytes_used);
        }
    }
    if u32le(buf, 1024) == Some(0xE0F5_E1E2) {
        let log2_blksz = buf.get(1024 + 12).copied().unwrap_or(12) as u32;
        if let Some(blocks) = u32le(buf, 1024 + 44) {
            return (FilesystemKind::Erofs, (blocks as u64) << log2_blksz);
        }
    }
    if u16le(buf, 1024 + 0x38) == Some(0xEF53) {
        if let (Some(blocks), Some(blk_size_log2)) = (u32le(buf, 1024 + 4), u32le(buf, 1024 + 0x18)) {
            return (FilesystemKind::Ext, blocks as u64 * (1024u64 << blk_size_log2));
        }
    }
    if u32le(buf, 1024) == Some(0xF2F5_2010) {
        if let Some(blocks) = u32le(buf, 1024 + 0x48) {
            return (FilesystemKind::F2fs, blocks as u64 * 4096);
        }
    }
    if buf.get(510) == Some(&0x55) && buf.get(511) == Some(&0xAA) {
        return (FilesystemKind::Fat, 0);
    }

    (FilesystemKind::Unknown, 0)
}

fn read_best_effort<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn detects_squashfs_by_magic_and_reads_bytes_used() {
        let mut buf = vec![0u8; 4096];
        buf[0..4].copy_from_slice(&0x7371_7368u32.to_le_bytes());
        buf[40..48].copy_from_slice(&123_456u64.to_le_bytes());
        let (kind, size) = probe_filesystem(&mut Cursor::new(buf), 0);
        assert_eq!(kind, FilesystemKind::SquashFs);
        assert_eq!(size, 123_456);
    }

    #[test]
    fn detects_ext_and_computes_block_count_times_block_size() {
        let mut buf = vec![0u8; 4096];
        buf[1024 + 0x38..1024 + 0x3A].copy_from_slice(&0xEF53u16.to_le_bytes());
        buf[1024 + 4..1024 + 8].copy_from_slice(&1000u32.to_le_bytes());
        buf[1024 + 0x18..1024 + 0x1C].copy_from_slice(&2u32.to_le_bytes()); // 1024 << 2 = 4096
        let (kind, size) = probe_filesystem(&mut Cursor::new(buf), 0);
        assert_eq!(kind, FilesystemKind::Ext);
        assert_eq!(size, 1000 * 4096);
    }

    #[test]
    fn detects_fat_boot_signature() {
        let mut buf = vec![0u8; 4096];
        buf[510] = 0x55;
        buf[511] = 0xAA;
        let (kind, _) = probe_filesystem(&mut Cursor::new(buf), 0);
        assert_eq!(kind, FilesystemKind::Fat);
    }

    #[test]
    fn unrecognized_signature_is_unknown() {
        let buf = vec![0u8; 4096];
        let (kind, size) = probe_filesystem(&mut Cursor::new(buf), 0);
        assert_eq!(kind, FilesystemKind::Unknown);
        assert_eq!(size, 0);
    }

    #[test]
    fn short_source_never_errors() {
        let buf = vec![0u8; 16];
        let (kind, size) = probe_filesystem(&mut Cursor::new(buf), 0);
        assert_eq!(kind, FilesystemKind::Unknown);
        assert_eq!(size, 0);
    }

    #[test]
    fn offset_shifts_the_search_window() {
        let mut buf = vec![0u8; 8192];
        buf[4096..4100].copy_from_slice(&0x7371_7368u32.to_le_bytes());
        buf[4136..4144].copy_from_slice(&42u64.to_le_bytes());
        let (kind, size) = probe_filesystem(&mut Cursor::new(buf), 4096);
        assert_eq!(kind, FilesystemKind::SquashFs);
        assert_eq!(size, 42);
    }
}
