//! The block device: a fixed-size, file-backed array of equal-sized
//! blocks. `Device` never interprets block contents; it only transfers
//! whole blocks and counts how many reads and writes it has performed.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::layout::BLOCK_SIZE;

/// A fixed-size block-addressable container backed by a single file.
///
/// Opening truncates (or extends) the backing file to exactly
/// `blocks * BLOCK_SIZE` bytes; every `read_block`/`write_block` transfers
/// exactly one whole block.
pub struct Device {
    file: File,
    blocks: u32,
    reads: u64,
    writes: u64,
}

impl Device {
    /// Opens (creating if necessary) the file at `path` and resizes it to
    /// exactly `blocks * BLOCK_SIZE` bytes.
    pub fn open<P: AsRef<Path>>(path: P, blocks: u32) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        file.set_len(blocks as u64 * BLOCK_SIZE as u64)?;
        Ok(Self {
            file,
            blocks,
            reads: 0,
            writes: 0,
        })
    }

    /// The number of blocks addressable on this device.
    pub fn blocks(&self) -> u32 {
        self.blocks
    }

    /// The number of successful `read_block` calls so far.
    pub fn reads(&self) -> u64 {
        self.reads
    }

    /// The number of successful `write_block` calls so far.
    pub fn writes(&self) -> u64 {
        self.writes
    }

    /// Consumes the device, reporting its read/write counters to standard
    /// output the way the rest of this crate's operator-facing output is
    /// reported (plain `println!`, no logging crate). Because this method
    /// takes `self` by value, a device can never be closed twice.
    pub fn close(self) {
        println!("Number of reads: {}", self.reads);
        println!("Number of writes: {}", self.writes);
    }

    /// Copies `BLOCK_SIZE` bytes from the given block into `buf`.
    ///
    /// Returns `None` if `block` is out of range or the underlying I/O
    /// fails; otherwise `Some(BLOCK_SIZE)` and the read counter is
    /// incremented.
    pub fn read_block(&mut self, block: u32, buf: &mut [u8; BLOCK_SIZE]) -> Option<usize> {
        if block >= self.blocks {
            return None;
        }
        self.file
            .seek(SeekFrom::Start(block as u64 * BLOCK_SIZE as u64))
            .ok()?;
        self.file.read_exact(buf).ok()?;
        self.reads += 1;
        Some(BLOCK_SIZE)
    }

    /// Writes `BLOCK_SIZE` bytes from `buf` into the given block.
    ///
    /// Returns `None` if `block` is out of range or the underlying I/O
    /// fails; otherwise `Some(BLOCK_SIZE)` and the write counter is
    /// incremented.
    pub fn write_block(&mut self, block: u32, buf: &[u8; BLOCK_SIZE]) -> Option<usize> {
        if block >= self.blocks {
            return None;
        }
        self.file
            .seek(SeekFrom::Start(block as u64 * BLOCK_SIZE as u64))
            .ok()?;
        self.file.write_all(buf).ok()?;
        self.writes += 1;
        Some(BLOCK_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    /// A disk image path under the system temp directory, removed when
    /// dropped. The corpus has no `tempfile` dependency to reach for, so
    /// uniqueness comes from the process id plus an atomic counter.
    struct TempImage(std::path::PathBuf);

    impl TempImage {
        fn new(name: &str) -> Self {
            let n = COUNTER.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "simplefs-test-{}-{}-{}.img",
                std::process::id(),
                n,
                name
            ));
            Self(path)
        }

        fn path(&self) -> &Path {
            &self.0
        }
    }

    impl Drop for TempImage {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    #[test]
    fn open_sizes_backing_file_exactly() {
        let img = TempImage::new("open-size");
        let dev = Device::open(img.path(), 10).unwrap();
        assert_eq!(dev.blocks(), 10);
        let metadata = std::fs::metadata(img.path()).unwrap();
        assert_eq!(metadata.len(), 10 * BLOCK_SIZE as u64);
    }

    #[test]
    fn write_then_read_round_trips() {
        let img = TempImage::new("rw-roundtrip");
        let mut dev = Device::open(img.path(), 4).unwrap();

        let mut buf = [0u8; BLOCK_SIZE];
        buf[0] = 0xAB;
        buf[BLOCK_SIZE - 1] = 0xCD;
        assert_eq!(dev.write_block(2, &buf), Some(BLOCK_SIZE));

        let mut out = [0u8; BLOCK_SIZE];
        assert_eq!(dev.read_block(2, &mut out), Some(BLOCK_SIZE));
        assert_eq!(out, buf);

        assert_eq!(dev.reads(), 1);
        assert_eq!(dev.writes(), 1);
    }

    #[test]
    fn out_of_range_block_fails_without_counting() {
        let img = TempImage::new("out-of-range");
        let mut dev = Device::open(img.path(), 4).unwrap();

        let buf = [0u8; BLOCK_SIZE];
        let mut out = [0u8; BLOCK_SIZE];
        assert_eq!(dev.write_block(4, &buf), None);
        assert_eq!(dev.read_block(4, &mut out), None);
        assert_eq!(dev.reads(), 0);
        assert_eq!(dev.writes(), 0);
    }

    #[test]
    fn fresh_image_reads_back_zeroed() {
        let img = TempImage::new("fresh-zero");
        let mut dev = Device::open(img.path(), 2).unwrap();
        let mut out = [0xFFu8; BLOCK_SIZE];
        assert_eq!(dev.read_block(1, &mut out), Some(BLOCK_SIZE));
        assert!(out.iter().all(|&b| b == 0));
    }
}
