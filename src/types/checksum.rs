#![forbid(unsafe_code)]

use std::ops::Range;

pub trait Checksum {
    fn reset(&mut self);
    fn update(&mut self, bytes: &[u8]);
    fn finalize(&self) -> u32;
}

pub struct Crc32Fast {
    inner: crc32fast::Hasher,
}

impl Default for Crc32Fast {
    fn default() -> Self {
        Self {
            inner: crc32fast::Hasher::new(),
        }
    }
}

impl Checksum for Crc32Fast {
    fn reset(&mut self) {
        self.inner.reset();
    }

    fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    fn finalize(&self) -> u32 {
        self.inner.clone().finalize()
    }
}

/// Checksums a page image bound to its block number, skipping the bytes of
/// `stored` where the checksum itself lives.
pub fn page_checksum(block: u32, page: &[u8], stored: Range<usize>) -> u32 {
    let mut hasher = Crc32Fast::default();
    hasher.update(&block.to_le_bytes());
    hasher.update(&page[..stored.start]);
    hasher.update(&page[stored.end..]);
    hasher.finalize()
}
