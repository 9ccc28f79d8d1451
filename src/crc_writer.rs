//! Helper module to compute a CRC32 checksum of extracted bytes

use std::io;
use std::io::prelude::*;

use crc32fast::Hasher;

/// Writer that hashes everything passed through it on the way to `inner`.
///
/// Extraction stops at the entry's declared size rather than reading
/// the decompressor to EOF, so the checksum is taken on the write side.
pub struct Crc32Writer<W> {
    inner: W,
    hasher: Hasher,
}

impl<W> Crc32Writer<W> {
    pub fn new(inner: W) -> Crc32Writer<W> {
        Crc32Writer {
            inner,
            hasher: Hasher::new(),
        }
    }

    /// The CRC-32 of all bytes written so far
    pub fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }
}

impl<W: Write> Write for Crc32Writer<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let count = self.inner.write(buf)?;
        self.hasher.update(&buf[..count]);
        Ok(count)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
