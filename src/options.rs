//! Knobs for reading an archive.

use std::borrow::Cow;

use codepage_437::*;

/// Default size of the buffer entries are copied through while extracting
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// How to decode names and comments that aren't flagged as UTF-8.
///
/// APPNOTE says those are IBM code page 437,
/// but plenty of archivers just used whatever the local code page was.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum LegacyEncoding {
    /// IBM PC code page 437, with control characters left as-is
    #[default]
    Cp437,
    /// Any encoding `encoding_rs` knows about, e.g. `encoding_rs::SHIFT_JIS`
    Other(&'static encoding_rs::Encoding),
}

impl LegacyEncoding {
    pub fn decode<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str> {
        match self {
            LegacyEncoding::Cp437 => Cow::borrow_from_cp437(bytes, &CP437_CONTROL),
            LegacyEncoding::Other(encoding) => encoding.decode_without_bom_handling(bytes).0,
        }
    }
}

/// Options for a [`ZipArchive`](../read/struct.ZipArchive.html)
///
/// ```
/// # use lazip::ArchiveOptions;
/// let options = ArchiveOptions::default()
///     .legacy_encoding(lazip::LegacyEncoding::Other(encoding_rs::WINDOWS_1252))
///     .buffer_size(4096)
///     .verify_checksums(true);
/// assert_eq!(options.get_buffer_size(), 4096);
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ArchiveOptions {
    legacy_encoding: LegacyEncoding,
    buffer_size: usize,
    verify_checksums: bool,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            legacy_encoding: LegacyEncoding::default(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            verify_checksums: false,
        }
    }
}

impl ArchiveOptions {
    /// Sets the encoding used for names and comments without the UTF-8 flag.
    pub fn legacy_encoding(mut self, encoding: LegacyEncoding) -> Self {
        self.legacy_encoding = encoding;
        self
    }

    /// Sets the largest chunk copied per read while extracting.
    /// Zero is treated as one.
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// If set, extraction hashes the bytes it writes and fails with
    /// [`ZipError::ChecksumMismatch`](../result/enum.ZipError.html)
    /// if they don't match the central directory's CRC-32.
    pub fn verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    pub fn get_legacy_encoding(&self) -> LegacyEncoding {
        self.legacy_encoding
    }

    pub fn get_buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn get_verify_checksums(&self) -> bool {
        self.verify_checksums
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cp437_maps_high_bytes() {
        // 0x81 is ü, 0xE1 is ß in CP437
        assert_eq!(LegacyEncoding::Cp437.decode(b"\x81ber\xe1"), "überß");
        assert!(matches!(
            LegacyEncoding::Cp437.decode(b"plain.txt"),
            Cow::Borrowed("plain.txt")
        ));
    }

    #[test]
    fn other_encodings_go_through_encoding_rs() {
        let latin = LegacyEncoding::Other(encoding_rs::WINDOWS_1252);
        assert_eq!(latin.decode(b"caf\xe9"), "café");
    }

    #[test]
    fn zero_buffer_is_clamped() {
        let options = ArchiveOptions::default().buffer_size(0);
        assert_eq!(options.get_buffer_size(), 1);
        assert_eq!(
            ArchiveOptions::default().get_buffer_size(),
            DEFAULT_BUFFER_SIZE
        );
    }
}
