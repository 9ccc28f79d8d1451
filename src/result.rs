//! Error types and the related `Result<T>`

use thiserror::Error;

pub type ZipResult<T> = Result<T, ZipError>;

#[derive(Debug, Error)]
pub enum ZipError {
    /// An error from underlying I/O
    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    /// The archive's stored offsets don't line up with its contents,
    /// e.g., a local file header isn't where the central directory says it is.
    #[error("Invalid Zip archive: {0}")]
    InvalidArchive(&'static str),

    /// The ZIP archive uses an unsupported feature
    #[error("Unsupported Zip archive: {0}")]
    UnsupportedArchive(String),

    /// No entry in the archive has the given name
    #[error("No file in the archive with the name {0}")]
    NoSuchFile(String),

    /// An entry's name can't be safely turned into a path on disk.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// The extracted bytes don't hash to the CRC-32 in the central directory.
    /// Only checked when [`ArchiveOptions::verify_checksums`] is set.
    ///
    /// [`ArchiveOptions::verify_checksums`]: ../options/struct.ArchiveOptions.html#method.verify_checksums
    #[error("Checksum mismatch for {name}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        name: String,
        expected: u32,
        actual: u32,
    },
}
