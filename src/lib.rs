//! lazip is a ZIP archive reader that works from any seekable byte source
//! and only reads what it's asked for:
//!
//! ```no_run
//! # use lazip::*;
//! let archive = ZipArchive::open("foo.zip")?;
//!
//! // Nothing has been read yet. The first look at the entries
//! // finds and decodes the central directory; later looks reuse it.
//! for entry in archive.entries()? {
//!     println!("{} ({} bytes)", entry.name, entry.size);
//! }
//!
//! // Pull a single file out into anything that implements `Write`...
//! let mut contents = Vec::new();
//! archive.extract_by_name("some/specific/file", &mut contents)?;
//!
//! // ...or dump the whole thing into a directory.
//! archive.extract_all("out")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Only the classic ZIP format is understood: no Zip64, no encryption,
//! no archives split across disks. Entries are either stored or DEFLATEd.
//!
//! Zip archives are read from the back: a small record at the end of the file
//! says where the central directory is, and the central directory says where
//! each file's local header (and, just past it, its data) lives.
//! Anything that isn't recognizably a ZIP archive simply has no entries;
//! errors are saved for archives whose offsets point at garbage.

pub mod options;
pub mod read;
pub mod result;

pub use options::{ArchiveOptions, LegacyEncoding};
pub use read::{CompressionMethod, FileMetadata, ZipArchive};
pub use result::{ZipError, ZipResult};

mod crc_writer;
mod spec;
