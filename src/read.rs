//! Tools for reading a ZIP archive.
//!
//! To start reading an archive, first create a [`ZipArchive`] from a file
//! or any other seekable byte source.
//!
//! [`ZipArchive`]: struct.ZipArchive.html

use std::cell::{OnceCell, RefCell};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use chrono::NaiveDateTime;
use flate2::read::DeflateDecoder;
use log::*;

use crate::crc_writer::Crc32Writer;
use crate::options::ArchiveOptions;
use crate::result::*;
use crate::spec;

/// The compression method used to store a file
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompressionMethod {
    /// The file is uncompressed
    None,
    /// The file is [DEFLATE](https://en.wikipedia.org/wiki/DEFLATE)d.
    /// This is the most common format used by ZIP archives.
    Deflate,
    /// The file is compressed with a yet-unsupported format.
    /// (The u16 indicates the internal format code.)
    Unsupported(u16),
}

/// Metadata for a file or directory in the archive,
/// retrieved from its central directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// The provided name of the file, with `/` separating directories.
    pub name: String,

    /// The entry's comment, often empty
    pub comment: String,

    /// Uncompressed size of the file in bytes
    pub size: u64,

    /// Compressed size of the file in bytes
    pub compressed_size: u64,

    /// Compression algorithm used to store the file
    pub compression_method: CompressionMethod,

    /// The CRC-32 of the decompressed file.
    ///
    /// Extraction doesn't check this unless asked to with
    /// [`ArchiveOptions::verify_checksums`](../options/struct.ArchiveOptions.html#method.verify_checksums).
    pub crc32: u32,

    /// True if the file is encrypted (decryption is unsupported)
    pub encrypted: bool,

    /// When the file was last modified, if the archive recorded a real date
    pub last_modified: Option<NaiveDateTime>,

    /// The offset to the local file header in the archive
    pub header_offset: u64,

    /// The offset to the first byte of the (compressed) file data,
    /// just past the local file header's name and extra field.
    pub data_offset: u64,
}

impl FileMetadata {
    /// Returns true if the given entry is a directory
    pub fn is_dir(&self) -> bool {
        // Path::ends_with() doesn't consider separators,
        // so check the string.
        self.name.ends_with('/')
    }

    /// Returns true if the given entry is a file
    pub fn is_file(&self) -> bool {
        !self.is_dir()
    }

    /// Returns true if the data is DEFLATEd (as opposed to stored)
    pub fn is_deflated(&self) -> bool {
        self.compression_method == CompressionMethod::Deflate
    }

    /// The entry's name as a path
    pub fn path(&self) -> &Utf8Path {
        Utf8Path::new(&self.name)
    }
}

/// Everything read out of the central directory, computed once per archive.
#[derive(Debug, Default)]
pub struct EntryCache {
    entries: Vec<FileMetadata>,
    by_name: HashMap<String, usize>,
    comment: String,
}

impl EntryCache {
    /// Finds the central directory and decodes every entry in it.
    fn load<R: Read + Seek>(source: &mut R, options: &ArchiveOptions) -> ZipResult<Self> {
        let len = source.seek(SeekFrom::End(0))?;
        let eocdr = match spec::find_end_of_central_directory(source, len)? {
            Some(e) => e,
            None => return Ok(Self::default()),
        };
        let legacy = options.get_legacy_encoding();

        if eocdr.disk_number != eocdr.disk_with_central_directory {
            warn!(
                "Multi-disk archive (disk {} of {}); reading only this one",
                eocdr.disk_number, eocdr.disk_with_central_directory
            );
        }
        trace!("{} entries at offset {}", eocdr.entries, eocdr.central_directory_offset);

        source.seek(SeekFrom::Start(eocdr.central_directory_offset as u64))?;

        let mut entries = Vec::with_capacity(eocdr.entries as usize);
        for slot in 0..eocdr.entries {
            let dir_entry = match spec::CentralDirectoryEntry::parse(source)? {
                Some(e) => e,
                None => {
                    warn!("Skipping central directory slot {} with bad magic", slot);
                    continue;
                }
            };
            trace!("{:?}", dir_entry);

            let data_offset = spec::resolve_data_offset(source, dir_entry.header_offset as u64)?;
            let file_metadata = FileMetadata::from_cde(&dir_entry, data_offset, legacy);
            debug!("{:?}", file_metadata);
            entries.push(file_metadata);
        }

        let mut by_name = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            // First one wins if an archive has duplicates.
            by_name.entry(entry.name.clone()).or_insert(i);
        }

        Ok(Self {
            entries,
            by_name,
            comment: legacy.decode(&eocdr.file_comment).into_owned(),
        })
    }

    /// Every entry, in central directory order
    pub fn entries(&self) -> &[FileMetadata] {
        &self.entries
    }

    /// The first entry with exactly this name, if any
    pub fn lookup(&self, name: &str) -> Option<&FileMetadata> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    /// Names of everything that isn't a directory, in central directory order
    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|e| e.is_file())
            .map(|e| e.name.as_str())
    }

    /// The archive comment, empty if there isn't one
    pub fn comment(&self) -> &str {
        &self.comment
    }
}

/// A ZIP archive to be read
///
/// The archive owns its byte source until it's dropped
/// (or handed back with [`into_inner()`](#method.into_inner)).
/// Nothing is read until the entries are first asked for;
/// the central directory is then decoded exactly once.
///
/// Every read seeks the one shared source, so an archive can't be shared
/// between threads. Open the file again for each thread instead.
pub struct ZipArchive<R> {
    source: RefCell<R>,
    cache: OnceCell<EntryCache>,
    options: ArchiveOptions,
}

impl ZipArchive<BufReader<File>> {
    /// Opens the ZIP archive at the given path.
    ///
    /// ```no_run
    /// # use lazip::*;
    /// let archive = ZipArchive::open("foo.zip")?;
    /// for name in archive.file_names()? {
    ///     println!("{}", name);
    /// }
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> ZipResult<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: Read + Seek> ZipArchive<R> {
    /// Reads a ZIP archive from any seekable source, with default options.
    ///
    /// ```
    /// # use std::io::Cursor;
    /// # use lazip::*;
    /// // Not a ZIP archive, but not an error either: there's just nothing in it.
    /// let archive = ZipArchive::new(Cursor::new(b"hello"));
    /// assert!(archive.entries()?.is_empty());
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn new(source: R) -> Self {
        Self::with_options(source, ArchiveOptions::default())
    }

    pub fn with_options(source: R, options: ArchiveOptions) -> Self {
        Self {
            source: RefCell::new(source),
            cache: OnceCell::new(),
            options,
        }
    }

    /// Returns the entry cache, decoding the central directory if this is
    /// the first time anyone asked.
    pub fn cache(&self) -> ZipResult<&EntryCache> {
        if let Some(cache) = self.cache.get() {
            return Ok(cache);
        }
        let loaded = EntryCache::load(&mut *self.source.borrow_mut(), &self.options)?;
        debug!("Loaded {} entries", loaded.entries.len());
        Ok(self.cache.get_or_init(|| loaded))
    }

    /// Returns the entries found in the ZIP archive's central directory,
    /// in the order it lists them.
    ///
    /// No effort is made to deduplicate or otherwise validate these entries.
    pub fn entries(&self) -> ZipResult<&[FileMetadata]> {
        Ok(self.cache()?.entries())
    }

    /// Returns the names of all entries that aren't directories.
    pub fn file_names(&self) -> ZipResult<impl Iterator<Item = &str>> {
        Ok(self.cache()?.file_names())
    }

    /// Looks up an entry by its name in the archive.
    pub fn lookup(&self, name: &str) -> ZipResult<&FileMetadata> {
        self.cache()?
            .lookup(name)
            .ok_or_else(|| ZipError::NoSuchFile(name.to_owned()))
    }

    /// The archive's comment, if it has one
    pub fn comment(&self) -> ZipResult<&str> {
        Ok(self.cache()?.comment())
    }

    /// Writes the decompressed contents of the given entry to `sink`.
    ///
    /// At most `metadata.size` bytes are written; returns how many were.
    /// Only the uncompressed size bounds the read, so a stored entry whose
    /// compressed size is wrong still comes out whole.
    /// (A source or decompressor that runs dry early just means fewer bytes.)
    pub fn extract<W: Write + ?Sized>(
        &self,
        metadata: &FileMetadata,
        sink: &mut W,
    ) -> ZipResult<u64> {
        if metadata.encrypted {
            return Err(ZipError::UnsupportedArchive(format!(
                "Can't read encrypted file {}",
                metadata.name
            )));
        }
        if let CompressionMethod::Unsupported(method) = metadata.compression_method {
            return Err(ZipError::UnsupportedArchive(format!(
                "Compression method {} of {} not supported",
                method, metadata.name
            )));
        }

        let mut source = self.source.borrow_mut();
        spec::check_local_header(&mut *source, metadata.header_offset)?;
        source.seek(SeekFrom::Start(metadata.data_offset))?;
        debug!("Reading {:?}", metadata);

        let mut reader: Box<dyn Read + '_> = if metadata.is_deflated() {
            Box::new(DeflateDecoder::new(&mut *source))
        } else {
            Box::new(&mut *source)
        };

        let buffer_size = self.options.get_buffer_size();
        if !self.options.get_verify_checksums() {
            return Ok(copy_bounded(&mut reader, sink, metadata.size, buffer_size)?);
        }

        let mut checked = Crc32Writer::new(sink);
        let written = copy_bounded(&mut reader, &mut checked, metadata.size, buffer_size)?;
        let actual = checked.checksum();
        if written == metadata.size && actual != metadata.crc32 {
            return Err(ZipError::ChecksumMismatch {
                name: metadata.name.clone(),
                expected: metadata.crc32,
                actual,
            });
        }
        Ok(written)
    }

    /// Like [`extract()`](#method.extract), but looks the entry up by name first.
    pub fn extract_by_name<W: Write + ?Sized>(&self, name: &str, sink: &mut W) -> ZipResult<u64> {
        let metadata = self.lookup(name)?;
        self.extract(metadata, sink)
    }

    /// Extracts every file in the archive into `directory`,
    /// creating parent directories as needed.
    ///
    /// Directory entries aren't created on their own;
    /// a directory only shows up if some file lives in it.
    pub fn extract_all<P: AsRef<Path>>(&self, directory: P) -> ZipResult<()> {
        let directory = directory.as_ref();
        for entry in self.entries()?.iter().filter(|e| e.is_file()) {
            let relative = sanitize_path(entry.path())?;
            let destination = directory.join(relative.as_std_path());
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }
            info!("Extracting {} to {}", entry.name, destination.display());

            let mut sink = BufWriter::new(File::create(&destination)?);
            self.extract(entry, &mut sink)?;
            sink.flush()?;
        }
        Ok(())
    }

    /// Closes the archive, handing back the byte source.
    /// (Dropping the archive closes it too.)
    pub fn into_inner(self) -> R {
        self.source.into_inner()
    }
}

/// Copies up to `size` bytes from `reader` to `writer`,
/// at most `buffer_size` at a time.
///
/// Stops early if `reader` runs dry. Returns the number of bytes copied.
fn copy_bounded<R: Read + ?Sized, W: Write + ?Sized>(
    reader: &mut R,
    writer: &mut W,
    size: u64,
    buffer_size: usize,
) -> io::Result<u64> {
    let mut buf = vec![0; buffer_size.min(size as usize)];
    let mut remaining = size;
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let count = match reader.read(&mut buf[..want]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buf[..count])?;
        remaining -= count as u64;
    }
    if remaining > 0 {
        debug!("Source ran dry {} bytes short", remaining);
    }
    Ok(size - remaining)
}

/// Turns an entry's name into a path relative to the extraction directory,
/// refusing anything that could land outside it.
fn sanitize_path(path: &Utf8Path) -> ZipResult<Utf8PathBuf> {
    let mut relative = Utf8PathBuf::new();
    for component in path.components() {
        // The path is coming from the archive, which we don't trust
        // to stay inside the directory we're extracting to.
        match component {
            Utf8Component::Prefix(prefix) => {
                return Err(ZipError::InvalidPath(format!(
                    "Prefix {prefix} found in path {path}",
                )));
            }
            Utf8Component::RootDir => {
                return Err(ZipError::InvalidPath(format!(
                    "Root directory found in path {path}",
                )));
            }
            Utf8Component::ParentDir => {
                return Err(ZipError::InvalidPath(format!(
                    "Parent dir (..) found in path {path}",
                )));
            }
            Utf8Component::CurDir => {
                warn!("Current dir (.) found in path {path}");
                // Huh. Keep going.
            }
            Utf8Component::Normal(component) => relative.push(component),
        }
    }
    if relative.as_str().is_empty() {
        return Err(ZipError::InvalidPath(format!("Empty path {path}")));
    }
    Ok(relative)
}
