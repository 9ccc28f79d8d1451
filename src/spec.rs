//! Code specific to the ZIP file format specification.
//!
//! We try to keep the nitty gritty here,
//! and higher-level stuff in the [`read`] module.
//!
//! Most comments quote the ZIP spec, [`APPNOTE.TXT`].
//!
//! [`read`]: ../read/index.html
//! [`APPNOTE.TXT`]: https://pkware.cachefly.net/webdocs/APPNOTE/APPNOTE-6.3.6.TXT

use std::convert::TryInto;
use std::io::{self, Read, Seek, SeekFrom};

use chrono::{NaiveDate, NaiveDateTime};
use log::*;
use memchr::memmem;

use crate::options::LegacyEncoding;
use crate::read::{CompressionMethod, FileMetadata};
use crate::result::*;

// Magic numbers denoting various sections of a ZIP archive

/// End of central directory magic number
const EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 5, 6];
/// Central directory magic number
const CENTRAL_DIRECTORY_MAGIC: [u8; 4] = [b'P', b'K', 1, 2];
/// Local file header magic number
const LOCAL_FILE_HEADER_MAGIC: [u8; 4] = [b'P', b'K', 3, 4];

/// Size of the End of central directory record, sans comment
pub const EOCDR_SIZE: u64 = 22;
/// The comment length is a u16, so the EOCDR and its comment span at most this.
const MAX_COMMENT_SIZE: u64 = u16::MAX as u64;
/// How much of the file the backward search reads at a time
const SEARCH_CHUNK_SIZE: u64 = 64 * 1024;
/// Size of a central directory entry after its magic, sans variable fields
const CENTRAL_DIRECTORY_FIXED_SIZE: usize = 42;
/// Size of a local file header, sans variable fields
pub const LOCAL_FILE_HEADER_SIZE: u64 = 30;
/// Offset of the file name length in a local file header
const LOCAL_FILE_HEADER_LENGTHS_OFFSET: u64 = 26;

impl CompressionMethod {
    fn from_u16(u: u16) -> Self {
        match u {
            0 => CompressionMethod::None,
            8 => CompressionMethod::Deflate,
            v => CompressionMethod::Unsupported(v),
        }
    }
}

// Straight from the Rust docs:

/// Reads a little-endian u32 from the front of the provided slice, shrinking it.
fn read_u32(input: &mut &[u8]) -> u32 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u32>());
    *input = rest;
    u32::from_le_bytes(int_bytes.try_into().expect("less than four bytes for u32"))
}

/// Reads a little-endian u16 from the front of the provided slice, shrinking it.
fn read_u16(input: &mut &[u8]) -> u16 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u16>());
    *input = rest;
    u16::from_le_bytes(int_bytes.try_into().expect("less than two bytes for u16"))
}

/// Reads exactly `len` bytes from the stream.
fn read_vec<R: Read>(reader: &mut R, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Data from the End of central directory record
///
/// Found at the back of the ZIP archive and provides offsets for finding
/// its central directory, along with lots of stuff that stopped being relevant
/// when we stopped breaking ZIP archives onto multiple floppies.
#[derive(Debug)]
pub struct EndOfCentralDirectory {
    /// Where the record itself starts in the byte source
    pub position: u64,
    pub disk_number: u16,
    pub disk_with_central_directory: u16,
    pub entries_on_this_disk: u16,
    pub entries: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
    pub file_comment: Vec<u8>,
}

impl EndOfCentralDirectory {
    /// Parses the record from the front of `eocdr`,
    /// which the search already found the magic at.
    fn parse(mut eocdr: &[u8], position: u64) -> Self {
        // 4.3.16  End of central directory record:
        //
        // end of central dir signature    4 bytes  (0x06054b50)
        // number of this disk             2 bytes
        // number of the disk with the
        // start of the central directory  2 bytes
        // total number of entries in
        // the central dir on this disk    2 bytes
        // total number of entries in
        // the central dir                 2 bytes
        // size of the central directory   4 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        4 bytes
        // zipfile comment length          2 bytes
        debug_assert_eq!(eocdr[..4], EOCDR_MAGIC);
        eocdr = &eocdr[4..];
        let disk_number = read_u16(&mut eocdr);
        let disk_with_central_directory = read_u16(&mut eocdr);
        let entries_on_this_disk = read_u16(&mut eocdr);
        let entries = read_u16(&mut eocdr);
        let central_directory_size = read_u32(&mut eocdr);
        let central_directory_offset = read_u32(&mut eocdr);
        let comment_length = read_u16(&mut eocdr) as usize;
        // Some archivers lie about the comment length; take what's there.
        let file_comment = eocdr[..comment_length.min(eocdr.len())].to_vec();

        Self {
            position,
            disk_number,
            disk_with_central_directory,
            entries_on_this_disk,
            entries,
            central_directory_size,
            central_directory_offset,
            file_comment,
        }
    }
}

/// Searches backward from the end of `reader` (of length `len`) to find the
/// End of central directory record.
///
/// It should be right at the end of the file,
/// but its variable-length comment (or whatever junk follows the archive)
/// means we can't jump to a known offset.
/// Every position from `len - 22` back to the start of the file is a candidate.
/// Returns `None` if the source is too short to hold one or no signature
/// turns up; callers treat that as an archive with no entries.
pub fn find_end_of_central_directory<R: Read + Seek>(
    reader: &mut R,
    len: u64,
) -> ZipResult<Option<EndOfCentralDirectory>> {
    if len < EOCDR_SIZE {
        debug!("{} bytes is too short for an End Of Central Directory Record", len);
        return Ok(None);
    }

    // The record is 22 bytes, so its magic can start no later than 22 from the end.
    let search_end = len - EOCDR_SIZE + EOCDR_MAGIC.len() as u64;
    let position = match rfind_magic(reader, search_end, SEARCH_CHUNK_SIZE)? {
        Some(p) => p,
        None => {
            debug!("Couldn't find End Of Central Directory Record");
            return Ok(None);
        }
    };

    let record_end = len.min(position + EOCDR_SIZE + MAX_COMMENT_SIZE);
    reader.seek(SeekFrom::Start(position))?;
    let record = read_vec(reader, (record_end - position) as usize)?;
    let eocdr = EndOfCentralDirectory::parse(&record, position);
    trace!("{:?}", eocdr);
    Ok(Some(eocdr))
}

/// Finds the last EOCDR magic that lies entirely before `end`,
/// reading backward `chunk_size` bytes at a time.
fn rfind_magic<R: Read + Seek>(
    reader: &mut R,
    end: u64,
    chunk_size: u64,
) -> io::Result<Option<u64>> {
    // Chunks overlap by one byte less than the magic
    // so that a magic straddling two of them is still seen whole.
    let overlap = EOCDR_MAGIC.len() as u64 - 1;
    debug_assert!(chunk_size > overlap);

    let mut chunk_end = end;
    loop {
        let chunk_start = chunk_end.saturating_sub(chunk_size);
        reader.seek(SeekFrom::Start(chunk_start))?;
        let chunk = read_vec(reader, (chunk_end - chunk_start) as usize)?;
        if let Some(found) = memmem::rfind(&chunk, &EOCDR_MAGIC) {
            return Ok(Some(chunk_start + found as u64));
        }
        if chunk_start == 0 {
            return Ok(None);
        }
        chunk_end = chunk_start + overlap;
    }
}

/// Data from a central directory entry
///
/// Each of these records contians information about a file or folder
/// stored in the ZIP archive.
#[derive(Debug)]
pub struct CentralDirectoryEntry {
    pub source_version: u16,
    pub minimum_extract_version: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub disk_number: u16,
    pub internal_file_attributes: u16,
    pub external_file_attributes: u32,
    pub header_offset: u32,
    pub path: Vec<u8>,
    pub file_comment: Vec<u8>,
}

impl CentralDirectoryEntry {
    /// Reads the next entry from the stream.
    ///
    /// Returns `None` if the magic doesn't match,
    /// having consumed only the four bytes of (not) magic.
    pub fn parse<R: Read + Seek>(reader: &mut R) -> ZipResult<Option<Self>> {
        // 4.3.12  Central directory structure:
        //
        // File header:
        //
        //   central file header signature   4 bytes  (0x02014b50)
        //   version made by                 2 bytes
        //   version needed to extract       2 bytes
        //   general purpose bit flag        2 bytes
        //   compression method              2 bytes
        //   last mod file time              2 bytes
        //   last mod file date              2 bytes
        //   crc-32                          4 bytes
        //   compressed size                 4 bytes
        //   uncompressed size               4 bytes
        //   file name length                2 bytes
        //   extra field length              2 bytes
        //   file comment length             2 bytes
        //   disk number start               2 bytes
        //   internal file attributes        2 bytes
        //   external file attributes        4 bytes
        //   relative offset of local header 4 bytes
        //
        //   file name (variable size)
        //   extra field (variable size)
        //   file comment (variable size)
        let mut magic = [0; 4];
        reader.read_exact(&mut magic)?;
        if magic != CENTRAL_DIRECTORY_MAGIC {
            return Ok(None);
        }

        let mut fixed = [0; CENTRAL_DIRECTORY_FIXED_SIZE];
        reader.read_exact(&mut fixed)?;
        let entry = &mut &fixed[..];
        let source_version = read_u16(entry);
        let minimum_extract_version = read_u16(entry);
        let flags = read_u16(entry);
        let compression_method = read_u16(entry);
        let last_modified_time = read_u16(entry);
        let last_modified_date = read_u16(entry);
        let crc32 = read_u32(entry);
        let compressed_size = read_u32(entry);
        let uncompressed_size = read_u32(entry);
        let path_length = read_u16(entry) as usize;
        let extra_field_length = read_u16(entry) as i64;
        let file_comment_length = read_u16(entry) as usize;
        let disk_number = read_u16(entry);
        let internal_file_attributes = read_u16(entry);
        let external_file_attributes = read_u32(entry);
        let header_offset = read_u32(entry);

        let path = read_vec(reader, path_length)?;
        // The central directory's extra field can differ from the local one,
        // and we don't read anything out of either.
        reader.seek(SeekFrom::Current(extra_field_length))?;
        let file_comment = read_vec(reader, file_comment_length)?;

        Ok(Some(Self {
            source_version,
            minimum_extract_version,
            flags,
            compression_method,
            last_modified_time,
            last_modified_date,
            crc32,
            compressed_size,
            uncompressed_size,
            disk_number,
            internal_file_attributes,
            external_file_attributes,
            header_offset,
            path,
            file_comment,
        }))
    }
}

/// Finds where an entry's data starts by reading its local file header,
/// leaving the stream where it found it.
///
/// The local header has its own (variable-length) name and extra field,
/// which needn't match the central directory's.
pub fn resolve_data_offset<R: Read + Seek>(reader: &mut R, header_offset: u64) -> ZipResult<u64> {
    // 4.3.7  Local file header:
    //
    // local file header signature     4 bytes  (0x04034b50)
    // version needed to extract       2 bytes
    // general purpose bit flag        2 bytes
    // compression method              2 bytes
    // last mod file time              2 bytes
    // last mod file date              2 bytes
    // crc-32                          4 bytes
    // compressed size                 4 bytes
    // uncompressed size               4 bytes
    // file name length                2 bytes
    // extra field length              2 bytes
    //
    // file name (variable size)
    // extra field (variable size)
    let saved = reader.stream_position()?;
    reader.seek(SeekFrom::Start(header_offset + LOCAL_FILE_HEADER_LENGTHS_OFFSET))?;
    let mut lengths = [0; 4];
    reader.read_exact(&mut lengths)?;
    reader.seek(SeekFrom::Start(saved))?;

    let lengths = &mut &lengths[..];
    let path_length = read_u16(lengths) as u64;
    let extra_field_length = read_u16(lengths) as u64;
    Ok(header_offset + LOCAL_FILE_HEADER_SIZE + path_length + extra_field_length)
}

/// Checks that a local file header sits at the given offset.
///
/// If it doesn't, the central directory is pointing somewhere bogus
/// and we shouldn't trust its offsets for anything.
pub fn check_local_header<R: Read + Seek>(reader: &mut R, header_offset: u64) -> ZipResult<()> {
    reader.seek(SeekFrom::Start(header_offset))?;
    let mut magic = [0; 4];
    reader.read_exact(&mut magic)?;
    if magic != LOCAL_FILE_HEADER_MAGIC {
        return Err(ZipError::InvalidArchive("Local file header signature mismatch"));
    }
    Ok(())
}

/// Extracts the "is this text UTF-8?" bit from the 16-bit flags field.
///
/// If false, text is in whatever [`LegacyEncoding`] the caller configured.
fn is_utf8(flags: u16) -> bool {
    // Bit 11: Language encoding flag (EFS).  If this bit is set,
    //         the filename and comment fields for this file
    //         MUST be encoded using UTF-8. (see APPENDIX D)
    flags & (1 << 11) != 0
}

/// Extracts the "is this file encrypted?" bit from the 16-bit flags field.
fn is_encrypted(flags: u16) -> bool {
    // Bit 0: If set, indicates that the file is encrypted
    flags & 1 != 0
}

/// Decodes a name or comment per the entry's flags.
fn decode_text(bytes: &[u8], flags: u16, legacy: LegacyEncoding) -> String {
    if is_utf8(flags) {
        match std::str::from_utf8(bytes) {
            Ok(s) => s.to_owned(),
            Err(e) => {
                warn!("Entry flagged as UTF-8 isn't: {}", e);
                String::from_utf8_lossy(bytes).into_owned()
            }
        }
    } else {
        legacy.decode(bytes).into_owned()
    }
}

impl FileMetadata {
    /// Extracts `FileMetadata` from a central directory entry.
    ///
    /// The data offset comes from the local header, which the caller resolves.
    pub(crate) fn from_cde(
        cde: &CentralDirectoryEntry,
        data_offset: u64,
        legacy: LegacyEncoding,
    ) -> Self {
        Self {
            name: decode_text(&cde.path, cde.flags, legacy),
            comment: decode_text(&cde.file_comment, cde.flags, legacy),
            size: cde.uncompressed_size as u64,
            compressed_size: cde.compressed_size as u64,
            compression_method: CompressionMethod::from_u16(cde.compression_method),
            crc32: cde.crc32,
            encrypted: is_encrypted(cde.flags),
            last_modified: parse_msdos(cde.last_modified_time, cde.last_modified_date),
            header_offset: cde.header_offset as u64,
            data_offset,
        }
    }
}

fn parse_msdos(time: u16, date: u16) -> Option<NaiveDateTime> {
    let seconds = (0b0000_0000_0001_1111 & time) as u32 * 2; // MSDOS uses 2-second precision
    let minutes = (0b0000_0111_1110_0000 & time) as u32 >> 5;
    let hours = (0b1111_1000_0000_0000 & time) as u32 >> 11;

    let days = (0b0000_0000_0001_1111 & date) as u32;
    let months = (0b0000_0001_1110_0000 & date) as u32 >> 5;
    // MSDOS uses years since 1980; Always interpreted as a positive value
    let years = ((0b1111_1110_0000_0000 & date) >> 9) as i32 + 1980;

    // Zeroed dates (month 0, day 0) are common enough in the wild.
    NaiveDate::from_ymd_opt(years, months, days)?.and_hms_opt(hours, minutes, seconds)
}
