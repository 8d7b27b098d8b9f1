//! Central directory parsing.
//!
//! The central directory is streamed through a bounded buffer, one header at a
//! time, so that scanning an archive with many entries never needs the whole
//! directory in memory. [`DirectoryParser`] is an iterator yielding one
//! [`EntryMetadata`] per Central Directory File Header, in archive order.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, BufReader, Cursor, Read};
use tracing::{trace, warn};

use crate::error::{ZipError, ZipResult};
use crate::io::{ByteSource, SourceReader};

use super::archive::NameEncoding;
use super::cp437;
use super::locator::CentralDirectoryLocation;
use super::structures::*;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// MS-DOS directory attribute.
const DOS_DIRECTORY: u32 = 0x10;
/// Unix file type bits and the directory type.
const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;

/// Iterator over the headers of a central directory.
pub struct DirectoryParser<'a, S: ByteSource + ?Sized> {
    reader: BufReader<SourceReader<'a, S>>,
    /// Absolute offset of the next header.
    position: u64,
    remaining: u64,
    archive_size: u64,
    encoding: NameEncoding,
}

impl<'a, S: ByteSource + ?Sized> DirectoryParser<'a, S> {
    pub fn new(
        source: &'a S,
        location: &CentralDirectoryLocation,
        encoding: NameEncoding,
    ) -> Self {
        let reader = SourceReader::new(source, location.offset, location.size);
        Self {
            reader: BufReader::with_capacity(READ_BUFFER_SIZE, reader),
            position: location.offset,
            remaining: location.total_entries,
            archive_size: source.size(),
            encoding,
        }
    }

    /// Parse a Central Directory File Header.
    ///
    /// The CDFH contains metadata about a file in the archive, including
    /// its name, sizes, and location of the actual file data.
    fn parse_cdfh(&mut self) -> ZipResult<EntryMetadata> {
        let header_offset = self.position;

        let mut fixed = [0u8; CDFH_MIN_SIZE];
        self.reader.read_exact(&mut fixed).map_err(truncated)?;
        if &fixed[0..4] != CDFH_SIGNATURE {
            return Err(ZipError::InvalidSignature {
                structure: "central directory file header",
                offset: header_offset,
            });
        }

        let mut cursor = Cursor::new(&fixed[4..]);
        let version_made_by = cursor.read_u16::<LittleEndian>()?;
        let _version_needed = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let compression_method = cursor.read_u16::<LittleEndian>()?;
        let last_mod_time = cursor.read_u16::<LittleEndian>()?;
        let last_mod_date = cursor.read_u16::<LittleEndian>()?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let compressed_size = cursor.read_u32::<LittleEndian>()?;
        let uncompressed_size = cursor.read_u32::<LittleEndian>()?;
        let file_name_length = cursor.read_u16::<LittleEndian>()? as usize;
        let extra_field_length = cursor.read_u16::<LittleEndian>()? as usize;
        let file_comment_length = cursor.read_u16::<LittleEndian>()? as usize;
        let disk_number_start = cursor.read_u16::<LittleEndian>()?;
        let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
        let external_attributes = cursor.read_u32::<LittleEndian>()?;
        let lfh_offset = cursor.read_u32::<LittleEndian>()?;

        // Name, extra field and comment are read as one region
        let variable_len = file_name_length + extra_field_length + file_comment_length;
        let mut variable = vec![0u8; variable_len];
        self.reader.read_exact(&mut variable).map_err(truncated)?;
        self.position += (CDFH_MIN_SIZE + variable_len) as u64;

        let (raw_name, rest) = variable.split_at(file_name_length);
        let (extra, raw_comment) = rest.split_at(extra_field_length);

        let utf8 = flags & FLAG_UTF8 != 0;
        let mut file_name = decode_text(raw_name, utf8, self.encoding);
        let comment = decode_text(raw_comment, utf8, self.encoding);

        let mut sizes = Zip64Fields {
            uncompressed_size: uncompressed_size as u64,
            compressed_size: compressed_size as u64,
            lfh_offset: lfh_offset as u64,
            disk_number_start: disk_number_start as u32,
        };
        let mut zip64 = false;

        for (id, data) in ExtraFields::new(extra) {
            match id {
                EXTRA_ZIP64 => {
                    sizes = parse_zip64_extra(
                        data,
                        uncompressed_size,
                        compressed_size,
                        lfh_offset,
                        disk_number_start,
                    )
                    .ok_or_else(|| {
                        ZipError::CorruptArchive(format!(
                            "ZIP64 extra field of {file_name} is missing expected values"
                        ))
                    })?;
                    zip64 = true;
                }
                EXTRA_UNICODE_PATH => {
                    if let Some(name) = parse_unicode_path(data, raw_name) {
                        file_name = name;
                    }
                }
                _ => {}
            }
        }

        if sizes.disk_number_start != 0 {
            return Err(ZipError::Unsupported("multi-volume archives".into()));
        }
        if sizes.lfh_offset >= self.archive_size {
            return Err(ZipError::CorruptArchive(format!(
                "local header offset {} of {file_name} is outside the archive",
                sizes.lfh_offset
            )));
        }

        let is_directory = file_name.ends_with('/')
            || file_name.ends_with('\\')
            || (sizes.uncompressed_size == 0
                && (external_attributes & DOS_DIRECTORY != 0
                    || (external_attributes >> 16) & S_IFMT == S_IFDIR));

        trace!(
            name = %file_name,
            offset = sizes.lfh_offset,
            method = compression_method,
            "parsed central directory entry"
        );

        Ok(EntryMetadata {
            file_name,
            raw_name: raw_name.to_vec(),
            comment,
            compression_method: CompressionMethod::from_u16(compression_method),
            compressed_size: sizes.compressed_size,
            uncompressed_size: sizes.uncompressed_size,
            crc32,
            lfh_offset: sizes.lfh_offset,
            last_mod_time,
            last_mod_date,
            version_made_by,
            flags,
            external_attributes,
            zip64,
            is_directory,
        })
    }
}

impl<S: ByteSource + ?Sized> Iterator for DirectoryParser<'_, S> {
    type Item = ZipResult<EntryMetadata>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let result = self.parse_cdfh();
        if result.is_err() {
            self.remaining = 0;
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, usize::try_from(self.remaining).ok())
    }
}

/// Running out of directory bytes means the directory is truncated.
fn truncated(err: io::Error) -> ZipError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        ZipError::TruncatedCentralDirectory
    } else {
        ZipError::from_read(err)
    }
}

/// Decode a name or comment; never fails.
pub(crate) fn decode_text(raw: &[u8], utf8_flag: bool, encoding: NameEncoding) -> String {
    if utf8_flag || encoding == NameEncoding::Utf8 {
        if let Ok(text) = std::str::from_utf8(raw) {
            return text.to_owned();
        }
    }
    cp437::decode(raw)
}

/// Values that a ZIP64 extra record may replace.
struct Zip64Fields {
    uncompressed_size: u64,
    compressed_size: u64,
    lfh_offset: u64,
    disk_number_start: u32,
}

/// Read the ZIP64 extended information record.
///
/// Only the fields whose fixed-size counterparts hold the sentinel are present,
/// always in the order uncompressed size, compressed size, local header offset,
/// disk number. `None` when an expected value is missing.
fn parse_zip64_extra(
    data: &[u8],
    uncompressed_size: u32,
    compressed_size: u32,
    lfh_offset: u32,
    disk_number_start: u16,
) -> Option<Zip64Fields> {
    let mut cursor = Cursor::new(data);
    let mut wide = |value: u32| -> Option<u64> {
        if value == ZIP64_SENTINEL_32 {
            cursor.read_u64::<LittleEndian>().ok()
        } else {
            Some(value as u64)
        }
    };
    let uncompressed_size = wide(uncompressed_size)?;
    let compressed_size = wide(compressed_size)?;
    let lfh_offset = wide(lfh_offset)?;
    let disk_number_start = if disk_number_start == ZIP64_SENTINEL_16 {
        cursor.read_u32::<LittleEndian>().ok()?
    } else {
        disk_number_start as u32
    };
    Some(Zip64Fields {
        uncompressed_size,
        compressed_size,
        lfh_offset,
        disk_number_start,
    })
}

/// Read the Info-ZIP Unicode Path record.
///
/// The record is only trusted when its CRC matches the stored name, otherwise
/// it was written for a name that has since changed.
fn parse_unicode_path(data: &[u8], raw_name: &[u8]) -> Option<String> {
    if data.len() < 5 || data[0] != 1 {
        return None;
    }
    let crc = u32::from_le_bytes([data[1], data[2], data[3], data[4]]);
    if crc != crc32fast::hash(raw_name) {
        warn!("ignoring stale unicode path extra field");
        return None;
    }
    std::str::from_utf8(&data[5..]).ok().map(str::to_owned)
}

/// Iterator over `(header id, data)` pairs of an extra field region.
pub(crate) struct ExtraFields<'a> {
    data: &'a [u8],
}

impl<'a> ExtraFields<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for ExtraFields<'a> {
    type Item = (u16, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.len() < 4 {
            return None;
        }
        let id = u16::from_le_bytes([self.data[0], self.data[1]]);
        let len = u16::from_le_bytes([self.data[2], self.data[3]]) as usize;
        let rest = &self.data[4..];
        if len > rest.len() {
            warn!(id, len, available = rest.len(), "extra field overruns its region");
            self.data = &[];
            return None;
        }
        let (field, tail) = rest.split_at(len);
        self.data = tail;
        Some((id, field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip64_extra_reads_only_sentinel_fields() {
        // compressed size and offset are sentinels, uncompressed is not
        let mut data = Vec::new();
        data.extend_from_slice(&(7u64 << 32).to_le_bytes());
        data.extend_from_slice(&(9u64 << 32).to_le_bytes());
        let fields =
            parse_zip64_extra(&data, 1234, ZIP64_SENTINEL_32, ZIP64_SENTINEL_32, 0).unwrap();
        assert_eq!(fields.uncompressed_size, 1234);
        assert_eq!(fields.compressed_size, 7u64 << 32);
        assert_eq!(fields.lfh_offset, 9u64 << 32);
        assert_eq!(fields.disk_number_start, 0);
    }

    #[test]
    fn zip64_extra_missing_value_is_rejected() {
        let data = 5u64.to_le_bytes();
        assert!(parse_zip64_extra(&data, ZIP64_SENTINEL_32, ZIP64_SENTINEL_32, 0, 0).is_none());
    }

    #[test]
    fn extra_fields_iterate_and_stop_on_overrun() {
        let mut data = Vec::new();
        data.extend_from_slice(&0x5455u16.to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes());
        data.push(0xAA);
        data.extend_from_slice(&0x0001u16.to_le_bytes());
        data.extend_from_slice(&40u16.to_le_bytes());
        data.extend_from_slice(&[0; 8]);
        let fields: Vec<_> = ExtraFields::new(&data).collect();
        assert_eq!(fields, vec![(0x5455, &[0xAA][..])]);
    }

    #[test]
    fn unicode_path_requires_matching_crc() {
        let raw = b"caf\x82.txt";
        let mut data = vec![1];
        data.extend_from_slice(&crc32fast::hash(raw).to_le_bytes());
        data.extend_from_slice("café.txt".as_bytes());
        assert_eq!(parse_unicode_path(&data, raw).as_deref(), Some("café.txt"));
        assert_eq!(parse_unicode_path(&data, b"other.txt"), None);
    }

    #[test]
    fn names_decode_by_flag_and_fallback() {
        assert_eq!(
            decode_text("ünï".as_bytes(), true, NameEncoding::Auto),
            "ünï"
        );
        // Without the flag, the same bytes are read as IBM437
        assert_eq!(decode_text(&[0xC3, 0xBC], false, NameEncoding::Auto), "├╝");
        assert_eq!(
            decode_text(&[0xC3, 0xBC], false, NameEncoding::Utf8),
            "ü"
        );
        // Invalid UTF-8 under the flag falls back instead of failing
        assert_eq!(decode_text(&[0x81, b'a'], true, NameEncoding::Auto), "üa");
    }
}
