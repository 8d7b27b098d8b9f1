//! Single-entry extraction.
//!
//! Given one [`EntryMetadata`] and the byte source, [`EntryExtractor`] checks
//! the entry's local header against the central directory, streams the
//! compressed bytes through the decoder in bounded chunks, and verifies the
//! CRC-32 of everything it produced.

use flate2::bufread::DeflateDecoder;
use std::io::{self, BufReader, Read, Write};
use tracing::debug;

use crate::error::{ZipError, ZipResult};
use crate::io::{ByteSource, SourceReader};

use super::parser::ExtraFields;
use super::structures::*;

const COPY_BUFFER_SIZE: usize = 32 * 1024;

/// Upper bound on the buffer reserved up front from a declared size.
const PREALLOC_LIMIT: u64 = 16 * 1024 * 1024;

/// Position of an entry's compressed data, as found in its local header.
#[derive(Debug, Clone, Copy)]
struct DataLocation {
    offset: u64,
    /// The local header is ZIP64, so a data descriptor uses 64-bit sizes.
    zip64: bool,
}

/// Extracts entries from a byte source.
///
/// Holds no state besides the source reference and the output cap, so separate
/// extractors (or one shared extractor) can work on different entries at once.
pub struct EntryExtractor<'a, S: ByteSource + ?Sized> {
    source: &'a S,
    max_output_size: Option<u64>,
}

impl<'a, S: ByteSource + ?Sized> EntryExtractor<'a, S> {
    pub fn new(source: &'a S, max_output_size: Option<u64>) -> Self {
        Self {
            source,
            max_output_size,
        }
    }

    /// Extract file data to memory
    pub fn extract(&self, entry: &EntryMetadata) -> ZipResult<Vec<u8>> {
        let reserve = entry
            .uncompressed_size
            .min(self.max_output_size.unwrap_or(u64::MAX))
            .min(PREALLOC_LIMIT);
        let mut buf = Vec::with_capacity(reserve as usize);
        self.extract_to(entry, &mut buf)?;
        Ok(buf)
    }

    /// Stream the decompressed bytes of `entry` into `out`.
    ///
    /// Returns the number of bytes written. The checksum is verified only after
    /// the last byte, so on error `out` may already hold a prefix of the data
    /// that must be discarded.
    pub fn extract_to<W: Write + ?Sized>(
        &self,
        entry: &EntryMetadata,
        out: &mut W,
    ) -> ZipResult<u64> {
        if entry.is_directory {
            return Ok(0);
        }
        // AES entries carry method 99 and report it rather than the encryption
        if let CompressionMethod::Unsupported(code) = entry.compression_method {
            return Err(ZipError::UnsupportedCompressionMethod(code));
        }
        if entry.is_encrypted() {
            return Err(ZipError::Unsupported(format!(
                "encrypted entry {}",
                entry.file_name
            )));
        }

        let cap = self.output_cap(entry)?;
        let location = self.get_data_location(entry)?;

        let (written, crc, consumed) = match entry.compression_method {
            CompressionMethod::Stored => {
                if !entry.has_data_descriptor()
                    && entry.compressed_size != entry.uncompressed_size
                {
                    return Err(ZipError::CorruptArchive(format!(
                        "stored entry {} declares {} compressed but {} uncompressed bytes",
                        entry.file_name, entry.compressed_size, entry.uncompressed_size
                    )));
                }
                // The central directory is written after the data, so its size
                // is usable even when the local header deferred it.
                self.check_data_range(entry, location.offset, entry.compressed_size)?;
                let mut reader =
                    SourceReader::new(self.source, location.offset, entry.compressed_size);
                let (written, crc) = pump(&mut reader, out, cap, entry)?;
                (written, crc, entry.compressed_size)
            }
            CompressionMethod::Deflated => {
                let window = if entry.has_data_descriptor() {
                    // DEFLATE streams terminate themselves
                    SourceReader::to_end(self.source, location.offset)
                } else {
                    self.check_data_range(entry, location.offset, entry.compressed_size)?;
                    SourceReader::new(self.source, location.offset, entry.compressed_size)
                };
                let mut decoder =
                    DeflateDecoder::new(BufReader::with_capacity(COPY_BUFFER_SIZE, window));
                let (written, crc) = pump(&mut decoder, out, cap, entry)?;
                (written, crc, decoder.total_in())
            }
            CompressionMethod::Unsupported(code) => {
                return Err(ZipError::UnsupportedCompressionMethod(code));
            }
        };

        let expected_crc = if entry.has_data_descriptor() {
            self.verify_descriptor(entry, location, consumed, written)?
        } else {
            entry.crc32
        };
        // The central directory follows the data, so its size holds for
        // deferred entries too
        if written != entry.uncompressed_size {
            return Err(ZipError::CorruptArchive(format!(
                "{} produced {} bytes, expected {}",
                entry.file_name, written, entry.uncompressed_size
            )));
        }

        if crc != expected_crc {
            return Err(ZipError::ChecksumMismatch {
                name: entry.file_name.clone(),
                expected: expected_crc,
                computed: crc,
            });
        }

        debug!(name = %entry.file_name, bytes = written, "extracted entry");
        Ok(written)
    }

    /// Get the actual data offset for a file entry.
    ///
    /// The Local File Header (LFH) has variable-length fields (filename,
    /// extra field) that may differ from the Central Directory entry.
    /// This method reads the LFH to calculate where the actual file
    /// data begins, and checks it against the central directory.
    pub fn get_data_offset(&self, entry: &EntryMetadata) -> ZipResult<u64> {
        self.get_data_location(entry).map(|location| location.offset)
    }

    fn get_data_location(&self, entry: &EntryMetadata) -> ZipResult<DataLocation> {
        let size = self.source.size();
        if entry.lfh_offset.saturating_add(LFH_SIZE as u64) > size {
            return Err(ZipError::CorruptArchive(format!(
                "local header of {} runs past the end of the archive",
                entry.file_name
            )));
        }

        let lfh_buf = self.source.read_vec(entry.lfh_offset, LFH_SIZE)?;
        let header = LocalFileHeader::from_bytes(&lfh_buf, entry.lfh_offset)?;

        // Data starts after: LFH (30 bytes) + filename + extra field
        let data_offset = entry.lfh_offset + LFH_SIZE as u64 + header.variable_len();
        if data_offset > size {
            return Err(ZipError::CorruptArchive(format!(
                "local header of {} runs past the end of the archive",
                entry.file_name
            )));
        }

        let variable = self.source.read_vec(
            entry.lfh_offset + LFH_SIZE as u64,
            header.variable_len() as usize,
        )?;
        let (local_name, local_extra) = variable.split_at(header.file_name_length as usize);
        if local_name != entry.raw_name.as_slice() {
            return Err(ZipError::CorruptArchive(format!(
                "local header name {:?} does not match central directory name {:?}",
                String::from_utf8_lossy(local_name),
                entry.file_name
            )));
        }
        if header.compression_method != entry.compression_method.as_u16() {
            return Err(ZipError::CorruptArchive(format!(
                "local header of {} declares compression method {}, central directory {}",
                entry.file_name,
                header.compression_method,
                entry.compression_method.as_u16()
            )));
        }
        if header.flags & (FLAG_ENCRYPTED | FLAG_STRONG_ENCRYPTION) != 0 {
            return Err(ZipError::Unsupported(format!(
                "encrypted entry {}",
                entry.file_name
            )));
        }

        // Descriptor sizes are 64-bit exactly when the local header has a
        // ZIP64 record, whatever the central directory says
        let zip64 = header.compressed_size == ZIP64_SENTINEL_32
            || header.uncompressed_size == ZIP64_SENTINEL_32
            || ExtraFields::new(local_extra).any(|(id, _)| id == EXTRA_ZIP64);

        Ok(DataLocation {
            offset: data_offset,
            zip64,
        })
    }

    /// Largest output allowed for `entry`.
    ///
    /// The declared size is the cap; output past it is treated as a
    /// decompression bomb.
    fn output_cap(&self, entry: &EntryMetadata) -> ZipResult<u64> {
        let configured = self.max_output_size.unwrap_or(u64::MAX);
        if entry.uncompressed_size > configured {
            return Err(ZipError::DecompressionLimitExceeded {
                name: entry.file_name.clone(),
                limit: configured,
            });
        }
        Ok(entry.uncompressed_size)
    }

    fn check_data_range(&self, entry: &EntryMetadata, offset: u64, len: u64) -> ZipResult<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.source.size() => Ok(()),
            _ => Err(ZipError::CorruptArchive(format!(
                "data of {} runs past the end of the archive",
                entry.file_name
            ))),
        }
    }

    /// Read the data descriptor following the compressed data and check the
    /// produced sizes against it.
    ///
    /// Returns the CRC-32 to verify against: the descriptor's when one is
    /// present, the central directory's otherwise.
    fn verify_descriptor(
        &self,
        entry: &EntryMetadata,
        location: DataLocation,
        consumed: u64,
        written: u64,
    ) -> ZipResult<u32> {
        let descriptor_offset = location.offset + consumed;
        let available = self
            .source
            .size()
            .saturating_sub(descriptor_offset)
            .min(DataDescriptor::MAX_SIZE as u64) as usize;
        let bytes = self.source.read_vec(descriptor_offset, available)?;

        let agrees = |d: &DataDescriptor| {
            d.compressed_size == consumed && d.uncompressed_size == written
        };
        let Some(mut descriptor) = DataDescriptor::parse(&bytes, location.zip64) else {
            debug!(name = %entry.file_name, "no data descriptor after entry data");
            return Ok(entry.crc32);
        };
        if !agrees(&descriptor) {
            // Some writers pick the descriptor width from the central directory
            if let Some(other) = DataDescriptor::parse(&bytes, !location.zip64).filter(agrees) {
                debug!(name = %entry.file_name, "data descriptor uses the other size width");
                descriptor = other;
            }
        }

        if !agrees(&descriptor) {
            return Err(ZipError::CorruptArchive(format!(
                "data descriptor of {} declares {}/{} bytes, found {}/{}",
                entry.file_name,
                descriptor.compressed_size,
                descriptor.uncompressed_size,
                consumed,
                written
            )));
        }
        Ok(descriptor.crc32)
    }
}

/// Copy `reader` into `out`, hashing along the way and failing once more than
/// `cap` bytes were produced.
fn pump<R: Read + ?Sized, W: Write + ?Sized>(
    reader: &mut R,
    out: &mut W,
    cap: u64,
    entry: &EntryMetadata,
) -> ZipResult<(u64, u32)> {
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut written = 0u64;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ZipError::from_read(e)),
        };
        written += n as u64;
        if written > cap {
            return Err(ZipError::DecompressionLimitExceeded {
                name: entry.file_name.clone(),
                limit: cap,
            });
        }
        hasher.update(&buf[..n]);
        out.write_all(&buf[..n])?;
    }

    Ok((written, hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One local header plus data, no central directory needed.
    fn local_entry(
        name: &str,
        method: u16,
        data: &[u8],
        crc32: u32,
        uncompressed: u64,
    ) -> (Vec<u8>, EntryMetadata) {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(LFH_SIGNATURE);
        bytes.extend_from_slice(&20u16.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&method.to_le_bytes());
        bytes.extend_from_slice(&[0; 4]);
        bytes.extend_from_slice(&crc32.to_le_bytes());
        bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&(uncompressed as u32).to_le_bytes());
        bytes.extend_from_slice(&(name.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(name.as_bytes());
        bytes.extend_from_slice(data);

        let entry = EntryMetadata {
            file_name: name.to_string(),
            raw_name: name.as_bytes().to_vec(),
            comment: String::new(),
            compression_method: CompressionMethod::from_u16(method),
            compressed_size: data.len() as u64,
            uncompressed_size: uncompressed,
            crc32,
            lfh_offset: 0,
            last_mod_time: 0,
            last_mod_date: 0,
            version_made_by: 0,
            flags: 0,
            external_attributes: 0,
            zip64: false,
            is_directory: false,
        };
        (bytes, entry)
    }

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn stored_entry_round_trips() {
        let (source, entry) = local_entry("a.txt", 0, b"hello", crc32fast::hash(b"hello"), 5);
        let extractor = EntryExtractor::new(&source, None);
        assert_eq!(extractor.get_data_offset(&entry).unwrap(), 35);
        assert_eq!(extractor.extract(&entry).unwrap(), b"hello");
    }

    #[test]
    fn deflated_entry_inflates() {
        let text = b"world world world world world world".repeat(20);
        let packed = deflate(&text);
        let (source, entry) =
            local_entry("b.txt", 8, &packed, crc32fast::hash(&text), text.len() as u64);
        let extractor = EntryExtractor::new(&source, None);
        assert_eq!(extractor.extract(&entry).unwrap(), text);
    }

    #[test]
    fn crc_mismatch_is_reported() {
        let (source, entry) = local_entry("a.txt", 0, b"hello", 0x1234_5678, 5);
        let extractor = EntryExtractor::new(&source, None);
        assert!(matches!(
            extractor.extract(&entry),
            Err(ZipError::ChecksumMismatch { expected: 0x1234_5678, .. })
        ));
    }

    #[test]
    fn name_mismatch_is_corruption() {
        let (source, mut entry) =
            local_entry("a.txt", 0, b"hello", crc32fast::hash(b"hello"), 5);
        entry.raw_name = b"z.txt".to_vec();
        let extractor = EntryExtractor::new(&source, None);
        assert!(matches!(
            extractor.extract(&entry),
            Err(ZipError::CorruptArchive(_))
        ));
    }

    #[test]
    fn inflate_past_declared_size_is_a_bomb() {
        let text = vec![0u8; 1 << 20];
        let packed = deflate(&text);
        // Declares 1 KiB but inflates to 1 MiB
        let (source, entry) =
            local_entry("bomb.bin", 8, &packed, crc32fast::hash(&text), 1024);
        let extractor = EntryExtractor::new(&source, None);
        assert!(matches!(
            extractor.extract(&entry),
            Err(ZipError::DecompressionLimitExceeded { limit: 1024, .. })
        ));
    }

    #[test]
    fn configured_cap_rejects_large_declared_size() {
        let (source, entry) = local_entry("a.txt", 0, b"hello", crc32fast::hash(b"hello"), 5);
        let extractor = EntryExtractor::new(&source, Some(4));
        assert!(matches!(
            extractor.extract(&entry),
            Err(ZipError::DecompressionLimitExceeded { limit: 4, .. })
        ));
    }

    #[test]
    fn directory_short_circuits() {
        let (_, mut entry) = local_entry("dir/", 0, b"", 0, 0);
        entry.is_directory = true;
        entry.lfh_offset = 999;
        let source: Vec<u8> = Vec::new();
        let extractor = EntryExtractor::new(&source, None);
        assert_eq!(extractor.extract(&entry).unwrap(), b"");
    }
}
