//! Locating the central directory.
//!
//! The End of Central Directory record is the only ZIP structure found by
//! scanning instead of by offset: a variable-length archive comment of up to
//! 65535 bytes may follow it. Everything else is reached from the offsets it
//! (or its ZIP64 counterpart) records.

use tracing::{debug, warn};

use crate::error::{ZipError, ZipResult};
use crate::io::ByteSource;

use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Where the central directory lives, after ZIP64 resolution.
#[derive(Debug, Clone)]
pub struct CentralDirectoryLocation {
    /// Absolute offset of the first central directory header.
    pub offset: u64,
    /// Declared size of the central directory in bytes.
    pub size: u64,
    /// Declared number of entries.
    pub total_entries: u64,
    /// Offset of the classic EOCD record.
    pub eocd_offset: u64,
    /// Raw archive comment.
    pub comment: Vec<u8>,
    /// Whether the ZIP64 records were consulted.
    pub zip64: bool,
}

/// Finds the EOCD record (and ZIP64 records) of an archive.
pub struct DirectoryLocator<'a, S: ByteSource + ?Sized> {
    source: &'a S,
    size: u64,
}

impl<'a, S: ByteSource + ?Sized> DirectoryLocator<'a, S> {
    pub fn new(source: &'a S) -> Self {
        let size = source.size();
        Self { source, size }
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// Scans backwards from the end of the file. A candidate signature is
    /// accepted when its comment length reaches exactly to the end of the
    /// input; a signature-like sequence embedded in the comment fails that test
    /// and scanning continues toward the start. If no candidate is exact, the
    /// last one whose comment fits is used (trailing garbage after the archive).
    ///
    /// # Returns
    ///
    /// A tuple of (EOCD record, offset of EOCD in file, raw comment).
    pub fn find_eocd(&self) -> ZipResult<(EndOfCentralDirectory, u64, Vec<u8>)> {
        let eocd_size = EndOfCentralDirectory::SIZE as u64;
        if self.size < eocd_size {
            return Err(ZipError::NoEndOfDirectory);
        }

        // Optimization: First try the simple case where there's no comment.
        // This avoids reading extra data in the common case.
        let offset = self.size - eocd_size;
        let buf = self.source.read_vec(offset, EndOfCentralDirectory::SIZE)?;
        if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && &buf[20..22] == b"\x00\x00" {
            let eocd = EndOfCentralDirectory::from_bytes(&buf, offset)?;
            return Ok((eocd, offset, Vec::new()));
        }

        let search_size = (MAX_COMMENT_SIZE + eocd_size).min(self.size);
        let search_start = self.size - search_size;
        let buf = self.source.read_vec(search_start, search_size as usize)?;

        let mut fallback = None;
        for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
            if &buf[i..i + 4] != EndOfCentralDirectory::SIGNATURE {
                continue;
            }
            let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;
            let comment_start = i + EndOfCentralDirectory::SIZE;
            let comment_end = comment_start + comment_len;

            if comment_end == buf.len() {
                let eocd = EndOfCentralDirectory::from_bytes(
                    &buf[i..comment_start],
                    search_start + i as u64,
                )?;
                return Ok((
                    eocd,
                    search_start + i as u64,
                    buf[comment_start..comment_end].to_vec(),
                ));
            }
            if comment_end < buf.len() && fallback.is_none() {
                fallback = Some(i);
            }
        }

        if let Some(i) = fallback {
            let comment_start = i + EndOfCentralDirectory::SIZE;
            let eocd = EndOfCentralDirectory::from_bytes(
                &buf[i..comment_start],
                search_start + i as u64,
            )?;
            let comment_end = comment_start + eocd.comment_len as usize;
            warn!(
                trailing = buf.len() - comment_end,
                "ignoring trailing bytes after end of central directory"
            );
            return Ok((
                eocd,
                search_start + i as u64,
                buf[comment_start..comment_end].to_vec(),
            ));
        }

        Err(ZipError::NoEndOfDirectory)
    }

    /// Read the ZIP64 locator and End of Central Directory record.
    ///
    /// Called when the regular EOCD carries sentinel values. The locator sits
    /// immediately before the regular EOCD.
    ///
    /// # Returns
    ///
    /// The parsed ZIP64 EOCD and its offset.
    pub fn read_zip64_eocd(&self, eocd_offset: u64) -> ZipResult<(Zip64EOCD, u64)> {
        let locator_offset = eocd_offset
            .checked_sub(Zip64EOCDLocator::SIZE as u64)
            .ok_or_else(|| {
                ZipError::UnsupportedZip64("no room for a ZIP64 locator before the EOCD".into())
            })?;
        let locator_buf = self
            .source
            .read_vec(locator_offset, Zip64EOCDLocator::SIZE)?;
        let locator = Zip64EOCDLocator::from_bytes(&locator_buf)?;

        if locator.total_disks > 1 || locator.disk_with_eocd64 != 0 {
            return Err(ZipError::Unsupported("multi-volume archives".into()));
        }

        let record_end = locator
            .eocd64_offset
            .checked_add(Zip64EOCD::MIN_SIZE as u64)
            .filter(|&end| end <= locator_offset)
            .ok_or_else(|| {
                ZipError::UnsupportedZip64(format!(
                    "ZIP64 end of central directory offset {} is out of range",
                    locator.eocd64_offset
                ))
            })?;
        debug!(offset = locator.eocd64_offset, end = record_end, "reading ZIP64 EOCD");

        let eocd64_buf = self
            .source
            .read_vec(locator.eocd64_offset, Zip64EOCD::MIN_SIZE)?;
        let eocd64 = Zip64EOCD::from_bytes(&eocd64_buf)?;

        // Version 2 of the record belongs to central directory encryption
        if eocd64.version_needed >= 62 {
            return Err(ZipError::UnsupportedZip64(format!(
                "ZIP64 end of central directory version {} (central directory encryption)",
                eocd64.version_needed
            )));
        }
        if eocd64.disk_number != 0 || eocd64.disk_with_cd != 0 {
            return Err(ZipError::Unsupported("multi-volume archives".into()));
        }

        Ok((eocd64, locator.eocd64_offset))
    }

    /// Resolve the location of the central directory.
    ///
    /// Checks that the declared directory fits before the trailing records, so a
    /// truncated archive fails here rather than partway through parsing.
    pub fn locate(&self) -> ZipResult<CentralDirectoryLocation> {
        let (eocd, eocd_offset, comment) = self.find_eocd()?;
        debug!(
            eocd_offset,
            entries = eocd.total_entries,
            cd_size = eocd.cd_size,
            cd_offset = eocd.cd_offset,
            "found end of central directory"
        );

        let (offset, size, total_entries, directory_end, zip64) = if eocd.is_zip64() {
            let (eocd64, eocd64_offset) = self.read_zip64_eocd(eocd_offset)?;
            if eocd64.disk_entries != eocd64.total_entries {
                return Err(ZipError::Unsupported("multi-volume archives".into()));
            }
            (
                eocd64.cd_offset,
                eocd64.cd_size,
                eocd64.total_entries,
                eocd64_offset,
                true,
            )
        } else {
            if eocd.disk_number != 0
                || eocd.disk_with_cd != 0
                || eocd.disk_entries != eocd.total_entries
            {
                return Err(ZipError::Unsupported("multi-volume archives".into()));
            }
            (
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.total_entries as u64,
                eocd_offset,
                false,
            )
        };

        let fits = offset
            .checked_add(size)
            .is_some_and(|end| end <= directory_end);
        let room_for_entries = total_entries
            .checked_mul(CDFH_MIN_SIZE as u64)
            .is_some_and(|needed| needed <= size);
        if !fits || !room_for_entries {
            return Err(ZipError::TruncatedCentralDirectory);
        }

        Ok(CentralDirectoryLocation {
            offset,
            size,
            total_entries,
            eocd_offset,
            comment,
            zip64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eocd(entries: u16, cd_size: u32, cd_offset: u32, comment: &[u8]) -> Vec<u8> {
        let mut buf = b"PK\x05\x06".to_vec();
        buf.extend_from_slice(&[0, 0, 0, 0]);
        buf.extend_from_slice(&entries.to_le_bytes());
        buf.extend_from_slice(&entries.to_le_bytes());
        buf.extend_from_slice(&cd_size.to_le_bytes());
        buf.extend_from_slice(&cd_offset.to_le_bytes());
        buf.extend_from_slice(&(comment.len() as u16).to_le_bytes());
        buf.extend_from_slice(comment);
        buf
    }

    #[test]
    fn empty_archive() {
        let data = eocd(0, 0, 0, b"");
        let location = DirectoryLocator::new(&data).locate().unwrap();
        assert_eq!(location.total_entries, 0);
        assert_eq!(location.eocd_offset, 0);
        assert!(!location.zip64);
    }

    #[test]
    fn too_small_for_a_record() {
        let data = b"PK\x05\x06".to_vec();
        assert!(matches!(
            DirectoryLocator::new(&data).find_eocd(),
            Err(ZipError::NoEndOfDirectory)
        ));
    }

    #[test]
    fn signature_inside_comment_is_skipped() {
        let mut comment = b"xx".to_vec();
        comment.extend_from_slice(&eocd(7, 0, 0, b""));
        comment.extend_from_slice(b"yy");
        let mut data = vec![0u8; 10];
        data.extend_from_slice(&eocd(0, 0, 10, &comment));

        let (record, offset, found_comment) =
            DirectoryLocator::new(&data).find_eocd().unwrap();
        assert_eq!(offset, 10);
        assert_eq!(record.total_entries, 0);
        assert_eq!(found_comment, comment);
    }

    #[test]
    fn trailing_bytes_fall_back_to_last_candidate() {
        let mut data = eocd(0, 0, 0, b"note");
        data.extend_from_slice(b"appended garbage");

        let (_, offset, comment) = DirectoryLocator::new(&data).find_eocd().unwrap();
        assert_eq!(offset, 0);
        assert_eq!(comment, b"note");
    }

    #[test]
    fn zip64_sentinels_without_locator() {
        let mut data = vec![0u8; 40];
        data.extend_from_slice(&eocd(0xFFFF, u32::MAX, u32::MAX, b""));
        assert!(matches!(
            DirectoryLocator::new(&data).locate(),
            Err(ZipError::UnsupportedZip64(_))
        ));
    }

    #[test]
    fn directory_past_the_trailer_is_truncated() {
        let data = eocd(1, 46, 0, b"");
        assert!(matches!(
            DirectoryLocator::new(&data).locate(),
            Err(ZipError::TruncatedCentralDirectory)
        ));
    }
}
