//! Error types for archive operations.
//!
//! Every failure the library can report is a [`ZipError`] variant. Format
//! problems surface while opening the archive; per-entry problems (checksum,
//! compression method, local header) surface only when that entry is extracted.

use std::io;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type ZipResult<T> = Result<T, ZipError>;

/// The error type for reading ZIP archives.
#[derive(Debug, Error)]
pub enum ZipError {
    /// No End Of Central Directory record in the scanned tail of the input.
    #[error("end of central directory record not found (not a ZIP archive, or truncated)")]
    NoEndOfDirectory,

    /// The central directory extends past the end of the input, or ends before all
    /// declared entries were read.
    #[error("central directory is truncated")]
    TruncatedCentralDirectory,

    /// ZIP64 sentinels were present but the ZIP64 structures are missing or of an
    /// unsupported variant.
    #[error("unsupported ZIP64 archive: {0}")]
    UnsupportedZip64(String),

    /// A structure did not start with its expected signature.
    #[error("invalid {structure} signature at offset {offset}")]
    InvalidSignature {
        /// Name of the structure that was expected.
        structure: &'static str,
        /// Absolute offset in the archive.
        offset: u64,
    },

    /// A feature of the format that this reader detects but does not handle,
    /// such as encryption or multi-volume archives.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Central directory and local headers disagree, or offsets point outside
    /// the archive.
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    /// CRC-32 of the produced bytes does not match the declared value.
    #[error("checksum mismatch for {name}: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// Entry name.
        name: String,
        /// Declared CRC-32.
        expected: u32,
        /// CRC-32 of the extracted bytes.
        computed: u32,
    },

    /// The entry uses a compression method other than STORED or DEFLATED.
    #[error("unsupported compression method: {0}")]
    UnsupportedCompressionMethod(u16),

    /// Decompressed output would exceed the configured cap or the declared size.
    #[error("decompression limit of {limit} bytes exceeded for {name}")]
    DecompressionLimitExceeded {
        /// Entry name.
        name: String,
        /// The limit that was hit.
        limit: u64,
    },

    /// No entry with this name.
    #[error("entry not found: {0}")]
    NotFound(String),

    /// Name lookups were requested on an archive opened without an entry index.
    #[error("random access is disabled (archive opened with store_entries = false)")]
    RandomAccessDisabled,

    /// The archive handle has been closed.
    #[error("archive is closed")]
    ArchiveClosed,

    /// A positioned read ran past the end of the byte source.
    #[error("truncated read: {requested} bytes requested at offset {offset}, {available} available")]
    TruncatedRead {
        /// Requested offset.
        offset: u64,
        /// Requested length.
        requested: usize,
        /// Bytes that were actually available from `offset`.
        available: u64,
    },

    /// Failure of the remote byte source.
    #[error("HTTP error: {0}")]
    Http(String),

    /// I/O error from the underlying byte source.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ZipError {
    /// Convert an error coming out of a `Read` adapter.
    ///
    /// Byte sources report through [`ZipError`]; when such an error is tunnelled
    /// through `std::io::Read` it is unwrapped here again. Invalid data reported
    /// or a premature end reported by the inflater becomes
    /// [`ZipError::CorruptArchive`].
    pub(crate) fn from_read(err: io::Error) -> Self {
        if err.get_ref().is_some_and(|inner| inner.is::<ZipError>()) {
            if let Some(inner) = err.into_inner() {
                if let Ok(zip_err) = inner.downcast::<ZipError>() {
                    return *zip_err;
                }
            }
            return ZipError::CorruptArchive("unreadable error from byte source".into());
        }
        match err.kind() {
            io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput => {
                ZipError::CorruptArchive(format!("invalid compressed data: {err}"))
            }
            io::ErrorKind::UnexpectedEof => {
                ZipError::CorruptArchive(format!("compressed data ends early: {err}"))
            }
            _ => ZipError::Io(err),
        }
    }

    /// Wrap this error so it can travel through `std::io::Read`.
    pub(crate) fn into_io(self) -> io::Error {
        match self {
            ZipError::Io(err) => err,
            other => io::Error::other(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip_error_survives_io_tunnel() {
        let err = ZipError::TruncatedCentralDirectory.into_io();
        assert!(matches!(
            ZipError::from_read(err),
            ZipError::TruncatedCentralDirectory
        ));
    }

    #[test]
    fn invalid_data_maps_to_corrupt_archive() {
        let err = io::Error::new(io::ErrorKind::InvalidInput, "corrupt deflate stream");
        assert!(matches!(ZipError::from_read(err), ZipError::CorruptArchive(_)));
    }

    #[test]
    fn plain_io_error_stays_io() {
        let err = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(ZipError::from_read(err), ZipError::Io(_)));
    }
}
