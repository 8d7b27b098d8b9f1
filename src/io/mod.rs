//! Random-access byte sources.
//!
//! The format engine never touches a file cursor. It asks a [`ByteSource`] for
//! an explicit `(offset, length)` range, which keeps concurrent extraction of
//! different entries free of shared seek state.

mod http;
mod local;
mod reader;

pub use http::HttpRangeSource;
pub use local::LocalFileSource;
pub use reader::SourceReader;

use std::sync::Arc;

use crate::error::{ZipError, ZipResult};

/// Trait for random access reading from a data source
pub trait ByteSource: Send + Sync {
    /// Fill `buf` with the bytes starting at `offset`.
    ///
    /// Either the whole buffer is filled or the call fails; running past the end
    /// of the source is [`ZipError::TruncatedRead`].
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> ZipResult<()>;

    /// Get the total size of the data source
    fn size(&self) -> u64;

    /// Read `len` bytes at `offset` into a fresh buffer.
    fn read_vec(&self, offset: u64, len: usize) -> ZipResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_at(offset, &mut buf)?;
        Ok(buf)
    }
}

/// Bounds check shared by the implementations.
pub(crate) fn check_range(offset: u64, len: usize, size: u64) -> ZipResult<()> {
    let end = offset.checked_add(len as u64);
    match end {
        Some(end) if end <= size => Ok(()),
        _ => Err(ZipError::TruncatedRead {
            offset,
            requested: len,
            available: size.saturating_sub(offset),
        }),
    }
}

impl ByteSource for Vec<u8> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> ZipResult<()> {
        check_range(offset, buf.len(), self.len() as u64)?;
        let start = offset as usize;
        buf.copy_from_slice(&self[start..start + buf.len()]);
        Ok(())
    }

    fn size(&self) -> u64 {
        self.len() as u64
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Arc<S> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> ZipResult<()> {
        (**self).read_at(offset, buf)
    }

    fn size(&self) -> u64 {
        (**self).size()
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> ZipResult<()> {
        (**self).read_at(offset, buf)
    }

    fn size(&self) -> u64 {
        (**self).size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_source_reads_exact_ranges() {
        let source = b"0123456789".to_vec();
        assert_eq!(source.size(), 10);
        assert_eq!(source.read_vec(3, 4).unwrap(), b"3456");
        assert_eq!(source.read_vec(10, 0).unwrap(), b"");
    }

    #[test]
    fn vec_source_rejects_short_reads() {
        let source = b"0123456789".to_vec();
        match source.read_vec(8, 5) {
            Err(ZipError::TruncatedRead {
                offset,
                requested,
                available,
            }) => {
                assert_eq!((offset, requested, available), (8, 5, 2));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn offset_overflow_is_truncated_read() {
        let source = vec![0u8; 4];
        assert!(matches!(
            source.read_vec(u64::MAX, 2),
            Err(ZipError::TruncatedRead { .. })
        ));
    }
}
