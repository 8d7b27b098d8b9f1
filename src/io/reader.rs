use std::io::{self, Read};

use super::ByteSource;

/// Largest single request issued to the source.
///
/// Keeps memory bounded for local files and keeps HTTP range requests
/// reasonably sized.
const MAX_CHUNK: usize = 64 * 1024;

/// A `Read` view over `[start, end)` of a [`ByteSource`].
///
/// Errors from the source are tunnelled through `std::io::Error` and recovered
/// with `ZipError::from_read` on the other side.
pub struct SourceReader<'a, S: ByteSource + ?Sized> {
    source: &'a S,
    pos: u64,
    end: u64,
}

impl<'a, S: ByteSource + ?Sized> SourceReader<'a, S> {
    /// Reader over `len` bytes starting at `start`.
    pub fn new(source: &'a S, start: u64, len: u64) -> Self {
        Self {
            source,
            pos: start,
            end: start.saturating_add(len),
        }
    }

    /// Reader from `start` to the end of the source.
    pub fn to_end(source: &'a S, start: u64) -> Self {
        let end = source.size();
        Self {
            source,
            pos: start.min(end),
            end,
        }
    }

    /// Absolute offset of the next byte to be read.
    pub fn position(&self) -> u64 {
        self.pos
    }
}

impl<S: ByteSource + ?Sized> Read for SourceReader<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.end.saturating_sub(self.pos);
        let n = (buf.len() as u64).min(remaining).min(MAX_CHUNK as u64) as usize;
        if n == 0 {
            return Ok(0);
        }
        self.source
            .read_at(self.pos, &mut buf[..n])
            .map_err(|e| e.into_io())?;
        self.pos += n as u64;
        Ok(n)
    }
}
