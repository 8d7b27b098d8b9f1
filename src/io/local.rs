use super::{ByteSource, check_range};
use crate::error::ZipResult;
use std::path::Path;

/// Local file source with random access support.
///
/// On unix the reads are positioned (`pread`) and never move a shared cursor.
/// Elsewhere the seek+read pair is serialized behind a mutex so concurrent
/// extractions cannot interleave.
pub struct LocalFileSource {
    #[cfg(unix)]
    file: std::fs::File,
    #[cfg(not(unix))]
    file: std::sync::Mutex<std::fs::File>,
    size: u64,
}

impl LocalFileSource {
    pub fn new(path: &Path) -> ZipResult<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_file(file)
    }

    /// Wrap an already-open file.
    pub fn from_file(file: std::fs::File) -> ZipResult<Self> {
        let size = file.metadata()?.len();
        #[cfg(not(unix))]
        let file = std::sync::Mutex::new(file);
        Ok(Self { file, size })
    }
}

impl ByteSource for LocalFileSource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> ZipResult<()> {
        check_range(offset, buf.len(), self.size)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file.read_exact_at(buf, offset)?;
        }

        #[cfg(not(unix))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let mut file = self
                .file
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(buf)?;
        }

        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }
}
