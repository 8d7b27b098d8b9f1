//! The archive handle.
//!
//! [`ZipArchive`] owns the byte source and the entry index. Opening it locates
//! and parses the whole central directory, so format errors surface
//! immediately; per-entry errors only surface when that entry is extracted.

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::error::{ZipError, ZipResult};
use crate::io::{ByteSource, LocalFileSource};

use super::extractor::EntryExtractor;
use super::index::EntryIndex;
use super::locator::{CentralDirectoryLocation, DirectoryLocator};
use super::parser::{DirectoryParser, decode_text};
use super::structures::EntryMetadata;

/// How names and comments without the UTF-8 flag are decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NameEncoding {
    /// UTF-8 when the entry sets the UTF-8 flag, IBM437 otherwise.
    #[default]
    Auto,
    /// Always try UTF-8 first, falling back to IBM437.
    Utf8,
}

/// Options recognized when opening an archive.
#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    /// Keep the parsed entries for random access. When false, only
    /// [`ZipArchive::for_each_entry`] works and name lookups fail with
    /// [`ZipError::RandomAccessDisabled`].
    pub store_entries: bool,
    /// Upper bound on the bytes produced for any single entry.
    pub max_output_size: Option<u64>,
    pub name_encoding: NameEncoding,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            store_entries: true,
            max_output_size: None,
            name_encoding: NameEncoding::Auto,
        }
    }
}

impl ArchiveOptions {
    pub fn store_entries(mut self, store: bool) -> Self {
        self.store_entries = store;
        self
    }

    pub fn max_output_size(mut self, limit: Option<u64>) -> Self {
        self.max_output_size = limit;
        self
    }

    pub fn name_encoding(mut self, encoding: NameEncoding) -> Self {
        self.name_encoding = encoding;
        self
    }
}

struct OpenArchive<S> {
    source: S,
    index: Option<EntryIndex>,
}

/// Open state plus the number of operations currently using it.
struct Lifecycle<S> {
    open: Option<Arc<OpenArchive<S>>>,
    in_flight: usize,
}

/// One running operation. Keeps the source alive and lets
/// [`ZipArchive::close`] know when the archive has gone idle.
struct Operation<'a, S: ByteSource> {
    archive: &'a ZipArchive<S>,
    open: Option<Arc<OpenArchive<S>>>,
}

impl<S: ByteSource> Drop for Operation<'_, S> {
    fn drop(&mut self) {
        // Release the source before close() can observe the archive as idle
        drop(self.open.take());
        let mut state = self.archive.lock_state();
        state.in_flight -= 1;
        if state.in_flight == 0 {
            self.archive.idle.notify_all();
        }
    }
}

/// A read-only ZIP archive.
///
/// All methods take `&self`; entries may be extracted from several threads at
/// once. [`close`](Self::close) rejects new operations at once and returns
/// after the in-flight ones have finished; from then on every operation fails
/// with [`ZipError::ArchiveClosed`].
///
/// ## Example
///
/// ```no_run
/// use std::path::Path;
/// use pickzip::ZipArchive;
///
/// let archive = ZipArchive::open_path(Path::new("archive.zip"))?;
/// for entry in archive.entries()? {
///     println!("{} ({} bytes)", entry.file_name, entry.uncompressed_size);
/// }
/// let readme = archive.extract("README.md")?;
/// archive.close();
/// # Ok::<(), pickzip::ZipError>(())
/// ```
pub struct ZipArchive<S: ByteSource> {
    state: Mutex<Lifecycle<S>>,
    idle: Condvar,
    location: CentralDirectoryLocation,
    comment: String,
    entry_count: usize,
    options: ArchiveOptions,
}

impl ZipArchive<LocalFileSource> {
    /// Open a ZIP file on disk with default options.
    pub fn open_path(path: &Path) -> ZipResult<Self> {
        Self::open_with(LocalFileSource::new(path)?, ArchiveOptions::default())
    }
}

impl<S: ByteSource> ZipArchive<S> {
    pub fn open(source: S) -> ZipResult<Self> {
        Self::open_with(source, ArchiveOptions::default())
    }

    /// Open an archive, parsing and validating its whole central directory.
    pub fn open_with(source: S, options: ArchiveOptions) -> ZipResult<Self> {
        let location = DirectoryLocator::new(&source).locate()?;
        let parser = DirectoryParser::new(&source, &location, options.name_encoding);

        let (index, entry_count) = if options.store_entries {
            let entries = parser.collect::<ZipResult<Vec<_>>>()?;
            let count = entries.len();
            (Some(EntryIndex::new(entries)), count)
        } else {
            let mut count = 0;
            for entry in parser {
                entry?;
                count += 1;
            }
            (None, count)
        };

        let comment = decode_text(&location.comment, false, options.name_encoding);
        debug!(
            entries = entry_count,
            zip64 = location.zip64,
            indexed = options.store_entries,
            "opened archive"
        );

        Ok(Self {
            state: Mutex::new(Lifecycle {
                open: Some(Arc::new(OpenArchive { source, index })),
                in_flight: 0,
            }),
            idle: Condvar::new(),
            location,
            comment,
            entry_count,
            options,
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, Lifecycle<S>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an operation; fails once the archive is closed.
    fn begin(&self) -> ZipResult<Operation<'_, S>> {
        let mut state = self.lock_state();
        let open = state.open.clone().ok_or(ZipError::ArchiveClosed)?;
        state.in_flight += 1;
        Ok(Operation {
            archive: self,
            open: Some(open),
        })
    }

    /// Run `f` against the open state. No lock is held while `f` runs.
    fn with_open<T>(&self, f: impl FnOnce(&OpenArchive<S>) -> ZipResult<T>) -> ZipResult<T> {
        let operation = self.begin()?;
        match operation.open.as_deref() {
            Some(open) => f(open),
            None => Err(ZipError::ArchiveClosed),
        }
    }

    fn with_index<T>(&self, f: impl FnOnce(&S, &EntryIndex) -> ZipResult<T>) -> ZipResult<T> {
        self.with_open(|open| match &open.index {
            Some(index) => f(&open.source, index),
            None => Err(ZipError::RandomAccessDisabled),
        })
    }

    fn extractor<'a>(&self, source: &'a S) -> EntryExtractor<'a, S> {
        EntryExtractor::new(source, self.options.max_output_size)
    }

    /// All entries in central directory order.
    pub fn entries(&self) -> ZipResult<Vec<EntryMetadata>> {
        self.with_index(|_, index| Ok(index.all().to_vec()))
    }

    pub fn by_name(&self, name: &str) -> ZipResult<EntryMetadata> {
        self.with_index(|_, index| index.by_name(name).cloned())
    }

    pub fn by_index(&self, position: usize) -> ZipResult<Option<EntryMetadata>> {
        self.with_index(|_, index| Ok(index.by_index(position).cloned()))
    }

    /// Number of entries in the central directory.
    pub fn len(&self) -> usize {
        self.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    /// Decoded archive comment.
    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn is_zip64(&self) -> bool {
        self.location.zip64
    }

    /// Extract an entry by name into memory.
    pub fn extract(&self, name: &str) -> ZipResult<Vec<u8>> {
        self.with_index(|source, index| self.extractor(source).extract(index.by_name(name)?))
    }

    /// Stream an entry by name into `out`; see [`EntryExtractor::extract_to`].
    pub fn extract_to<W: Write + ?Sized>(&self, name: &str, out: &mut W) -> ZipResult<u64> {
        self.with_index(|source, index| {
            self.extractor(source)
                .extract_to(index.by_name(name)?, out)
        })
    }

    /// Extract an entry whose metadata was obtained from this archive.
    pub fn extract_entry(&self, entry: &EntryMetadata) -> ZipResult<Vec<u8>> {
        self.with_open(|open| self.extractor(&open.source).extract(entry))
    }

    pub fn extract_entry_to<W: Write + ?Sized>(
        &self,
        entry: &EntryMetadata,
        out: &mut W,
    ) -> ZipResult<u64> {
        self.with_open(|open| self.extractor(&open.source).extract_to(entry, out))
    }

    /// Visit every entry in archive order with a single pass over the central
    /// directory.
    ///
    /// Works whether or not the entries were stored at open time. Stops at the
    /// first error returned by `f`. `f` may call other methods of this archive;
    /// once another thread has called [`close`](Self::close) they fail with
    /// [`ZipError::ArchiveClosed`]. `f` must not call `close` itself, which
    /// would wait for this very pass.
    pub fn for_each_entry<F>(&self, mut f: F) -> ZipResult<()>
    where
        F: FnMut(Entry<'_, S>) -> ZipResult<()>,
    {
        self.with_open(|open| {
            let parser =
                DirectoryParser::new(&open.source, &self.location, self.options.name_encoding);
            for metadata in parser {
                f(Entry {
                    metadata: metadata?,
                    extractor: self.extractor(&open.source),
                })?;
            }
            Ok(())
        })
    }

    /// Release the byte source and the index.
    ///
    /// New operations fail with [`ZipError::ArchiveClosed`] as soon as this is
    /// called; it returns once the in-flight ones have finished. Calling it
    /// again does nothing.
    pub fn close(&self) {
        let mut state = self.lock_state();
        let open = state.open.take();
        while state.in_flight > 0 {
            state = self.idle.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        drop(state);
        if open.is_some() {
            drop(open);
            debug!("closed archive");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock_state().open.is_none()
    }
}

/// An entry handed out by [`ZipArchive::for_each_entry`].
pub struct Entry<'a, S: ByteSource + ?Sized> {
    metadata: EntryMetadata,
    extractor: EntryExtractor<'a, S>,
}

impl<S: ByteSource + ?Sized> Entry<'_, S> {
    pub fn metadata(&self) -> &EntryMetadata {
        &self.metadata
    }

    pub fn into_metadata(self) -> EntryMetadata {
        self.metadata
    }

    pub fn read_to_vec(&self) -> ZipResult<Vec<u8>> {
        self.extractor.extract(&self.metadata)
    }

    pub fn copy_to<W: Write + ?Sized>(&self, out: &mut W) -> ZipResult<u64> {
        self.extractor.extract_to(&self.metadata, out)
    }
}
