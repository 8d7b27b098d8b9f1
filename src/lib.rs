//! # pickzip
//!
//! Read-only, memory-efficient access to the entries of a ZIP archive.
//!
//! Opening an archive parses only its central directory. Individual entries are
//! then located through their local headers and decompressed on demand, so a
//! single file can be pulled out of a large archive, local or remote, without
//! reading the rest of it. For remote files, HTTP Range requests fetch only the
//! necessary parts of the archive.
//!
//! ## Features
//!
//! - Local files and HTTP/HTTPS URLs (via Range requests)
//! - ZIP64 archives
//! - STORED and DEFLATE entries, including entries with data descriptors
//! - CRC-32 verification and a configurable cap against decompression bombs
//! - Safe concurrent extraction from one open archive
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use pickzip::{ArchiveOptions, LocalFileSource, ZipArchive};
//!
//! fn main() -> pickzip::ZipResult<()> {
//!     let source = LocalFileSource::new(Path::new("archive.zip"))?;
//!     let options = ArchiveOptions::default().max_output_size(Some(64 << 20));
//!     let archive = ZipArchive::open_with(source, options)?;
//!
//!     for entry in archive.entries()? {
//!         println!("{}", entry.file_name);
//!     }
//!     let data = archive.extract("docs/readme.txt")?;
//!     println!("{} bytes", data.len());
//!
//!     archive.close();
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod error;
pub mod io;
pub mod zip;

pub use cli::Cli;
pub use error::{ZipError, ZipResult};
pub use io::{ByteSource, HttpRangeSource, LocalFileSource, SourceReader};
pub use zip::{ArchiveOptions, CompressionMethod, EntryMetadata, NameEncoding, ZipArchive};
