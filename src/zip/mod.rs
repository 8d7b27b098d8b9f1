//! ZIP archive indexing and extraction.
//!
//! Only the central directory is parsed when an archive is opened; entry data
//! is read and decompressed when it is asked for.
//!
//! - [`structures`]: fixed-layout records (EOCD, ZIP64 records, local headers,
//!   data descriptors) and [`EntryMetadata`]
//! - [`locator`]: the backward scan for the EOCD and ZIP64 resolution
//! - [`parser`]: streams central directory headers into [`EntryMetadata`]
//! - [`index`]: lookup by name and by position
//! - [`extractor`]: local header checks, inflate, CRC-32 and output caps
//! - [`archive`]: the [`ZipArchive`] handle
//!
//! Reading starts at the end of the file: the EOCD record names the central
//! directory, and each directory header names its local header. Nothing in
//! front of the requested entry is touched, which keeps remote access down to
//! a handful of range requests.
//!
//! STORED and DEFLATE entries are extracted, with or without data
//! descriptors, in plain and ZIP64 archives. Encrypted entries and split
//! archives are reported as unsupported; entries using other methods are
//! listed but fail to extract.

pub mod archive;
mod cp437;
pub mod extractor;
pub mod index;
pub mod locator;
pub mod parser;
pub mod structures;

pub use archive::{ArchiveOptions, Entry, NameEncoding, ZipArchive};
pub use extractor::EntryExtractor;
pub use index::EntryIndex;
pub use locator::{CentralDirectoryLocation, DirectoryLocator};
pub use parser::DirectoryParser;
pub use structures::*;
