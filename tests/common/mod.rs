//! Builds ZIP archives byte by byte for the integration tests.

#![allow(dead_code)]

use flate2::Compression;
use flate2::write::DeflateEncoder;
use std::io::Write;

pub const STORED: u16 = 0;
pub const DEFLATED: u16 = 8;

/// One entry to be written.
#[derive(Clone)]
pub struct FileSpec {
    pub name: String,
    pub data: Vec<u8>,
    pub method: u16,
    /// Defer sizes and CRC to a data descriptor (flag bit 3).
    pub descriptor: bool,
    /// Write the optional descriptor signature.
    pub descriptor_signature: bool,
    /// Declared CRC instead of the real one.
    pub crc_override: Option<u32>,
    /// Name written into the local header instead of `name`.
    pub local_name: Option<String>,
    /// Declared uncompressed size instead of the real one.
    pub size_override: Option<u64>,
    pub flags: u16,
    pub external_attributes: u32,
    /// Record only the local header offset in a central ZIP64 extra field.
    pub zip64_offset_only: bool,
}

impl FileSpec {
    pub fn new(name: &str, data: &[u8], method: u16) -> Self {
        Self {
            name: name.to_string(),
            data: data.to_vec(),
            method,
            descriptor: false,
            descriptor_signature: true,
            crc_override: None,
            local_name: None,
            size_override: None,
            flags: 0,
            external_attributes: 0,
            zip64_offset_only: false,
        }
    }

    pub fn with_descriptor(mut self, signature: bool) -> Self {
        self.descriptor = true;
        self.descriptor_signature = signature;
        self
    }
}

pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Accumulates entries and writes local headers, central directory and EOCD.
#[derive(Default)]
pub struct ZipBuilder {
    files: Vec<FileSpec>,
    comment: Vec<u8>,
    zip64: bool,
    entries_override: Option<u16>,
    cd_size_extra: u32,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stored(self, name: &str, data: &[u8]) -> Self {
        self.file(FileSpec::new(name, data, STORED))
    }

    pub fn deflated(self, name: &str, data: &[u8]) -> Self {
        self.file(FileSpec::new(name, data, DEFLATED))
    }

    pub fn file(mut self, spec: FileSpec) -> Self {
        self.files.push(spec);
        self
    }

    pub fn comment(mut self, comment: &[u8]) -> Self {
        self.comment = comment.to_vec();
        self
    }

    /// Record sizes and offsets through ZIP64 structures.
    pub fn zip64(mut self) -> Self {
        self.zip64 = true;
        self
    }

    /// Declare more entries in the EOCD than were written.
    pub fn declare_entries(mut self, count: u16) -> Self {
        self.entries_override = Some(count);
        self
    }

    /// Declare a central directory larger than the one written.
    pub fn inflate_cd_size(mut self, extra: u32) -> Self {
        self.cd_size_extra = extra;
        self
    }

    pub fn finish(self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut central = Vec::new();

        for spec in &self.files {
            let offset = out.len() as u64;
            let crc = spec.crc_override.unwrap_or_else(|| crc32fast::hash(&spec.data));
            let payload = if spec.method == DEFLATED {
                deflate(&spec.data)
            } else {
                spec.data.clone()
            };
            let uncompressed = spec.size_override.unwrap_or(spec.data.len() as u64);
            let compressed = payload.len() as u64;
            let flags = spec.flags | if spec.descriptor { 1 << 3 } else { 0 };
            let local_name = spec.local_name.as_deref().unwrap_or(&spec.name);

            // Local file header
            out.extend_from_slice(b"PK\x03\x04");
            put16(&mut out, if self.zip64 { 45 } else { 20 });
            put16(&mut out, flags);
            put16(&mut out, spec.method);
            put16(&mut out, 0x6B5A);
            put16(&mut out, 0x5A4E);
            if self.zip64 {
                put32(&mut out, if spec.descriptor { 0 } else { crc });
                put32(&mut out, 0xFFFF_FFFF);
                put32(&mut out, 0xFFFF_FFFF);
            } else if spec.descriptor {
                put32(&mut out, 0);
                put32(&mut out, 0);
                put32(&mut out, 0);
            } else {
                put32(&mut out, crc);
                put32(&mut out, compressed as u32);
                put32(&mut out, uncompressed as u32);
            }
            let local_extra = if self.zip64 {
                // Deferred entries leave the sizes to the descriptor
                let known = !spec.descriptor;
                let mut extra = Vec::new();
                put16(&mut extra, 0x0001);
                put16(&mut extra, 16);
                put64(&mut extra, if known { uncompressed } else { 0 });
                put64(&mut extra, if known { compressed } else { 0 });
                extra
            } else {
                Vec::new()
            };
            put16(&mut out, local_name.len() as u16);
            put16(&mut out, local_extra.len() as u16);
            out.extend_from_slice(local_name.as_bytes());
            out.extend_from_slice(&local_extra);
            out.extend_from_slice(&payload);

            if spec.descriptor {
                if spec.descriptor_signature {
                    out.extend_from_slice(b"PK\x07\x08");
                }
                put32(&mut out, crc);
                if self.zip64 {
                    put64(&mut out, compressed);
                    put64(&mut out, uncompressed);
                } else {
                    put32(&mut out, compressed as u32);
                    put32(&mut out, uncompressed as u32);
                }
            }

            // Central directory header
            let cd_extra = if self.zip64 {
                let mut extra = Vec::new();
                put16(&mut extra, 0x0001);
                put16(&mut extra, 24);
                put64(&mut extra, uncompressed);
                put64(&mut extra, compressed);
                put64(&mut extra, offset);
                extra
            } else if spec.zip64_offset_only {
                let mut extra = Vec::new();
                put16(&mut extra, 0x0001);
                put16(&mut extra, 8);
                put64(&mut extra, offset);
                extra
            } else {
                Vec::new()
            };
            central.extend_from_slice(b"PK\x01\x02");
            put16(&mut central, 0x031E);
            put16(&mut central, if self.zip64 { 45 } else { 20 });
            put16(&mut central, flags);
            put16(&mut central, spec.method);
            put16(&mut central, 0x6B5A);
            put16(&mut central, 0x5A4E);
            put32(&mut central, crc);
            if self.zip64 {
                put32(&mut central, 0xFFFF_FFFF);
                put32(&mut central, 0xFFFF_FFFF);
            } else {
                put32(&mut central, compressed as u32);
                put32(&mut central, uncompressed as u32);
            }
            put16(&mut central, spec.name.len() as u16);
            put16(&mut central, cd_extra.len() as u16);
            put16(&mut central, 0);
            put16(&mut central, 0);
            put16(&mut central, 0);
            put32(&mut central, spec.external_attributes);
            put32(
                &mut central,
                if self.zip64 || spec.zip64_offset_only {
                    0xFFFF_FFFF
                } else {
                    offset as u32
                },
            );
            central.extend_from_slice(spec.name.as_bytes());
            central.extend_from_slice(&cd_extra);
        }

        let cd_offset = out.len() as u64;
        let cd_size = central.len() as u64;
        let count = self.files.len() as u64;
        out.extend_from_slice(&central);

        if self.zip64 {
            let eocd64_offset = out.len() as u64;
            out.extend_from_slice(b"PK\x06\x06");
            put64(&mut out, 44);
            put16(&mut out, 45);
            put16(&mut out, 45);
            put32(&mut out, 0);
            put32(&mut out, 0);
            put64(&mut out, count);
            put64(&mut out, count);
            put64(&mut out, cd_size);
            put64(&mut out, cd_offset);

            out.extend_from_slice(b"PK\x06\x07");
            put32(&mut out, 0);
            put64(&mut out, eocd64_offset);
            put32(&mut out, 1);
        }

        let declared = self.entries_override.unwrap_or(count as u16);
        out.extend_from_slice(b"PK\x05\x06");
        put16(&mut out, 0);
        put16(&mut out, 0);
        if self.zip64 {
            put16(&mut out, 0xFFFF);
            put16(&mut out, 0xFFFF);
            put32(&mut out, 0xFFFF_FFFF);
            put32(&mut out, 0xFFFF_FFFF);
        } else {
            put16(&mut out, declared);
            put16(&mut out, declared);
            put32(&mut out, cd_size as u32 + self.cd_size_extra);
            put32(&mut out, cd_offset as u32);
        }
        put16(&mut out, self.comment.len() as u16);
        out.extend_from_slice(&self.comment);
        out
    }
}

pub fn put16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn put32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn put64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// The two-entry archive from the README scenario.
pub fn hello_world_archive() -> Vec<u8> {
    ZipBuilder::new()
        .stored("a.txt", b"hello")
        .deflated("b.txt", world_text().as_bytes())
        .finish()
}

pub fn world_text() -> String {
    "world ".repeat(200)
}
