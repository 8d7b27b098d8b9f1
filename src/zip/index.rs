use std::collections::HashMap;

use crate::error::{ZipError, ZipResult};

use super::structures::EntryMetadata;

/// Parsed central directory, addressable by position and by name.
///
/// Every record is kept in archive order. When several records share a name,
/// name lookup resolves to the last one.
#[derive(Debug, Default)]
pub struct EntryIndex {
    entries: Vec<EntryMetadata>,
    by_name: HashMap<String, usize>,
}

impl EntryIndex {
    pub fn new(entries: Vec<EntryMetadata>) -> Self {
        let mut by_name = HashMap::with_capacity(entries.len());
        for (position, entry) in entries.iter().enumerate() {
            by_name.insert(entry.file_name.clone(), position);
        }
        Self { entries, by_name }
    }

    pub fn by_name(&self, name: &str) -> ZipResult<&EntryMetadata> {
        self.by_name
            .get(name)
            .map(|&position| &self.entries[position])
            .ok_or_else(|| ZipError::NotFound(name.to_string()))
    }

    pub fn by_index(&self, position: usize) -> Option<&EntryMetadata> {
        self.entries.get(position)
    }

    /// All entries in central directory order.
    pub fn all(&self) -> &[EntryMetadata] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::CompressionMethod;

    fn entry(name: &str, crc32: u32) -> EntryMetadata {
        EntryMetadata {
            file_name: name.to_string(),
            raw_name: name.as_bytes().to_vec(),
            comment: String::new(),
            compression_method: CompressionMethod::Stored,
            compressed_size: 0,
            uncompressed_size: 0,
            crc32,
            lfh_offset: 0,
            last_mod_time: 0,
            last_mod_date: 0,
            version_made_by: 0,
            flags: 0,
            external_attributes: 0,
            zip64: false,
            is_directory: false,
        }
    }

    #[test]
    fn lookup_by_name_and_position() {
        let index = EntryIndex::new(vec![entry("a.txt", 1), entry("b.txt", 2)]);
        assert_eq!(index.len(), 2);
        assert_eq!(index.by_name("b.txt").unwrap().crc32, 2);
        assert_eq!(index.by_index(0).unwrap().file_name, "a.txt");
        assert!(index.by_index(2).is_none());
        assert!(matches!(
            index.by_name("missing.txt"),
            Err(ZipError::NotFound(name)) if name == "missing.txt"
        ));
    }

    #[test]
    fn duplicate_names_keep_all_and_resolve_to_last() {
        let index = EntryIndex::new(vec![
            entry("dup.txt", 1),
            entry("other.txt", 2),
            entry("dup.txt", 3),
        ]);
        let crcs: Vec<u32> = index.all().iter().map(|e| e.crc32).collect();
        assert_eq!(crcs, vec![1, 2, 3]);
        assert_eq!(index.by_name("dup.txt").unwrap().crc32, 3);
    }
}
