//! Index file parsing.
//!
//! An index maps `(folder_hash, file_hash)` pairs to [`Locator`]s. Pairs whose
//! hashes collide are flagged in the hash table and listed with their literal
//! path in the synonym table instead.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;
use sqpack_common::BinaryReader;

use crate::format::{HashEntry, IndexHeader, Locator, SqPackHeader, SynonymEntry};
use crate::{Error, Result};

/// A hash table record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Hash of the folder path
    pub folder_hash: u32,
    /// Hash of the file name
    pub file_hash: u32,
    /// Where the entry lives
    pub locator: Locator,
}

/// A synonym table record with its literal path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynonymRecord {
    /// Hash of the file name
    pub name_hash: u32,
    /// Hash of the folder path
    pub path_hash: u32,
    /// Where the entry lives
    pub locator: Locator,
    /// Position among entries sharing the same hashes
    pub conflict_index: u32,
    /// Full path as stored (lowercase, `/` separated)
    pub path: String,
}

/// Parsed contents of one `.index` file.
#[derive(Debug, Clone)]
pub struct IndexFile {
    dat_file_count: u32,
    entries: Vec<IndexEntry>,
    synonyms: Vec<SynonymRecord>,
}

impl IndexFile {
    /// Map and parse an index file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let mmap = unsafe { Mmap::map(&file)? };
        Self::parse(&mmap)
    }

    /// Parse an index file from memory.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = BinaryReader::new(data);
        reader.expect_magic(&SqPackHeader::MAGIC)?;
        reader.seek(0);
        let pack: SqPackHeader = reader.read_struct()?;
        if pack.pack_type != SqPackHeader::TYPE_INDEX {
            return Err(Error::UnexpectedPackType {
                expected: SqPackHeader::TYPE_INDEX,
                actual: pack.pack_type,
            });
        }

        reader.seek(pack.size as usize);
        let header: IndexHeader = reader.read_struct()?;

        let table = section(data, header.hash_table_offset, header.hash_table_size)?;
        let count = table.len() / std::mem::size_of::<HashEntry>();
        let entries: Vec<IndexEntry> = BinaryReader::new(table)
            .read_array::<HashEntry>(count)?
            .into_iter()
            .map(|e| IndexEntry {
                folder_hash: e.folder_hash,
                file_hash: e.file_hash,
                locator: Locator(e.locator),
            })
            .collect();

        let table = section(data, header.synonym_offset, header.synonym_size)?;
        let count = table.len() / std::mem::size_of::<SynonymEntry>();
        let mut synonyms = Vec::new();
        for raw in BinaryReader::new(table).read_array::<SynonymEntry>(count)? {
            if raw.conflict_index == SynonymEntry::TERMINATOR {
                break;
            }
            let name = raw.name;
            let path = BinaryReader::new(&name).read_string_in_buffer(name.len())?;
            synonyms.push(SynonymRecord {
                name_hash: raw.name_hash,
                path_hash: raw.path_hash,
                locator: Locator(raw.locator),
                conflict_index: raw.conflict_index,
                path: path.to_string(),
            });
        }

        tracing::trace!(
            entries = entries.len(),
            synonyms = synonyms.len(),
            dat_files = { header.dat_file_count },
            "parsed index"
        );

        Ok(Self {
            dat_file_count: header.dat_file_count,
            entries,
            synonyms,
        })
    }

    /// Number of `.datN` files this index addresses.
    #[inline]
    pub fn dat_file_count(&self) -> u32 {
        self.dat_file_count
    }

    /// Hash table records, including synonym markers.
    #[inline]
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Synonym records.
    #[inline]
    pub fn synonyms(&self) -> &[SynonymRecord] {
        &self.synonyms
    }
}

fn section(data: &[u8], offset: u32, size: u32) -> Result<&[u8]> {
    let start = offset as usize;
    let end = start + size as usize;
    if end > data.len() {
        return Err(Error::OutOfBounds {
            offset: offset.into(),
            len: size.into(),
            file_len: data.len() as u64,
        });
    }
    Ok(&data[start..end])
}
