//! Pack-level headers and index tables.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Common header at offset 0 of every index and dat file.
///
/// Only the leading fields are modelled; the header occupies `size` bytes.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct SqPackHeader {
    /// `"SqPack\0\0"`
    pub magic: [u8; 8],
    /// Platform id (0 = win32)
    pub platform: u8,
    /// Padding
    pub padding: [u8; 3],
    /// Size of the whole header block (0x400)
    pub size: u32,
    /// Format version
    pub version: u32,
    /// 1 = dat, 2 = index
    pub pack_type: u32,
}

impl SqPackHeader {
    /// Magic bytes.
    pub const MAGIC: [u8; 8] = *b"SqPack\0\0";
    /// On-disk size of the padded header block.
    pub const BLOCK_SIZE: u32 = 0x400;
    /// `pack_type` of dat files.
    pub const TYPE_DAT: u32 = 1;
    /// `pack_type` of index files.
    pub const TYPE_INDEX: u32 = 2;
}

/// Index header, directly after the [`SqPackHeader`] block.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct IndexHeader {
    /// Header size (0x400)
    pub size: u32,
    /// Format version
    pub version: u32,
    /// Offset of the hash table
    pub hash_table_offset: u32,
    /// Size of the hash table in bytes
    pub hash_table_size: u32,
    /// Digest of the hash table
    pub hash_table_digest: [u8; 64],
    /// Number of `.datN` files
    pub dat_file_count: u32,
    /// Offset of the synonym table
    pub synonym_offset: u32,
    /// Size of the synonym table in bytes
    pub synonym_size: u32,
    /// Digest of the synonym table
    pub synonym_digest: [u8; 64],
    /// Offset of the empty block table
    pub empty_block_offset: u32,
    /// Size of the empty block table
    pub empty_block_size: u32,
    /// Digest of the empty block table
    pub empty_block_digest: [u8; 64],
    /// Offset of the folder segment table
    pub dir_index_offset: u32,
    /// Size of the folder segment table
    pub dir_index_size: u32,
    /// Digest of the folder segment table
    pub dir_index_digest: [u8; 64],
    /// 0 for folder/file hashed indexes
    pub index_type: u32,
    /// Reserved
    pub reserved: [u8; 656],
    /// Digest of this header
    pub digest: [u8; 64],
}

/// Hash table record keyed by `(folder_hash, file_hash)`.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct HashEntry {
    /// Hash of the lowercased file name
    pub file_hash: u32,
    /// Hash of the lowercased folder path
    pub folder_hash: u32,
    /// Packed [`Locator`](super::Locator)
    pub locator: u32,
    /// Padding
    pub padding: u32,
}

/// Synonym table record holding the literal path of a colliding entry.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct SynonymEntry {
    /// Hash of the file name
    pub name_hash: u32,
    /// Hash of the folder path
    pub path_hash: u32,
    /// Packed [`Locator`](super::Locator)
    pub locator: u32,
    /// Index among entries sharing the same hashes; `u32::MAX` terminates
    pub conflict_index: u32,
    /// NUL-terminated full path
    pub name: [u8; 240],
}

impl SynonymEntry {
    /// `conflict_index` of the terminating record.
    pub const TERMINATOR: u32 = u32::MAX;
}
