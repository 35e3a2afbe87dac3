//! Discovery of the index files that make up an installation.
//!
//! Index files live in `sqpack/<expansion>/<cc><ee><kk>.<platform>.index`,
//! where `cc` is the category, `ee` the expansion and `kk` the chunk. Chunks
//! of one `(category, expansion)` pair form a [`Bucket`], which is presented as
//! a single folder (`chara/`, `bg/ex1/`, ...).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::index::IndexFile;
use crate::{Error, Result};

/// Category id to folder name.
const CATEGORIES: &[(u8, &str)] = &[
    (0x00, "common"),
    (0x01, "bgcommon"),
    (0x02, "bg"),
    (0x03, "cut"),
    (0x04, "chara"),
    (0x05, "shader"),
    (0x06, "ui"),
    (0x07, "sound"),
    (0x08, "vfx"),
    (0x09, "ui_script"),
    (0x0a, "exd"),
    (0x0b, "game_script"),
    (0x0c, "music"),
    (0x12, "sqpack_test"),
    (0x13, "debug"),
];

/// Folder name of a category id, if known.
pub fn category_name(category: u8) -> Option<&'static str> {
    CATEGORIES
        .iter()
        .find(|(id, _)| *id == category)
        .map(|(_, name)| *name)
}

/// Category id of a folder name, if known.
pub fn category_id(name: &str) -> Option<u8> {
    CATEGORIES
        .iter()
        .find(|(_, n)| n.eq_ignore_ascii_case(name))
        .map(|(id, _)| *id)
}

/// Category, expansion and chunk packed into 24 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexId(u32);

impl IndexId {
    /// Pack an index id.
    #[inline]
    pub const fn new(category: u8, expansion: u8, chunk: u8) -> Self {
        Self((category as u32) << 16 | (expansion as u32) << 8 | chunk as u32)
    }

    /// Raw 24-bit value.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Category id.
    #[inline]
    pub const fn category(self) -> u8 {
        (self.0 >> 16) as u8
    }

    /// Expansion number (0 = base game).
    #[inline]
    pub const fn expansion(self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// Chunk number.
    #[inline]
    pub const fn chunk(self) -> u8 {
        self.0 as u8
    }

    /// Parse the `<cc><ee><kk>` stem of an index file name.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let stem = name.get(..6)?;
        let raw = u32::from_str_radix(stem, 16).ok()?;
        Some(Self(raw))
    }
}

impl std::fmt::Display for IndexId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:06x}", self.0)
    }
}

/// One chunk of a bucket: an index file and its dat files.
#[derive(Debug, Clone)]
pub struct ChunkIndex {
    id: IndexId,
    index_path: PathBuf,
}

impl ChunkIndex {
    /// The chunk's index id.
    #[inline]
    pub fn id(&self) -> IndexId {
        self.id
    }

    /// Path of the `.index` file.
    #[inline]
    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Parse the index file.
    pub fn load(&self) -> Result<IndexFile> {
        tracing::debug!(index = %self.id, path = %self.index_path.display(), "loading index");
        IndexFile::open(&self.index_path)
    }

    /// Path of `.dat<dat_id>` next to the index file.
    pub fn dat_path(&self, dat_id: u8) -> PathBuf {
        let mut name = self
            .index_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Some(stem) = name.strip_suffix(".index") {
            name = format!("{stem}.dat{dat_id}");
        }
        self.index_path.with_file_name(name)
    }
}

/// All chunks of one `(category, expansion)` pair.
#[derive(Debug, Clone)]
pub struct Bucket {
    category: u8,
    expansion: u8,
    chunks: Vec<ChunkIndex>,
}

impl Bucket {
    /// Category id.
    #[inline]
    pub fn category(&self) -> u8 {
        self.category
    }

    /// Expansion number.
    #[inline]
    pub fn expansion(&self) -> u8 {
        self.expansion
    }

    /// Chunks ordered by chunk number.
    #[inline]
    pub fn chunks(&self) -> &[ChunkIndex] {
        &self.chunks
    }

    /// Folder name of the category (`chara`, or `0e` for unknown ids).
    pub fn category_name(&self) -> String {
        category_name(self.category)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{:02x}", self.category))
    }

    /// Folder path the bucket is presented at, with trailing slash.
    pub fn folder_path(&self) -> String {
        if self.expansion == 0 {
            format!("{}/", self.category_name())
        } else {
            format!("{}/ex{}/", self.category_name(), self.expansion)
        }
    }
}

/// Catalog configuration.
#[derive(Debug, Clone)]
pub struct CatalogOptions {
    /// Platform suffix of index files.
    pub platform: String,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        Self {
            platform: "win32".to_string(),
        }
    }
}

/// The set of buckets found under a `sqpack` directory.
#[derive(Debug, Clone)]
pub struct ArchiveCatalog {
    root: PathBuf,
    buckets: Vec<Bucket>,
}

impl ArchiveCatalog {
    /// Enumerate `<root>/*/*.<platform>.index`.
    pub fn open<P: AsRef<Path>>(root: P, options: &CatalogOptions) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let pattern = format!(
            "{}/*/*.{}.index",
            glob::Pattern::escape(&root.to_string_lossy()),
            options.platform
        );

        let mut grouped: BTreeMap<(u8, u8), Vec<ChunkIndex>> = BTreeMap::new();
        for path in glob::glob(&pattern)? {
            let path = path.map_err(|e| Error::Io(e.into_error()))?;
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| Error::InvalidIndexName(path.clone()))?;
            let id = IndexId::from_file_name(name)
                .ok_or_else(|| Error::InvalidIndexName(path.clone()))?;
            grouped
                .entry((id.category(), id.expansion()))
                .or_default()
                .push(ChunkIndex {
                    id,
                    index_path: path,
                });
        }

        let buckets: Vec<Bucket> = grouped
            .into_iter()
            .map(|((category, expansion), mut chunks)| {
                chunks.sort_by_key(|c| c.id);
                Bucket {
                    category,
                    expansion,
                    chunks,
                }
            })
            .collect();

        tracing::debug!(root = %root.display(), buckets = buckets.len(), "opened catalog");
        Ok(Self { root, buckets })
    }

    /// The `sqpack` directory.
    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Buckets ordered by `(category, expansion)`.
    #[inline]
    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    /// Find the chunk with the given index id.
    pub fn chunk(&self, id: IndexId) -> Option<&ChunkIndex> {
        self.buckets
            .iter()
            .flat_map(|b| b.chunks.iter())
            .find(|c| c.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FixtureBuilder;

    #[test]
    fn test_index_id_packing() {
        let id = IndexId::new(0x02, 0x01, 0x03);
        assert_eq!(id.raw(), 0x020103);
        assert_eq!(id.category(), 2);
        assert_eq!(id.expansion(), 1);
        assert_eq!(id.chunk(), 3);
        assert_eq!(id.to_string(), "020103");
        assert_eq!(IndexId::from_file_name("020103.win32.index"), Some(id));
        assert_eq!(IndexId::from_file_name("zz"), None);
    }

    #[test]
    fn test_bucket_folders() {
        assert_eq!(category_name(0x04), Some("chara"));
        assert_eq!(category_id("BG"), Some(0x02));

        let fixture = FixtureBuilder::new()
            .standard(0x02, 0, 0, "bg/ffxiv/a.bin", b"a")
            .standard(0x02, 0, 1, "bg/ffxiv/b.bin", b"b")
            .standard(0x02, 1, 0, "bg/ex1/c.bin", b"c")
            .build()
            .unwrap();

        let catalog = ArchiveCatalog::open(fixture.sqpack_dir(), &CatalogOptions::default()).unwrap();
        let folders: Vec<String> = catalog.buckets().iter().map(|b| b.folder_path()).collect();
        assert_eq!(folders, ["bg/", "bg/ex1/"]);
        assert_eq!(catalog.buckets()[0].chunks().len(), 2);

        let chunk = catalog.chunk(IndexId::new(0x02, 1, 0)).unwrap();
        assert!(chunk.dat_path(0).ends_with("ex1/020100.win32.dat0"));
        assert!(chunk.dat_path(0).exists());
    }
}
