//! Reference-counted access to one file's contents.

use std::fmt;
use std::io::BufReader;
use std::sync::Arc;

use sqpack_archive::{BlockStream, DatLease, FileType, OffsetTable};
use sqpack_common::CancellationToken;

use crate::resource::{Resource, ResourceSource, TypedResource};
use crate::tree::{FileId, VirtualFile, VirtualTree};
use crate::{Error, Result};

/// Sizes and type of a file, read from its entry header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    /// Structural kind
    pub file_type: FileType,
    /// Declared logical size
    pub size: u64,
    /// Space reserved in the dat file
    pub reserved: u64,
    /// Space occupied in the dat file
    pub occupied: u64,
    /// Number of blocks
    pub block_count: usize,
}

struct LookupInner {
    file: VirtualFile,
    name: Arc<str>,
    dat: DatLease,
    table: Arc<OffsetTable>,
}

/// A handle binding a tree file to its dat file and parsed block table.
///
/// Clones share the table and the dat lease; the dat file may be unmapped
/// once the last clone is dropped.
#[derive(Clone)]
pub struct FileLookup {
    inner: Arc<LookupInner>,
}

impl fmt::Debug for FileLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileLookup")
            .field("file", &self.inner.file)
            .field("name", &self.inner.name)
            .field("dat", &self.inner.dat.path())
            .finish()
    }
}

impl FileLookup {
    /// Parse the entry of `id`. Prefer [`VirtualTree::lookup`], which caches.
    pub fn open(tree: &VirtualTree, id: FileId) -> Result<Self> {
        let file = tree.file(id)?;
        let chunk = tree
            .catalog()
            .chunk(file.index_id)
            .ok_or(Error::InvalidNode(id.index()))?;

        let dat = tree.pool().lease(chunk.dat_path(file.locator.dat_id()));
        let table = {
            let map = dat.mapping()?;
            OffsetTable::load(&map, file.locator.offset())?
        };
        let name = tree.file_name(id)?;
        tracing::trace!(file = %name, file_type = %table.file_type(), "opened file lookup");

        Ok(Self {
            inner: Arc::new(LookupInner {
                file,
                name,
                dat,
                table: Arc::new(table),
            }),
        })
    }

    /// The file this lookup reads.
    #[inline]
    pub fn file(&self) -> &VirtualFile {
        &self.inner.file
    }

    /// The file name at the time the lookup was opened.
    #[inline]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of live handles sharing this lookup.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Type and sizes, without decoding any block.
    pub fn info(&self) -> FileInfo {
        let table = &self.inner.table;
        let header = table.header();
        FileInfo {
            file_type: table.file_type(),
            size: table.length(),
            reserved: header.reserved_bytes(),
            occupied: header.occupied_bytes(),
            block_count: table.block_count(),
        }
    }

    /// A fresh buffered stream positioned at the start of the file.
    pub fn create_stream(&self) -> BufReader<BlockStream> {
        BufReader::new(self.stream())
    }

    /// Read the whole logical file.
    pub fn read_all(&self, cancel: &CancellationToken) -> Result<Vec<u8>> {
        Ok(self.stream().read_all(cancel)?)
    }

    /// Read the file and build the most specific resource it parses as.
    pub fn as_resource(&self, cancel: &CancellationToken) -> Result<Resource> {
        let data = self.read_all(cancel)?;
        Ok(Resource::from_source(&self.source(&data)))
    }

    /// Read the file as a specific resource type.
    pub fn as_typed<T: TypedResource>(&self, cancel: &CancellationToken) -> Result<T> {
        let data = self.read_all(cancel)?;
        T::parse(&self.source(&data))
    }

    fn stream(&self) -> BlockStream {
        BlockStream::with_table(self.inner.dat.clone(), self.inner.table.clone())
    }

    fn source<'a>(&'a self, data: &'a [u8]) -> ResourceSource<'a> {
        ResourceSource {
            data,
            name: &self.inner.name,
            file_type: self.inner.table.file_type(),
            declared_length: self.inner.table.length(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Seek, SeekFrom};

    use sqpack_archive::testing::{Fixture, FixtureBuilder};

    use super::*;
    use crate::names::PathListNameService;
    use crate::resource::TextResource;
    use crate::tree::TreeOptions;

    fn tree(capacity: usize) -> (Fixture, VirtualTree) {
        let fixture = FixtureBuilder::new()
            .standard(0x0A, 0, 0, "exd/root.exl", b"EXLT,2\nItem,10\n")
            .standard(0x0A, 0, 0, "exd/notes.txt", b"plain text")
            .build()
            .unwrap();
        let names = PathListNameService::from_paths(["exd/root.exl", "exd/notes.txt"]);
        let options = TreeOptions {
            lookup_cache_capacity: capacity,
            ..TreeOptions::default()
        };
        let tree = VirtualTree::open(fixture.sqpack_dir(), Arc::new(names), &options).unwrap();
        (fixture, tree)
    }

    fn file(tree: &VirtualTree, path: &str) -> FileId {
        tree.resolve_file(path, &CancellationToken::new()).unwrap().unwrap()
    }

    #[test]
    fn test_lookup_reads_contents() {
        let (_fixture, tree) = tree(4);
        let lookup = tree.lookup(file(&tree, "exd/root.exl")).unwrap();
        let cancel = CancellationToken::new();

        assert_eq!(lookup.name(), "root.exl");
        assert_eq!(lookup.read_all(&cancel).unwrap(), b"EXLT,2\nItem,10\n");

        let info = lookup.info();
        assert_eq!(info.file_type, FileType::Standard);
        assert_eq!(info.size, 15);
        assert_eq!(info.block_count, 1);

        let mut stream = lookup.create_stream();
        stream.seek(SeekFrom::Start(7)).unwrap();
        let mut rest = String::new();
        stream.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "Item,10\n");
    }

    #[test]
    fn test_lookups_are_shared_through_cache() {
        let (_fixture, tree) = tree(4);
        let id = file(&tree, "exd/root.exl");

        let first = tree.lookup(id).unwrap();
        let second = tree.lookup(id).unwrap();
        // Two handles plus the cached entry.
        assert_eq!(first.ref_count(), 3);
        assert_eq!(tree.cache().len(), 1);

        drop(second);
        assert_eq!(first.ref_count(), 2);
        tree.cache().clear();
        assert_eq!(first.ref_count(), 1);
    }

    #[test]
    fn test_dat_unmapped_after_last_reference() {
        let (_fixture, tree) = tree(1);
        let lookup = tree.lookup(file(&tree, "exd/root.exl")).unwrap();
        lookup.read_all(&CancellationToken::new()).unwrap();
        assert_eq!(tree.pool().mapped_count(), 1);

        drop(lookup);
        tree.cache().clear();
        assert_eq!(tree.pool().mapped_count(), 0);
    }

    #[test]
    fn test_resources() {
        let (_fixture, tree) = tree(4);
        let cancel = CancellationToken::new();

        let notes = tree.lookup(file(&tree, "exd/notes.txt")).unwrap();
        assert_eq!(notes.as_resource(&cancel).unwrap().kind(), "text");
        let text: TextResource = notes.as_typed(&cancel).unwrap();
        assert_eq!(text.text, "plain text");

        let list = tree.lookup(file(&tree, "exd/root.exl")).unwrap();
        assert_eq!(list.as_resource(&cancel).unwrap().kind(), "generic");
        let err = list.as_typed::<TextResource>(&cancel).unwrap_err();
        assert!(matches!(err, Error::Resource { kind: "text", .. }));
    }

    #[test]
    fn test_cancelled_read() {
        let (_fixture, tree) = tree(4);
        let lookup = tree.lookup(file(&tree, "exd/notes.txt")).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(lookup.read_all(&cancel).unwrap_err().is_cancelled());
    }
}
