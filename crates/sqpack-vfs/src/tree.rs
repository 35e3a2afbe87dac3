//! The virtual folder and file tree.
//!
//! Nodes live in an arena behind one [`RwLock`] and are addressed by
//! [`FolderId`] and [`FileId`]. Nodes are never removed, so ids stay valid for
//! the lifetime of the tree even when an unknown folder is relinked under its
//! real path.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use sqpack_archive::{ArchiveCatalog, CatalogOptions, DatPool, IndexId, KeepOpen, Locator};
use sqpack_common::hash::{folder_hash, full_path_hash, trim_slashes};

use crate::cache::{FileKey, LookupCache};
use crate::lookup::FileLookup;
use crate::names::HashNameService;
use crate::resolve::ResolveCell;
use crate::{Error, Result};

/// Handle to a folder node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FolderId(pub(crate) u32);

/// Handle to a file node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub(crate) u32);

impl FolderId {
    /// The root folder of every tree.
    pub const ROOT: FolderId = FolderId(0);

    /// Arena slot of this folder.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl FileId {
    /// Arena slot of this file.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

/// What a folder represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderKind {
    /// The tree root.
    Root,
    /// Folder of a catalog bucket, populated from its index files.
    Bucket(usize),
    /// A folder whose path is known.
    Known,
    /// The `<unknown>/` folder of a bucket.
    UnknownContainer,
    /// A folder whose path hash has no known name.
    Unknown { chunk: u8 },
}

/// Change notification, sent after the tree lock is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeEvent {
    /// A folder was renamed, relinked or populated.
    FolderChanged(FolderId),
    /// A file received its real name or moved.
    FileChanged(FileId),
}

/// Identity and hashes of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualFile {
    pub id: FileId,
    pub index_id: IndexId,
    pub locator: Locator,
    pub folder_hash: u32,
    pub name_hash: u32,
}

impl VirtualFile {
    /// Cache key of the file.
    #[inline]
    pub fn key(&self) -> FileKey {
        FileKey {
            index_id: self.index_id,
            locator: self.locator,
        }
    }
}

/// Tree configuration.
#[derive(Debug, Clone)]
pub struct TreeOptions {
    /// Index file discovery.
    pub catalog: CatalogOptions,
    /// Dat file mapping policy.
    pub keep_open: KeepOpen,
    /// Capacity of the file lookup cache.
    pub lookup_cache_capacity: usize,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            catalog: CatalogOptions::default(),
            keep_open: KeepOpen::default(),
            lookup_cache_capacity: 256,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum NameState {
    Unresolved,
    Missing,
    Known(Arc<str>),
}

#[derive(Debug)]
pub(crate) struct FolderNode {
    pub(crate) path_hash: u32,
    pub(crate) name: String,
    pub(crate) parent: Option<FolderId>,
    pub(crate) kind: FolderKind,
    pub(crate) folders: BTreeMap<String, FolderId>,
    pub(crate) files: Vec<FileId>,
    pub(crate) folders_cell: Arc<ResolveCell>,
    pub(crate) names_cell: Arc<ResolveCell>,
}

#[derive(Debug)]
pub(crate) struct FileNode {
    pub(crate) index_id: IndexId,
    pub(crate) locator: Locator,
    pub(crate) folder_hash: u32,
    pub(crate) name_hash: u32,
    pub(crate) parent: FolderId,
    pub(crate) name: Mutex<NameState>,
}

impl FileNode {
    pub(crate) fn snapshot(&self, id: FileId) -> VirtualFile {
        VirtualFile {
            id,
            index_id: self.index_id,
            locator: self.locator,
            folder_hash: self.folder_hash,
            name_hash: self.name_hash,
        }
    }
}

/// Node storage plus the hash indexes used by promotion.
#[derive(Debug)]
pub(crate) struct Arena {
    pub(crate) folders: Vec<FolderNode>,
    pub(crate) files: Vec<FileNode>,
    pub(crate) unknown_by_hash: FxHashMap<u32, Vec<FolderId>>,
    pub(crate) files_by_hash: FxHashMap<(u32, u32), Vec<FileId>>,
}

impl Arena {
    pub(crate) fn new() -> Self {
        let root = FolderNode {
            path_hash: folder_hash(""),
            name: String::new(),
            parent: None,
            kind: FolderKind::Root,
            folders: BTreeMap::new(),
            files: Vec::new(),
            folders_cell: Arc::new(ResolveCell::new()),
            names_cell: Arc::new(ResolveCell::new()),
        };
        Self {
            folders: vec![root],
            files: Vec::new(),
            unknown_by_hash: FxHashMap::default(),
            files_by_hash: FxHashMap::default(),
        }
    }

    pub(crate) fn folder(&self, id: FolderId) -> Result<&FolderNode> {
        self.folders.get(id.0 as usize).ok_or(Error::InvalidNode(id.0))
    }

    pub(crate) fn folder_mut(&mut self, id: FolderId) -> Result<&mut FolderNode> {
        self.folders.get_mut(id.0 as usize).ok_or(Error::InvalidNode(id.0))
    }

    pub(crate) fn file(&self, id: FileId) -> Result<&FileNode> {
        self.files.get(id.0 as usize).ok_or(Error::InvalidNode(id.0))
    }

    pub(crate) fn child(&self, parent: FolderId, name: &str) -> Option<FolderId> {
        let key = folder_key(name);
        self.folder(parent).ok()?.folders.get(&key).copied()
    }

    /// Create a folder. Folders created already resolved have no lazy content.
    pub(crate) fn add_folder(
        &mut self,
        parent: FolderId,
        name: &str,
        path_hash: u32,
        kind: FolderKind,
        resolved: bool,
    ) -> Result<FolderId> {
        let id = FolderId(self.folders.len() as u32);
        let name = folder_key(name);
        self.folder_mut(parent)?.folders.insert(name.clone(), id);

        let cell = || {
            Arc::new(if resolved {
                ResolveCell::done()
            } else {
                ResolveCell::new()
            })
        };
        self.folders.push(FolderNode {
            path_hash,
            name,
            parent: Some(parent),
            kind,
            folders: BTreeMap::new(),
            files: Vec::new(),
            folders_cell: cell(),
            names_cell: Arc::new(ResolveCell::new()),
        });
        if let FolderKind::Unknown { .. } = kind {
            self.unknown_by_hash.entry(path_hash).or_default().push(id);
        }
        Ok(id)
    }

    /// The child named `name`, creating it as a known folder if missing.
    pub(crate) fn ensure_known_child(&mut self, parent: FolderId, name: &str) -> Result<FolderId> {
        if let Some(id) = self.child(parent, name) {
            return Ok(id);
        }
        let path = format!("{}{}", self.folder_path(parent)?, folder_key(name));
        self.add_folder(parent, name, folder_hash(&path), FolderKind::Known, true)
    }

    /// Walk `path` from the root, creating missing known folders.
    pub(crate) fn ensure_path(&mut self, path: &str) -> Result<FolderId> {
        let mut current = FolderId::ROOT;
        for segment in trim_slashes(path).split('/').filter(|s| !s.is_empty()) {
            current = self.ensure_known_child(current, segment)?;
        }
        Ok(current)
    }

    pub(crate) fn add_file(
        &mut self,
        parent: FolderId,
        index_id: IndexId,
        locator: Locator,
        folder_hash: u32,
        name_hash: u32,
        name: NameState,
    ) -> Result<FileId> {
        let id = FileId(self.files.len() as u32);
        self.folder_mut(parent)?.files.push(id);
        self.files.push(FileNode {
            index_id,
            locator,
            folder_hash,
            name_hash,
            parent,
            name: Mutex::new(name),
        });
        self.files_by_hash.entry((folder_hash, name_hash)).or_default().push(id);
        Ok(id)
    }

    /// Full path with trailing slash; the root is `""`.
    pub(crate) fn folder_path(&self, id: FolderId) -> Result<String> {
        let mut parts = Vec::new();
        let mut current = Some(id);
        while let Some(folder) = current {
            let node = self.folder(folder)?;
            parts.push(node.name.as_str());
            current = node.parent;
        }
        parts.reverse();
        Ok(parts.concat())
    }

    /// Whether a folder's path is real, so its path hash can be re-derived.
    pub(crate) fn is_known_path(&self, id: FolderId) -> Result<bool> {
        let mut current = Some(id);
        while let Some(folder) = current {
            let node = self.folder(folder)?;
            if matches!(node.kind, FolderKind::Unknown { .. } | FolderKind::UnknownContainer) {
                return Ok(false);
            }
            current = node.parent;
        }
        Ok(true)
    }
}

/// Lowercased folder name with a single trailing slash.
pub(crate) fn folder_key(name: &str) -> String {
    let mut key = trim_slashes(name).to_ascii_lowercase();
    key.push('/');
    key
}

/// Placeholder name of a file whose hash has no known name.
pub(crate) fn file_placeholder(name_hash: u32) -> String {
    format!("~{name_hash:08x}")
}

/// Placeholder name of a folder whose hash has no known name.
pub(crate) fn folder_placeholder(chunk: u8, path_hash: u32) -> String {
    format!("~{chunk:02x}~{path_hash:08x}/")
}

/// Name of the per-bucket container of unknown folders.
pub(crate) const UNKNOWN_CONTAINER: &str = "<unknown>/";

/// A lazily resolved folder and file tree over an installation.
pub struct VirtualTree {
    pub(crate) catalog: ArchiveCatalog,
    pub(crate) names: Arc<dyn HashNameService>,
    pub(crate) arena: RwLock<Arena>,
    pub(crate) pool: DatPool,
    pub(crate) cache: LookupCache,
    subscribers: Mutex<Vec<Sender<TreeEvent>>>,
}

impl fmt::Debug for VirtualTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualTree")
            .field("root", &self.catalog.root())
            .field("buckets", &self.catalog.buckets().len())
            .field("folders", &self.arena.read().folders.len())
            .finish_non_exhaustive()
    }
}

impl VirtualTree {
    /// Open the installation under `sqpack_dir`.
    pub fn open<P: AsRef<Path>>(
        sqpack_dir: P,
        names: Arc<dyn HashNameService>,
        options: &TreeOptions,
    ) -> Result<Self> {
        let catalog = ArchiveCatalog::open(sqpack_dir, &options.catalog)?;
        Ok(Self::new(catalog, names, options))
    }

    /// Build a tree over an existing catalog. Nothing is read until the
    /// root is resolved.
    pub fn new(catalog: ArchiveCatalog, names: Arc<dyn HashNameService>, options: &TreeOptions) -> Self {
        Self {
            catalog,
            names,
            arena: RwLock::new(Arena::new()),
            pool: DatPool::new(options.keep_open),
            cache: LookupCache::new(options.lookup_cache_capacity),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// The root folder.
    #[inline]
    pub fn root(&self) -> FolderId {
        FolderId::ROOT
    }

    /// The catalog the tree is built over.
    #[inline]
    pub fn catalog(&self) -> &ArchiveCatalog {
        &self.catalog
    }

    /// The name service.
    #[inline]
    pub fn names(&self) -> &Arc<dyn HashNameService> {
        &self.names
    }

    /// The dat file pool shared by every lookup.
    #[inline]
    pub fn pool(&self) -> &DatPool {
        &self.pool
    }

    /// The file lookup cache.
    #[inline]
    pub fn cache(&self) -> &LookupCache {
        &self.cache
    }

    /// Receive change events from now on.
    pub fn subscribe(&self) -> Receiver<TreeEvent> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        self.subscribers.lock().push(sender);
        receiver
    }

    /// Deliver events. Must not be called with the arena lock held.
    pub(crate) fn emit(&self, events: &[TreeEvent]) {
        if events.is_empty() {
            return;
        }
        self.subscribers
            .lock()
            .retain(|sender| events.iter().all(|event| sender.send(*event).is_ok()));
    }

    /// Child folders in name order. The folder must be resolved.
    pub fn get_folders(&self, id: FolderId) -> Result<Vec<FolderId>> {
        let arena = self.arena.read();
        let node = arena.folder(id)?;
        if !node.folders_cell.is_done() {
            return Err(Error::NotResolved {
                path: arena.folder_path(id)?,
            });
        }
        Ok(node.folders.values().copied().collect())
    }

    /// Files of the folder. The folder must be resolved.
    pub fn get_files(&self, id: FolderId) -> Result<Vec<FileId>> {
        let arena = self.arena.read();
        let node = arena.folder(id)?;
        if !node.folders_cell.is_done() {
            return Err(Error::NotResolved {
                path: arena.folder_path(id)?,
            });
        }
        Ok(node.files.clone())
    }

    /// Folder name with trailing slash.
    pub fn folder_name(&self, id: FolderId) -> Result<String> {
        Ok(self.arena.read().folder(id)?.name.clone())
    }

    /// Parent folder; `None` for the root.
    pub fn folder_parent(&self, id: FolderId) -> Result<Option<FolderId>> {
        Ok(self.arena.read().folder(id)?.parent)
    }

    /// Full path with trailing slash.
    pub fn folder_path(&self, id: FolderId) -> Result<String> {
        self.arena.read().folder_path(id)
    }

    /// Stored path hash of the folder.
    pub fn folder_hash(&self, id: FolderId) -> Result<u32> {
        Ok(self.arena.read().folder(id)?.path_hash)
    }

    /// What the folder represents.
    pub fn folder_kind(&self, id: FolderId) -> Result<FolderKind> {
        Ok(self.arena.read().folder(id)?.kind)
    }

    /// Identity and hashes of a file.
    pub fn file(&self, id: FileId) -> Result<VirtualFile> {
        Ok(self.arena.read().file(id)?.snapshot(id))
    }

    /// Folder holding the file.
    pub fn file_parent(&self, id: FileId) -> Result<FolderId> {
        Ok(self.arena.read().file(id)?.parent)
    }

    /// Whether the file's name lookup already ran.
    pub fn is_file_name_resolved(&self, id: FileId) -> Result<bool> {
        let arena = self.arena.read();
        let resolved = !matches!(*arena.file(id)?.name.lock(), NameState::Unresolved);
        Ok(resolved)
    }

    /// Full path of the file, resolving its name if needed.
    pub fn file_path(&self, id: FileId) -> Result<String> {
        let name = self.file_name(id)?;
        let parent = self.file_parent(id)?;
        Ok(format!("{}{}", self.folder_path(parent)?, name))
    }

    /// Hash of the file's full path, once both its name and folder are known.
    pub fn file_full_path_hash(&self, id: FileId) -> Result<Option<u32>> {
        let arena = self.arena.read();
        let node = arena.file(id)?;
        let name = match &*node.name.lock() {
            NameState::Known(name) => name.clone(),
            _ => return Ok(None),
        };
        if !arena.is_known_path(node.parent)? {
            return Ok(None);
        }
        let path = format!("{}{}", arena.folder_path(node.parent)?, name);
        Ok(Some(full_path_hash(&path)))
    }

    /// Open the file, reusing a cached lookup when possible.
    pub fn lookup(&self, id: FileId) -> Result<FileLookup> {
        let file = self.file(id)?;
        self.cache.get_or_try_insert(file.key(), || FileLookup::open(self, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_paths() {
        let mut arena = Arena::new();
        let leaf = arena.ensure_path("chara/equipment/e0001").unwrap();
        assert_eq!(arena.folder_path(leaf).unwrap(), "chara/equipment/e0001/");
        assert_eq!(arena.folder(leaf).unwrap().path_hash, folder_hash("chara/equipment/e0001"));
        assert_eq!(arena.ensure_path("/Chara/Equipment/E0001/").unwrap(), leaf);
        assert_eq!(arena.folders.len(), 4);
        assert_eq!(arena.folder(FolderId::ROOT).unwrap().path_hash, 0xFFFF_FFFF);
    }

    #[test]
    fn test_unknown_paths_are_not_rederivable() {
        let mut arena = Arena::new();
        let bucket = arena.ensure_path("chara").unwrap();
        let container = arena
            .add_folder(bucket, UNKNOWN_CONTAINER, 0, FolderKind::UnknownContainer, true)
            .unwrap();
        let unknown = arena
            .add_folder(
                container,
                &folder_placeholder(1, 0xDEAD_BEEF),
                0xDEAD_BEEF,
                FolderKind::Unknown { chunk: 1 },
                true,
            )
            .unwrap();

        assert_eq!(arena.folder_path(unknown).unwrap(), "chara/<unknown>/~01~deadbeef/");
        assert!(!arena.is_known_path(unknown).unwrap());
        assert!(arena.is_known_path(bucket).unwrap());
        assert_eq!(arena.unknown_by_hash[&0xDEAD_BEEF], vec![unknown]);
    }
}
