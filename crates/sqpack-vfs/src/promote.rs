//! Promotion of placeholder nodes to their real paths.
//!
//! A path learned from elsewhere (a reference inside another file, a user
//! guess) names a folder hash and a file name hash. Files with that pair get
//! their name, and unknown folders with a matching hash at any level of the
//! path are moved out of their `<unknown>/` container under the real parent.
//! Folder ids are kept, so handles taken before the promotion stay valid.

use parking_lot::RwLockUpgradableReadGuard;
use sqpack_common::hash::{file_name_hash, folder_hash, normalize_path, split_path};

use crate::tree::{Arena, FileId, FolderId, FolderKind, NameState, TreeEvent, VirtualTree};
use crate::Result;

impl VirtualTree {
    /// Apply a candidate full path to any matching placeholder.
    ///
    /// Returns whether anything changed. Suggesting a path twice is a no-op
    /// the second time.
    pub fn suggest_full_path(&self, path: &str) -> Result<bool> {
        let path = normalize_path(path);
        let (folder, name) = split_path(&path);
        if name.is_empty() {
            return Ok(false);
        }
        let key = (folder_hash(folder), file_name_hash(name));

        let mut events = Vec::new();
        let mut renamed = Vec::new();
        {
            let arena = self.arena.upgradable_read();

            let files: Vec<FileId> = arena.files_by_hash.get(&key).cloned().unwrap_or_default();
            for &file in &files {
                let node = arena.file(file)?;
                let mut slot = node.name.lock();
                if !matches!(*slot, NameState::Known(_)) {
                    *slot = NameState::Known(name.into());
                    renamed.push(node.snapshot(file).key());
                    events.push(TreeEvent::FileChanged(file));
                }
            }

            if has_unknown_prefix(&arena, folder) {
                let mut arena = RwLockUpgradableReadGuard::upgrade(arena);
                arena.place_folder(folder, &mut events)?;
            }
        }

        // Cached lookups carry the old placeholder name.
        for key in &renamed {
            self.cache().remove(key);
        }

        if !events.is_empty() {
            tracing::debug!(path = %path, changes = events.len(), "promoted placeholder nodes");
        }
        self.emit(&events);
        Ok(!events.is_empty())
    }
}

/// Whether an unknown folder exists for `path` or one of its ancestors.
fn has_unknown_prefix(arena: &Arena, path: &str) -> bool {
    let mut current = path;
    while !current.is_empty() {
        if arena.unknown_by_hash.contains_key(&folder_hash(current)) {
            return true;
        }
        current = split_path(current).0;
    }
    false
}

impl Arena {
    /// Locate the folder at `path`, promoting unknown folders along the way.
    ///
    /// Missing ancestors are created as known folders. When a known folder
    /// already exists at the target, the unknown folder's files move into it
    /// and the emptied unknown folder is detached.
    pub(crate) fn place_folder(&mut self, path: &str, events: &mut Vec<TreeEvent>) -> Result<FolderId> {
        if path.is_empty() {
            return Ok(FolderId::ROOT);
        }
        let (parent_path, leaf) = split_path(path);
        let parent = self.place_folder(parent_path, events)?;

        let hash = folder_hash(path);
        let mut target = self.child(parent, leaf);
        for unknown in self.unknown_by_hash.remove(&hash).unwrap_or_default() {
            if !matches!(self.folder(unknown)?.kind, FolderKind::Unknown { .. }) {
                continue;
            }
            match target {
                None => {
                    self.relink(unknown, parent, leaf)?;
                    events.push(TreeEvent::FolderChanged(unknown));
                    target = Some(unknown);
                }
                Some(existing) => {
                    let moved = self.merge_into(unknown, existing)?;
                    events.extend(moved.into_iter().map(TreeEvent::FileChanged));
                    events.push(TreeEvent::FolderChanged(existing));
                }
            }
        }

        match target {
            Some(folder) => Ok(folder),
            None => self.ensure_known_child(parent, leaf),
        }
    }

    fn detach(&mut self, id: FolderId) -> Result<()> {
        let node = self.folder(id)?;
        let (name, old_parent) = (node.name.clone(), node.parent);
        if let Some(old_parent) = old_parent {
            self.folder_mut(old_parent)?.folders.remove(&name);
        }
        self.folder_mut(id)?.parent = None;
        Ok(())
    }

    fn relink(&mut self, id: FolderId, parent: FolderId, leaf: &str) -> Result<()> {
        self.detach(id)?;
        let name = crate::tree::folder_key(leaf);
        self.folder_mut(parent)?.folders.insert(name.clone(), id);

        let node = self.folder_mut(id)?;
        node.name = name;
        node.parent = Some(parent);
        node.kind = FolderKind::Known;
        Ok(())
    }

    fn merge_into(&mut self, from: FolderId, into: FolderId) -> Result<Vec<FileId>> {
        self.detach(from)?;
        let node = self.folder_mut(from)?;
        node.kind = FolderKind::Known;
        let files = std::mem::take(&mut node.files);

        for &file in &files {
            if let Some(node) = self.files.get_mut(file.0 as usize) {
                node.parent = into;
            }
        }
        self.folder_mut(into)?.files.extend_from_slice(&files);
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sqpack_archive::testing::FixtureBuilder;
    use sqpack_common::CancellationToken;

    use super::*;
    use crate::names::PathListNameService;
    use crate::tree::TreeOptions;

    fn unknown_tree() -> (sqpack_archive::testing::Fixture, VirtualTree) {
        let fixture = FixtureBuilder::new()
            .standard(0x04, 0, 0, "chara/monster/m0001/skeleton.sklb", b"sklb")
            .standard(0x04, 0, 0, "chara/monster/m0001/obj/body.mdl", b"mdl")
            .standard(0x04, 0, 0, "chara/known/readme.txt", b"hi")
            .build()
            .unwrap();
        let names = PathListNameService::from_paths(["chara/known/readme.txt"]);
        let tree = VirtualTree::open(fixture.sqpack_dir(), Arc::new(names), &TreeOptions::default()).unwrap();
        let cancel = CancellationToken::new();
        let chara = tree.resolve_path(tree.root(), "chara", &cancel).unwrap().unwrap();
        tree.resolve_folders(chara, &cancel).unwrap();
        (fixture, tree)
    }

    fn unknown_folder(tree: &VirtualTree, path: &str) -> FolderId {
        let arena = tree.arena.read();
        arena.unknown_by_hash[&folder_hash(path)][0]
    }

    #[test]
    fn test_promotion_preserves_identity() {
        let (_fixture, tree) = unknown_tree();
        let events = tree.subscribe();
        let folder = unknown_folder(&tree, "chara/monster/m0001");
        let file = tree.get_files(folder).unwrap()[0];

        assert!(tree.suggest_full_path("chara/monster/m0001/skeleton.sklb").unwrap());

        assert_eq!(tree.folder_path(folder).unwrap(), "chara/monster/m0001/");
        assert_eq!(tree.folder_kind(folder).unwrap(), FolderKind::Known);
        assert_eq!(tree.folder_hash(folder).unwrap(), folder_hash("chara/monster/m0001"));
        assert_eq!(tree.file_path(file).unwrap(), "chara/monster/m0001/skeleton.sklb");

        let cancel = CancellationToken::new();
        let found = tree.resolve_path(tree.root(), "chara/monster/m0001", &cancel).unwrap();
        assert_eq!(found, Some(folder));

        let received: Vec<TreeEvent> = events.try_iter().collect();
        assert!(received.contains(&TreeEvent::FolderChanged(folder)));
        assert!(received.contains(&TreeEvent::FileChanged(file)));

        // Nothing left to promote.
        assert!(!tree.suggest_full_path("chara/monster/m0001/skeleton.sklb").unwrap());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_multi_level_promotion() {
        let (_fixture, tree) = unknown_tree();
        let parent = unknown_folder(&tree, "chara/monster/m0001");
        let child = unknown_folder(&tree, "chara/monster/m0001/obj");

        assert!(tree.suggest_full_path("chara/monster/m0001/obj/body.mdl").unwrap());

        assert_eq!(tree.folder_parent(child).unwrap(), Some(parent));
        assert_eq!(tree.folder_path(child).unwrap(), "chara/monster/m0001/obj/");
        assert_eq!(tree.folder_path(parent).unwrap(), "chara/monster/m0001/");

        let container = tree
            .resolve_path(tree.root(), "chara/<unknown>", &CancellationToken::new())
            .unwrap()
            .unwrap();
        assert!(tree.get_folders(container).unwrap().is_empty());

        // The parent's own file keeps its placeholder until named.
        let files = tree.get_files(parent).unwrap();
        assert!(tree.file_name(files[0]).unwrap().starts_with('~'));
        assert!(tree.suggest_full_path("chara/monster/m0001/skeleton.sklb").unwrap());
        assert_eq!(tree.file_name(files[0]).unwrap().as_ref(), "skeleton.sklb");
    }

    #[test]
    fn test_promotion_refreshes_cached_lookup() {
        let (_fixture, tree) = unknown_tree();
        let folder = unknown_folder(&tree, "chara/monster/m0001");
        let file = tree.get_files(folder).unwrap()[0];

        let before = tree.lookup(file).unwrap();
        assert!(before.name().starts_with('~'));
        drop(before);
        assert_eq!(tree.cache().len(), 1);

        assert!(tree.suggest_full_path("chara/monster/m0001/skeleton.sklb").unwrap());
        assert!(tree.cache().is_empty());

        let after = tree.lookup(file).unwrap();
        assert_eq!(after.name(), "skeleton.sklb");
        assert_eq!(after.name(), tree.file_name(file).unwrap().as_ref());
    }

    #[test]
    fn test_unknown_hash_is_ignored() {
        let (_fixture, tree) = unknown_tree();
        assert!(!tree.suggest_full_path("chara/elsewhere/file.bin").unwrap());
        assert!(!tree.suggest_full_path("chara/").unwrap());
    }

    #[test]
    fn test_merge_into_existing_folder() {
        let mut arena = Arena::new();
        let known = arena.ensure_path("chara/a").unwrap();
        let bucket = arena.child(FolderId::ROOT, "chara").unwrap();
        let container = arena
            .add_folder(bucket, crate::tree::UNKNOWN_CONTAINER, 0, FolderKind::UnknownContainer, true)
            .unwrap();
        let hash = folder_hash("chara/a");
        let unknown = arena
            .add_folder(container, "~01~x", hash, FolderKind::Unknown { chunk: 1 }, true)
            .unwrap();
        let file = arena
            .add_file(
                unknown,
                sqpack_archive::IndexId::new(4, 0, 1),
                sqpack_archive::Locator(0x100),
                hash,
                1,
                NameState::Unresolved,
            )
            .unwrap();

        let mut events = Vec::new();
        assert_eq!(arena.place_folder("chara/a", &mut events).unwrap(), known);
        assert_eq!(arena.file(file).unwrap().parent, known);
        assert_eq!(arena.folder(known).unwrap().files, vec![file]);
        assert_eq!(arena.folder(unknown).unwrap().parent, None);
        assert!(arena.folder(container).unwrap().folders.is_empty());
        assert!(events.contains(&TreeEvent::FileChanged(file)));
    }
}
