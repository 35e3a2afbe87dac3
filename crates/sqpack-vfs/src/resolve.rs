//! Lazy population of the tree.
//!
//! Each folder carries two [`ResolveCell`]s, one for its children and one for
//! its file names. A cell runs its computation at most once to completion;
//! callers arriving while it runs wait for the result instead of starting a
//! second computation. A failed or cancelled run leaves the cell pending so a
//! later call can try again.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use rayon::prelude::*;
use sqpack_archive::{IndexEntry, IndexFile, IndexId, SynonymRecord};
use sqpack_common::hash::{file_name_hash, normalize_path, split_path};
use sqpack_common::CancellationToken;

use crate::tree::{
    file_placeholder, folder_placeholder, Arena, FileId, FolderId, FolderKind, NameState, TreeEvent,
    VirtualFile, VirtualTree, UNKNOWN_CONTAINER,
};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellState {
    Pending,
    Running,
    Done,
}

/// Single-flight latch for a lazy computation.
#[derive(Debug)]
pub struct ResolveCell {
    state: Mutex<CellState>,
    finished: Condvar,
}

impl Default for ResolveCell {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolveCell {
    /// A cell whose computation has not run.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CellState::Pending),
            finished: Condvar::new(),
        }
    }

    /// A cell with nothing left to compute.
    pub fn done() -> Self {
        Self {
            state: Mutex::new(CellState::Done),
            finished: Condvar::new(),
        }
    }

    /// Whether the computation completed.
    pub fn is_done(&self) -> bool {
        *self.state.lock() == CellState::Done
    }

    /// Run `compute` unless it already completed, waiting out a concurrent run.
    pub fn run<F>(&self, compute: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        {
            let mut state = self.state.lock();
            loop {
                match *state {
                    CellState::Done => return Ok(()),
                    CellState::Running => self.finished.wait(&mut state),
                    CellState::Pending => break,
                }
            }
            *state = CellState::Running;
        }

        let mut guard = RunGuard {
            cell: self,
            completed: false,
        };
        compute()?;
        guard.completed = true;
        Ok(())
    }
}

/// Publishes the outcome of a run, including when `compute` panics.
struct RunGuard<'a> {
    cell: &'a ResolveCell,
    completed: bool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *self.cell.state.lock() = if self.completed {
            CellState::Done
        } else {
            CellState::Pending
        };
        self.cell.finished.notify_all();
    }
}

/// What one chunk contributes to its bucket, computed without the tree lock.
struct ChunkPlan {
    id: IndexId,
    known: Vec<(String, Vec<IndexEntry>)>,
    unknown: Vec<(u32, Vec<IndexEntry>)>,
    synonyms: Vec<SynonymRecord>,
}

impl VirtualTree {
    /// Whether the folder's children are available.
    pub fn is_folders_resolved(&self, id: FolderId) -> Result<bool> {
        Ok(self.arena.read().folder(id)?.folders_cell.is_done())
    }

    /// Whether the folder's file names were resolved in bulk.
    pub fn is_file_names_resolved(&self, id: FolderId) -> Result<bool> {
        Ok(self.arena.read().folder(id)?.names_cell.is_done())
    }

    /// Populate the folder's children, once.
    pub fn resolve_folders(&self, id: FolderId, cancel: &CancellationToken) -> Result<FolderId> {
        let (cell, kind) = {
            let arena = self.arena.read();
            let node = arena.folder(id)?;
            (node.folders_cell.clone(), node.kind)
        };
        if cell.is_done() {
            return Ok(id);
        }

        cell.run(|| {
            cancel.check()?;
            match kind {
                FolderKind::Root => self.populate_root(),
                FolderKind::Bucket(bucket) => self.populate_bucket(id, bucket, cancel),
                _ => Ok(()),
            }
        })?;
        self.emit(&[TreeEvent::FolderChanged(id)]);
        Ok(id)
    }

    /// Resolve every file name of the folder in parallel, once.
    pub fn resolve_file_names(&self, id: FolderId, cancel: &CancellationToken) -> Result<FolderId> {
        self.resolve_folders(id, cancel)?;
        let cell = self.arena.read().folder(id)?.names_cell.clone();
        cell.run(|| {
            let files = self.arena.read().folder(id)?.files.clone();
            files.par_iter().try_for_each(|&file| {
                cancel.check()?;
                self.file_name(file).map(drop)
            })
        })?;
        Ok(id)
    }

    /// Walk `path` from `from`, resolving one level at a time.
    ///
    /// Returns `None` when a segment does not exist.
    pub fn resolve_path(&self, from: FolderId, path: &str, cancel: &CancellationToken) -> Result<Option<FolderId>> {
        let mut current = from;
        for segment in path.split(['/', '\\']) {
            cancel.check()?;
            match segment {
                "" | "." => continue,
                ".." => {
                    current = self.folder_parent(current)?.unwrap_or(current);
                    continue;
                }
                _ => {}
            }
            self.resolve_folders(current, cancel)?;
            match self.arena.read().child(current, segment) {
                Some(child) => current = child,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Find a file by full path.
    pub fn resolve_file(&self, path: &str, cancel: &CancellationToken) -> Result<Option<FileId>> {
        let path = normalize_path(path);
        let (folder, name) = split_path(&path);
        let Some(folder) = self.resolve_path(FolderId::ROOT, folder, cancel)? else {
            return Ok(None);
        };
        self.resolve_folders(folder, cancel)?;

        let hash = file_name_hash(name);
        let candidates: Vec<FileId> = {
            let arena = self.arena.read();
            let node = arena.folder(folder)?;
            node.files
                .iter()
                .copied()
                .filter(|&f| arena.file(f).is_ok_and(|file| file.name_hash == hash))
                .collect()
        };
        for file in candidates {
            if self.file_name(file)?.eq_ignore_ascii_case(name) {
                return Ok(Some(file));
            }
        }
        Ok(None)
    }

    /// The file's name, looked up once and memoized.
    ///
    /// Files without a known name are shown as `~<hash>`.
    pub fn file_name(&self, id: FileId) -> Result<Arc<str>> {
        let (file, state) = {
            let arena = self.arena.read();
            let node = arena.file(id)?;
            let state = node.name.lock().clone();
            (node.snapshot(id), state)
        };

        let state = match state {
            NameState::Unresolved => {
                let found = self.lookup_name(&file);
                let arena = self.arena.read();
                let mut slot = arena.file(id)?.name.lock();
                if let NameState::Unresolved = *slot {
                    *slot = match found {
                        Some(name) => NameState::Known(name.into()),
                        None => NameState::Missing,
                    };
                }
                slot.clone()
            }
            resolved => resolved,
        };

        Ok(match state {
            NameState::Known(name) => name,
            _ => file_placeholder(file.name_hash).into(),
        })
    }

    fn lookup_name(&self, file: &VirtualFile) -> Option<String> {
        match self.names.folder_entry(file.index_id, file.folder_hash) {
            Some(entry) => self.names.file_name(&entry, file.name_hash),
            None => self.names.find_file_name(file.index_id, file.name_hash),
        }
    }

    fn populate_root(&self) -> Result<()> {
        let mut arena = self.arena.write();
        for (index, bucket) in self.catalog.buckets().iter().enumerate() {
            let category = bucket.category_name();
            let path_hash = sqpack_common::hash::folder_hash(&category);
            if bucket.expansion() == 0 {
                arena.add_folder(FolderId::ROOT, &category, path_hash, FolderKind::Bucket(index), false)?;
            } else {
                let parent = arena.ensure_known_child(FolderId::ROOT, &category)?;
                let name = format!("ex{}", bucket.expansion());
                let path_hash = sqpack_common::hash::folder_hash(&format!("{category}/{name}"));
                arena.add_folder(parent, &name, path_hash, FolderKind::Bucket(index), false)?;
            }
        }
        tracing::debug!(buckets = self.catalog.buckets().len(), "populated root");
        Ok(())
    }

    fn populate_bucket(&self, folder: FolderId, bucket: usize, cancel: &CancellationToken) -> Result<()> {
        let Some(bucket) = self.catalog.buckets().get(bucket) else {
            return Ok(());
        };

        let mut plans = Vec::with_capacity(bucket.chunks().len());
        for chunk in bucket.chunks() {
            cancel.check()?;
            let index = chunk.load()?;
            plans.push(self.plan_chunk(chunk.id(), &index));
        }

        let mut arena = self.arena.write();
        let mut files = 0usize;
        for plan in plans {
            files += apply_plan(&mut arena, folder, plan)?;
        }
        tracing::debug!(bucket = %bucket.folder_path(), files, "populated bucket");
        Ok(())
    }

    fn plan_chunk(&self, id: IndexId, index: &IndexFile) -> ChunkPlan {
        let mut grouped: BTreeMap<u32, Vec<IndexEntry>> = BTreeMap::new();
        for entry in index.entries().iter().filter(|e| !e.locator.is_synonym()) {
            grouped.entry(entry.folder_hash).or_default().push(*entry);
        }

        let mut known = Vec::new();
        let mut unknown = Vec::new();
        for (hash, entries) in grouped {
            let path = self
                .names
                .folder_entry(id, hash)
                .and_then(|entry| self.names.string(entry.path_offset));
            match path {
                Some(path) => known.push((path, entries)),
                None => unknown.push((hash, entries)),
            }
        }

        ChunkPlan {
            id,
            known,
            unknown,
            synonyms: index.synonyms().to_vec(),
        }
    }
}

fn apply_plan(arena: &mut Arena, bucket: FolderId, plan: ChunkPlan) -> Result<usize> {
    let mut count = 0;

    for (path, entries) in plan.known {
        let folder = arena.ensure_path(&path)?;
        for entry in entries {
            arena.add_file(folder, plan.id, entry.locator, entry.folder_hash, entry.file_hash, NameState::Unresolved)?;
            count += 1;
        }
    }

    if !plan.unknown.is_empty() {
        let container = match arena.child(bucket, UNKNOWN_CONTAINER) {
            Some(container) => container,
            None => {
                let path = format!("{}{}", arena.folder_path(bucket)?, UNKNOWN_CONTAINER);
                let hash = sqpack_common::hash::folder_hash(&path);
                arena.add_folder(bucket, UNKNOWN_CONTAINER, hash, FolderKind::UnknownContainer, true)?
            }
        };
        let chunk = plan.id.chunk();
        for (hash, entries) in plan.unknown {
            let name = folder_placeholder(chunk, hash);
            let folder = match arena.child(container, &name) {
                Some(folder) => folder,
                None => arena.add_folder(container, &name, hash, FolderKind::Unknown { chunk }, true)?,
            };
            for entry in entries {
                arena.add_file(folder, plan.id, entry.locator, hash, entry.file_hash, NameState::Unresolved)?;
                count += 1;
            }
        }
    }

    for synonym in plan.synonyms {
        let path = normalize_path(&synonym.path);
        let (folder_path, name) = split_path(&path);
        let folder = arena.ensure_path(folder_path)?;
        arena.add_file(
            folder,
            plan.id,
            synonym.locator,
            synonym.path_hash,
            synonym.name_hash,
            NameState::Known(name.into()),
        )?;
        count += 1;
    }

    Ok(count)
}
