//! Hash to name resolution.
//!
//! Archives only store hashes, so readable names come from an external
//! database behind [`HashNameService`]. [`PathListNameService`] is a simple
//! in-memory implementation built from a list of known paths.

use std::path::Path;

use rustc_hash::FxHashMap;
use sqpack_archive::IndexId;
use sqpack_common::hash::{file_name_hash, folder_hash, normalize_path, split_path};

use crate::Result;

/// A known folder, as returned by [`HashNameService::folder_entry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FolderEntry {
    /// Hash of the folder path
    pub folder_hash: u32,
    /// String table offset of the folder path
    pub path_offset: u32,
    /// First file record of this folder
    pub files_start: u32,
    /// Number of file records
    pub file_count: u32,
}

/// Source of folder and file names for hashes.
pub trait HashNameService: Send + Sync {
    /// Look up a folder by hash.
    fn folder_entry(&self, index_id: IndexId, folder_hash: u32) -> Option<FolderEntry>;

    /// Read a string from the string table.
    fn string(&self, offset: u32) -> Option<String>;

    /// Name of a file inside a known folder.
    fn file_name(&self, folder: &FolderEntry, file_hash: u32) -> Option<String>;

    /// Best-effort search for a file name without knowing its folder.
    fn find_file_name(&self, index_id: IndexId, file_hash: u32) -> Option<String>;
}

/// Name service over a list of full paths.
///
/// Folders are keyed by hash alone, so the same list serves every chunk.
#[derive(Debug, Clone, Default)]
pub struct PathListNameService {
    strings: Vec<u8>,
    folders: FxHashMap<u32, FolderEntry>,
    files: Vec<(u32, u32)>,
    by_name_hash: FxHashMap<u32, u32>,
}

impl PathListNameService {
    /// Build from full paths such as `chara/equipment/e0001/e0001.imc`.
    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut grouped: FxHashMap<String, Vec<String>> = FxHashMap::default();
        for path in paths {
            let path = normalize_path(path.as_ref());
            if path.is_empty() {
                continue;
            }
            let (folder, name) = split_path(&path);
            grouped
                .entry(folder.to_string())
                .or_default()
                .push(name.to_string());
        }

        let mut service = Self::default();
        let mut folders: Vec<_> = grouped.into_iter().collect();
        folders.sort_by(|a, b| a.0.cmp(&b.0));

        for (folder, mut names) in folders {
            names.sort();
            names.dedup();

            let path_offset = service.intern(&folder);
            let files_start = service.files.len() as u32;
            for name in &names {
                let offset = service.intern(name);
                let hash = file_name_hash(name);
                service.files.push((hash, offset));
                service.by_name_hash.entry(hash).or_insert(offset);
            }
            service.files[files_start as usize..].sort_by_key(|&(hash, _)| hash);

            let hash = folder_hash(&folder);
            service.folders.insert(
                hash,
                FolderEntry {
                    folder_hash: hash,
                    path_offset,
                    files_start,
                    file_count: names.len() as u32,
                },
            );
        }

        tracing::debug!(
            folders = service.folders.len(),
            files = service.files.len(),
            "built path list name service"
        );
        service
    }

    /// Load a text file with one path per line.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::from_paths(text.lines().map(str::trim)))
    }

    /// Number of known folders.
    pub fn folder_count(&self) -> usize {
        self.folders.len()
    }

    /// Number of known file names.
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    fn intern(&mut self, s: &str) -> u32 {
        let offset = self.strings.len() as u32;
        self.strings.extend_from_slice(s.as_bytes());
        self.strings.push(0);
        offset
    }
}

impl HashNameService for PathListNameService {
    fn folder_entry(&self, _index_id: IndexId, folder_hash: u32) -> Option<FolderEntry> {
        self.folders.get(&folder_hash).copied()
    }

    fn string(&self, offset: u32) -> Option<String> {
        let rest = self.strings.get(offset as usize..)?;
        let end = memchr::memchr(0, rest)?;
        std::str::from_utf8(&rest[..end]).ok().map(str::to_string)
    }

    fn file_name(&self, folder: &FolderEntry, file_hash: u32) -> Option<String> {
        let start = folder.files_start as usize;
        let files = self.files.get(start..start + folder.file_count as usize)?;
        let pos = files.binary_search_by_key(&file_hash, |&(hash, _)| hash).ok()?;
        self.string(files[pos].1)
    }

    fn find_file_name(&self, _index_id: IndexId, file_hash: u32) -> Option<String> {
        self.by_name_hash
            .get(&file_hash)
            .and_then(|&offset| self.string(offset))
    }
}
