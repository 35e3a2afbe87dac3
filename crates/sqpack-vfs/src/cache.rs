//! LRU cache of open file lookups.

use std::fmt;
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use sqpack_archive::{IndexId, Locator};

use crate::lookup::FileLookup;
use crate::Result;

/// Identity of a file across the whole installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileKey {
    pub index_id: IndexId,
    pub locator: Locator,
}

/// Bounded map from files to their parsed lookups.
///
/// Only the map is locked; the cached lookups are reference counted and stay
/// usable by their holders after eviction.
pub struct LookupCache {
    entries: Mutex<LruCache<FileKey, FileLookup>>,
}

impl fmt::Debug for LookupCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.lock();
        f.debug_struct("LookupCache")
            .field("len", &entries.len())
            .field("capacity", &entries.cap())
            .finish()
    }
}

impl LookupCache {
    /// Create a cache holding at most `capacity` lookups (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// A new handle to the cached lookup, marking it recently used.
    pub fn get(&self, key: &FileKey) -> Option<FileLookup> {
        self.entries.lock().get(key).cloned()
    }

    /// Cache a lookup, evicting the least recently used one when full.
    pub fn insert(&self, key: FileKey, lookup: FileLookup) {
        self.entries.lock().put(key, lookup);
    }

    /// Return the cached lookup or open and cache a new one.
    ///
    /// `open` runs without the cache lock held.
    pub fn get_or_try_insert<F>(&self, key: FileKey, open: F) -> Result<FileLookup>
    where
        F: FnOnce() -> Result<FileLookup>,
    {
        if let Some(lookup) = self.get(&key) {
            return Ok(lookup);
        }
        let lookup = open()?;
        let mut entries = self.entries.lock();
        Ok(entries.get_or_insert(key, || lookup).clone())
    }

    /// Forget the lookup for `key`. Existing handles stay usable.
    pub fn remove(&self, key: &FileKey) -> Option<FileLookup> {
        self.entries.lock().pop(key)
    }

    /// Number of cached lookups.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Maximum number of cached lookups.
    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    /// Drop every cached lookup.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
