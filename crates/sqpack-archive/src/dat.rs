//! Shared access to `.datN` files.
//!
//! Dat files are memory-mapped on first use. Every reader holds a
//! [`DatLease`]; the pool hands out one [`DatFile`] per path so all leases over
//! the same file share a single mapping. Under [`KeepOpen::WhileReferenced`]
//! the mapping is released when the last lease is dropped and transparently
//! re-created by the next read, which bounds the number of open handles.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use memmap2::Mmap;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::{Error, Result};

/// When an unreferenced dat file is unmapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeepOpen {
    /// Keep every mapping for the lifetime of the pool.
    Always,
    /// Unmap once no lease references the file.
    #[default]
    WhileReferenced,
}

/// A dat file shared by all leases on the same path.
#[derive(Debug)]
pub struct DatFile {
    path: PathBuf,
    map: RwLock<Option<Arc<Mmap>>>,
    leases: AtomicUsize,
    keep_open: KeepOpen,
}

impl DatFile {
    fn mapping(&self) -> Result<Arc<Mmap>> {
        if let Some(map) = self.map.read().as_ref() {
            return Ok(map.clone());
        }

        let mut slot = self.map.write();
        if let Some(map) = slot.as_ref() {
            return Ok(map.clone());
        }
        tracing::trace!(path = %self.path.display(), "mapping dat file");
        let file = File::open(&self.path)?;
        let map = Arc::new(unsafe { Mmap::map(&file)? });
        *slot = Some(map.clone());
        Ok(map)
    }

    fn release(&self) {
        if self.leases.fetch_sub(1, Ordering::AcqRel) == 1
            && self.keep_open == KeepOpen::WhileReferenced
        {
            tracing::trace!(path = %self.path.display(), "unmapping idle dat file");
            *self.map.write() = None;
        }
    }

    /// Whether the file is currently mapped.
    pub fn is_mapped(&self) -> bool {
        self.map.read().is_some()
    }
}

/// A counted reference to a [`DatFile`].
///
/// Cloning adds a reference; dropping removes it.
#[derive(Debug)]
pub struct DatLease {
    file: Arc<DatFile>,
}

impl DatLease {
    fn new(file: Arc<DatFile>) -> Self {
        file.leases.fetch_add(1, Ordering::AcqRel);
        Self { file }
    }

    /// Path of the dat file.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.file.path
    }

    /// The mapped contents, mapping the file again if it was released.
    #[inline]
    pub fn mapping(&self) -> Result<Arc<Mmap>> {
        self.file.mapping()
    }

    /// Copy `buf.len()` bytes starting at `offset`.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let map = self.mapping()?;
        let bytes = slice(&map, offset, buf.len() as u64)?;
        buf.copy_from_slice(bytes);
        Ok(())
    }

    /// Number of live leases on this file, including this one.
    pub fn lease_count(&self) -> usize {
        self.file.leases.load(Ordering::Acquire)
    }

    /// The shared file state.
    pub fn file(&self) -> &DatFile {
        &self.file
    }
}

impl Clone for DatLease {
    fn clone(&self) -> Self {
        Self::new(self.file.clone())
    }
}

impl Drop for DatLease {
    fn drop(&mut self) {
        self.file.release();
    }
}

/// Bounds-checked view into a mapping.
pub fn slice(data: &[u8], offset: u64, len: u64) -> Result<&[u8]> {
    let end = offset.checked_add(len).filter(|&end| end <= data.len() as u64);
    match end {
        Some(end) => Ok(&data[offset as usize..end as usize]),
        None => Err(Error::OutOfBounds {
            offset,
            len,
            file_len: data.len() as u64,
        }),
    }
}

/// Hands out leases, one shared [`DatFile`] per path.
#[derive(Debug, Default)]
pub struct DatPool {
    keep_open: KeepOpen,
    files: Mutex<FxHashMap<PathBuf, Arc<DatFile>>>,
}

impl DatPool {
    /// Create a pool with the given policy.
    pub fn new(keep_open: KeepOpen) -> Self {
        Self {
            keep_open,
            files: Mutex::new(FxHashMap::default()),
        }
    }

    /// Lease the dat file at `path`. The file is not mapped until first read.
    pub fn lease<P: AsRef<Path>>(&self, path: P) -> DatLease {
        let path = path.as_ref();
        let mut files = self.files.lock();
        let file = files
            .entry(path.to_path_buf())
            .or_insert_with(|| {
                Arc::new(DatFile {
                    path: path.to_path_buf(),
                    map: RwLock::new(None),
                    leases: AtomicUsize::new(0),
                    keep_open: self.keep_open,
                })
            })
            .clone();
        DatLease::new(file)
    }

    /// Number of currently mapped files.
    pub fn mapped_count(&self) -> usize {
        self.files.lock().values().filter(|f| f.is_mapped()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(contents: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents).unwrap();
        file
    }

    #[test]
    fn test_released_when_unreferenced() {
        let file = temp_file(b"0123456789");
        let pool = DatPool::new(KeepOpen::WhileReferenced);

        let lease = pool.lease(file.path());
        let clone = lease.clone();
        assert_eq!(lease.lease_count(), 2);

        let mut buf = [0u8; 4];
        lease.read_at(3, &mut buf).unwrap();
        assert_eq!(&buf, b"3456");
        assert_eq!(pool.mapped_count(), 1);

        drop(lease);
        assert_eq!(pool.mapped_count(), 1);
        drop(clone);
        assert_eq!(pool.mapped_count(), 0);

        // Reopened lazily by the next reader.
        let lease = pool.lease(file.path());
        lease.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"0123");
    }

    #[test]
    fn test_keep_open_always() {
        let file = temp_file(b"abc");
        let pool = DatPool::new(KeepOpen::Always);
        let lease = pool.lease(file.path());
        let mut buf = [0u8; 3];
        lease.read_at(0, &mut buf).unwrap();
        drop(lease);
        assert_eq!(pool.mapped_count(), 1);
    }

    #[test]
    fn test_out_of_bounds() {
        let file = temp_file(b"abc");
        let pool = DatPool::default();
        let lease = pool.lease(file.path());
        let mut buf = [0u8; 4];
        assert!(matches!(
            lease.read_at(0, &mut buf),
            Err(Error::OutOfBounds { .. })
        ));
    }
}
