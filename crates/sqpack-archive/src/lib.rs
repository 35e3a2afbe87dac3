//! SqPack archive reader.
//!
//! SqPack splits game assets into per-category buckets. Each bucket chunk is
//! an `.index` file mapping `(folder_hash, file_hash)` pairs to locators, and
//! a set of `.datN` files holding block-compressed entries:
//!
//! - [`ArchiveCatalog`] enumerates the index files of an installation
//! - [`IndexFile`] parses the hash and synonym tables
//! - [`DatPool`] shares memory-mapped dat files under a keep-open policy
//! - [`BlockStream`] turns an entry into a seekable logical file, for every
//!   [`FileType`]
//!
//! # Example
//!
//! ```no_run
//! use std::io::Read;
//! use sqpack_archive::{ArchiveCatalog, BlockStream, CatalogOptions, DatPool};
//!
//! let catalog = ArchiveCatalog::open("game/sqpack", &CatalogOptions::default())?;
//! let pool = DatPool::default();
//!
//! for bucket in catalog.buckets() {
//!     for chunk in bucket.chunks() {
//!         let index = chunk.load()?;
//!         for entry in index.entries().iter().filter(|e| !e.locator.is_synonym()) {
//!             let dat = pool.lease(chunk.dat_path(entry.locator.dat_id()));
//!             let mut stream = BlockStream::open(dat, entry.locator.offset())?;
//!             let mut data = Vec::new();
//!             stream.read_to_end(&mut data)?;
//!         }
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod catalog;
mod dat;
mod decompress;
mod error;
mod index;
mod stream;

pub mod format;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use catalog::{category_id, category_name, ArchiveCatalog, Bucket, CatalogOptions, ChunkIndex, IndexId};
pub use dat::{DatLease, DatPool, KeepOpen};
pub use error::{Error, Result};
pub use format::{FileEntryHeader, FileType, Locator};
pub use index::{IndexEntry, IndexFile, SynonymRecord};
pub use stream::{read_entry_header, BlockStream, OffsetTable};
