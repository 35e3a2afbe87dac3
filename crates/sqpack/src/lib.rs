//! Sqpack - browse and search SqPack game archives.
//!
//! This crate provides a unified interface to the sqpack library ecosystem.
//!
//! # Crates
//!
//! - [`sqpack_common`] - Binary reading, path hashing, cancellation
//! - [`sqpack_archive`] - Index files, dat files and block-compressed streams
//! - [`sqpack_vfs`] - The lazily resolved virtual file tree
//! - [`sqpack_query`] - Query language and parallel search
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use sqpack::prelude::*;
//!
//! let names = PathListNameService::load("paths.txt")?;
//! let tree = VirtualTree::open("game/sqpack", Arc::new(names), &TreeOptions::default())?;
//! let cancel = CancellationToken::new();
//!
//! if let Some(file) = tree.resolve_file("exd/root.exl", &cancel)? {
//!     let lookup = tree.lookup(file)?;
//!     println!("{}: {}", lookup.name(), lookup.as_resource(&cancel)?.kind());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

// Re-export all sub-crates
pub use sqpack_archive as archive;
pub use sqpack_common as common;
pub use sqpack_query as query;
pub use sqpack_vfs as vfs;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use sqpack_archive::{ArchiveCatalog, BlockStream, CatalogOptions, FileType, IndexId, KeepOpen};
    pub use sqpack_common::{hash, BinaryReader, CancellationToken};
    pub use sqpack_query::{Query, SearchObserver, SearchOptions, SearchProgress, SearchState, Searcher};
    pub use sqpack_vfs::{
        FileId, FileInfo, FileLookup, FolderId, FolderKind, HashNameService, PathListNameService, Resource,
        TreeEvent, TreeOptions, VirtualTree,
    };
}

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
