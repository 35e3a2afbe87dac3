//! A lazily resolved virtual file tree over SqPack archives.
//!
//! The tree starts with one folder per category. Opening a category loads
//! its index files and places every entry under its real folder path when
//! the [`HashNameService`] knows it, or under `<unknown>/` otherwise. File
//! names are resolved separately, in parallel, the first time a folder's
//! files are listed by name.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use sqpack_common::CancellationToken;
//! use sqpack_vfs::{PathListNameService, TreeOptions, VirtualTree};
//!
//! let names = PathListNameService::load("paths.txt")?;
//! let tree = VirtualTree::open("game/sqpack", Arc::new(names), &TreeOptions::default())?;
//! let cancel = CancellationToken::new();
//!
//! if let Some(file) = tree.resolve_file("exd/root.exl", &cancel)? {
//!     let data = tree.lookup(file)?.read_all(&cancel)?;
//!     println!("{} bytes", data.len());
//! }
//! # Ok::<(), sqpack_vfs::Error>(())
//! ```

mod cache;
mod error;
mod lookup;
mod names;
mod promote;
mod resolve;
mod resource;
mod tree;

pub use cache::{FileKey, LookupCache};
pub use error::{Error, Result};
pub use lookup::{FileInfo, FileLookup};
pub use names::{FolderEntry, HashNameService, PathListNameService};
pub use resolve::ResolveCell;
pub use resource::{
    ExcelColumn, ExcelHeader, ExcelPage, ExcelPageRange, GenericResource, ModelResource, Resource,
    ResourceSource, TextResource, TextureHeader, TextureResource, TypedResource,
};
pub use tree::{FileId, FolderId, FolderKind, TreeEvent, TreeOptions, VirtualFile, VirtualTree};
